//! CLI command definitions, routing, and tracing setup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Report, Result};
use color_eyre::Section;
use ct_ai::embeddings::{Embedder, HashingEmbedder, OllamaEmbedder};
use ct_ai::knowledge::KnowledgeBase;
use ct_ai::llm::{Llm, OllamaLlm};
use ct_ai::ollama::OllamaClient;
use ct_ai::pipeline::Pipeline;
use ct_ai::session::AuditSession;
use ct_core::config::{load_config_from, render_default_config, AppConfig, CONFIG_FILE_NAME};
use ct_core::domain::{sort_by_origin, AssessmentRecord, Verdict};
use ct_core::error::{codes, AppError};
use ct_core::ingest::{FileExtractor, SkippedDocument};
use ct_core::normalize::timestamps::{filename_safe_timestamp, now_rfc3339_utc};
use ct_core::report::{export_report_as, render_summary_markdown, ReportArtifact, ReportFormat};
use tracing::info;

/// Model name recorded in knowledge bases built with the offline hashing embedder.
const HASHING_MODEL: &str = "hashing-v1";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ControlTester: test security controls against audit evidence.
#[derive(Parser)]
#[command(
    name = "controltester",
    version,
    about = "Assess audit evidence against a knowledge base of security policies.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (TOML). Missing file means built-in defaults.
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME, env = "CONTROLTESTER_CONFIG")]
    pub config: PathBuf,

    /// Session file carrying the knowledge base location, last results and chat history.
    #[arg(long, global = true, default_value = ".controltester/session.json")]
    pub session: PathBuf,

    /// Embedding backend used to build or query the knowledge base.
    #[arg(long, global = true, default_value = "ollama")]
    pub embedder: EmbedderKind,

    /// Override `[ollama] base_url`. Must be http://127.0.0.1[:port].
    #[arg(long, global = true)]
    pub ollama_url: Option<String>,

    /// Override `[ollama] llm_model`.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum EmbedderKind {
    /// Local Ollama embeddings endpoint.
    Ollama,
    /// Deterministic offline feature hashing.
    Hashing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum ReportFormatArg {
    Xlsx,
    Csv,
}

impl From<ReportFormatArg> for ReportFormat {
    fn from(f: ReportFormatArg) -> Self {
        match f {
            ReportFormatArg::Xlsx => ReportFormat::Xlsx,
            ReportFormatArg::Csv => ReportFormat::Csv,
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Write a config file with every default spelled out.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Check that Ollama answers on 127.0.0.1.
    Health,

    /// Build the policy knowledge base from policy/report files and save it.
    Train {
        /// Policy documents (pdf, txt, csv, xlsx, ...).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Where to save the knowledge base (defaults to `[storage] kb_dir`).
        #[arg(long)]
        kb_dir: Option<PathBuf>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Delete a saved knowledge base.
    DeleteKb {
        #[arg(long)]
        kb_dir: Option<PathBuf>,
    },

    /// Assess evidence files and export the audit workbook.
    Audit {
        /// Evidence files (logs, configs, screenshots, reports).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Knowledge base to assess against (defaults to the session's, then `[storage] kb_dir`).
        #[arg(long)]
        kb_dir: Option<PathBuf>,

        /// Directory for the workbook and summary (defaults to `[storage] report_dir`).
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Evidence chunks assessed in parallel.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Per-chunk timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Workbook format.
        #[arg(long, value_enum, default_value_t = ReportFormatArg::Xlsx)]
        format: ReportFormatArg,
    },

    /// Ask a question about the policies and the last audit.
    Ask {
        question: String,

        #[arg(long)]
        kb_dir: Option<PathBuf>,

        /// Restrict the question to one evidence file from the last audit and its matched policy.
        #[arg(long)]
        evidence: Option<String>,
    },

    /// Show the chat history, newest first.
    History,

    /// Print version and build information.
    Version,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. `RUST_LOG` wins when set.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "controltester=info,ct_ai=info,ct_core=info",
        1 => "controltester=debug,ct_ai=debug,ct_core=debug",
        _ => "controltester=trace,ct_ai=trace,ct_core=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Error reporting
// ---------------------------------------------------------------------------

/// Turn an `AppError` into a report with a hint for the codes a user can act on.
fn report(e: AppError) -> Report {
    let hint = match e.code.as_str() {
        codes::KB_INDEX_CORRUPT => {
            Some("rebuild it with `controltester train <policy files>` or pass --kb-dir")
        }
        codes::KB_EMPTY_INPUT => Some("none of the policy files produced any text"),
        codes::AI_OLLAMA_UNREACHABLE | codes::AI_EMBEDDINGS_FAILED => {
            Some("start Ollama locally, or use --embedder hashing for an offline knowledge base")
        }
        codes::AI_REMOTE_NOT_ALLOWED => Some("only http://127.0.0.1[:port] is accepted"),
        codes::REPORT_EMPTY => Some("no evidence chunk was assessed; check the skipped files above"),
        codes::CONFIG_INVALID => Some("run `controltester init-config` to see the defaults"),
        codes::CHAT_EVIDENCE_UNKNOWN => {
            Some("pass an evidence file assessed by the last `controltester audit` run")
        }
        _ => None,
    };
    let r = eyre!("{}", e.describe());
    match hint {
        Some(h) => r.suggestion(h),
        None => r,
    }
}

trait OrReport<T> {
    fn or_report(self) -> Result<T>;
}

impl<T> OrReport<T> for std::result::Result<T, AppError> {
    fn or_report(self) -> Result<T> {
        self.map_err(report)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut cfg = load_config_from(&cli.config).or_report()?;
    if let Some(url) = cli.ollama_url.as_deref() {
        cfg.ollama.base_url = url.to_string();
    }
    if let Some(model) = cli.model.as_deref() {
        cfg.ollama.llm_model = model.to_string();
    }
    if cli.embedder == EmbedderKind::Hashing {
        cfg.ollama.embedding_model = HASHING_MODEL.to_string();
    }
    Ok(cfg)
}

/// Knowledge bases remember which embedder built them; queries must use the same one.
fn embedder_for_model(cfg: &AppConfig, model: &str) -> Result<Arc<dyn Embedder>> {
    if model == HASHING_MODEL {
        return Ok(Arc::new(HashingEmbedder::default()));
    }
    let client = OllamaClient::new(&cfg.ollama.base_url).or_report()?;
    Ok(Arc::new(OllamaEmbedder::new(client)))
}

fn llm(cfg: &AppConfig) -> Result<Arc<dyn Llm>> {
    let client = OllamaClient::new(&cfg.ollama.base_url).or_report()?;
    Ok(Arc::new(
        OllamaLlm::new(client).with_timeout(Duration::from_secs(cfg.assessment.timeout_secs)),
    ))
}

fn pipeline(cfg: AppConfig, embedder: Arc<dyn Embedder>) -> Result<Pipeline> {
    let llm = llm(&cfg)?;
    Pipeline::new(cfg, Box::new(FileExtractor::new()), embedder, llm).or_report()
}

fn resolve_kb_dir(explicit: Option<PathBuf>, session: &AuditSession, cfg: &AppConfig) -> PathBuf {
    explicit
        .or_else(|| session.kb_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(&cfg.storage.kb_dir))
}

fn print_skipped(skipped: &[SkippedDocument]) {
    for s in skipped {
        println!("  skipped {}: {}", s.path, s.error.describe());
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::InitConfig { force } => cmd_init_config(&cli.config, *force),
        Command::Health => cmd_health(&cli),
        Command::Train {
            files,
            kb_dir,
            chunk_size,
            overlap,
        } => cmd_train(&cli, files, kb_dir.clone(), *chunk_size, *overlap),
        Command::DeleteKb { kb_dir } => cmd_delete_kb(&cli, kb_dir.clone()),
        Command::Audit {
            files,
            kb_dir,
            out_dir,
            concurrency,
            timeout_secs,
            format,
        } => {
            cmd_audit(
                &cli,
                files,
                kb_dir.clone(),
                out_dir.clone(),
                *concurrency,
                *timeout_secs,
                (*format).into(),
            )
            .await
        }
        Command::Ask {
            question,
            kb_dir,
            evidence,
        } => cmd_ask(&cli, question, kb_dir.clone(), evidence.as_deref()),
        Command::History => cmd_history(&cli),
        Command::Version => cmd_version(),
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(eyre!("{} already exists", path.display()).suggestion("pass --force to overwrite it"));
    }
    let text = render_default_config().or_report()?;
    fs::write(path, text).map_err(|e| eyre!("cannot write {}: {e}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_health(cli: &Cli) -> Result<()> {
    let cfg = load_config(cli)?;
    let client = OllamaClient::new(&cfg.ollama.base_url).or_report()?;
    client.health_check().or_report()?;
    println!("Ollama reachable on {}", client.base_url());
    Ok(())
}

fn cmd_train(
    cli: &Cli,
    files: &[PathBuf],
    kb_dir: Option<PathBuf>,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<()> {
    let mut cfg = load_config(cli)?;
    if let Some(n) = chunk_size {
        cfg.chunking.chunk_size = n;
    }
    if let Some(n) = overlap {
        cfg.chunking.overlap = n;
    }
    let mut session = AuditSession::load(&cli.session).or_report()?;
    let kb_dir = kb_dir.unwrap_or_else(|| PathBuf::from(&cfg.storage.kb_dir));

    let embedder = embedder_for_model(&cfg, &cfg.ollama.embedding_model)?;
    let pipeline = pipeline(cfg, embedder)?;
    let out = pipeline.train(files).or_report()?;
    out.kb.save(&kb_dir).or_report()?;

    session.set_knowledge_base(Some(&kb_dir)).or_report()?;
    session.save(&cli.session).or_report()?;

    println!();
    println!("  Knowledge base saved.");
    println!("  Documents: {} ({} skipped)", out.documents, out.skipped.len());
    println!("  Chunks:    {}", out.chunks);
    println!("  Model:     {} ({} dims)", out.kb.model(), out.kb.dims());
    println!("  Path:      {}", kb_dir.display());
    print_skipped(&out.skipped);
    println!();
    Ok(())
}

fn cmd_delete_kb(cli: &Cli, kb_dir: Option<PathBuf>) -> Result<()> {
    let cfg = load_config(cli)?;
    let mut session = AuditSession::load(&cli.session).or_report()?;
    let dir = resolve_kb_dir(kb_dir, &session, &cfg);

    let removed = KnowledgeBase::delete(&dir).or_report()?;
    if session.kb_dir.as_deref().map(Path::new) == Some(dir.as_path()) {
        session.set_knowledge_base(None).or_report()?;
        session.save(&cli.session).or_report()?;
    }
    if removed {
        println!("Deleted saved knowledge base at {}", dir.display());
    } else {
        println!("No saved knowledge base at {}", dir.display());
    }
    Ok(())
}

async fn cmd_audit(
    cli: &Cli,
    files: &[PathBuf],
    kb_dir: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    timeout_secs: Option<u64>,
    format: ReportFormat,
) -> Result<()> {
    let mut cfg = load_config(cli)?;
    if let Some(n) = concurrency {
        cfg.assessment.concurrency = n;
    }
    if let Some(n) = timeout_secs {
        cfg.assessment.timeout_secs = n;
    }
    let mut session = AuditSession::load(&cli.session).or_report()?;
    let kb_dir = resolve_kb_dir(kb_dir, &session, &cfg);
    let out_dir = out_dir.unwrap_or_else(|| PathBuf::from(&cfg.storage.report_dir));

    let kb = Arc::new(KnowledgeBase::load(&kb_dir).or_report()?);
    let embedder = embedder_for_model(&cfg, kb.model())?;
    let pipeline = pipeline(cfg, embedder)?;

    info!(files = files.len(), kb = %kb_dir.display(), "starting audit");
    let out = pipeline.run_audit(files, kb).await;
    print_skipped(&out.skipped);

    let mut records = out.records;
    sort_by_origin(&mut records);

    let generated_at = now_rfc3339_utc().or_report()?;
    session.set_knowledge_base(Some(&kb_dir)).or_report()?;
    let exported = export_and_record(&mut session, records, &out_dir, &generated_at, format);
    session.save(&cli.session).or_report()?;
    let artifact = exported.or_report()?;
    let records = &session.records;

    let summary = render_summary_markdown(records).or_report()?;
    let summary_path = out_dir.join(format!(
        "audit_summary_{}.md",
        filename_safe_timestamp(&generated_at)
    ));
    fs::write(&summary_path, &summary)
        .map_err(|e| eyre!("cannot write {}: {e}", summary_path.display()))?;

    println!();
    println!("  Audit complete.");
    println!("  Evidence chunks: {}", records.len());
    for v in Verdict::ALL {
        let n = records.iter().filter(|r| r.verdict == v).count();
        println!("    {:<14} {n}", v.as_str());
    }
    println!("  Workbook: {} ({} bytes)", artifact.path, artifact.bytes);
    println!("  Summary:  {}", summary_path.display());
    println!();
    Ok(())
}

/// Export the run and make it the session's current run. A run that cannot be exported
/// (no records) still replaces the previous one, without a report.
fn export_and_record(
    session: &mut AuditSession,
    records: Vec<AssessmentRecord>,
    out_dir: &Path,
    generated_at: &str,
    format: ReportFormat,
) -> std::result::Result<ReportArtifact, AppError> {
    match export_report_as(&records, out_dir, generated_at, format) {
        Ok(artifact) => {
            session.record_run(records, Some(artifact.clone()))?;
            Ok(artifact)
        }
        Err(e) => {
            session.record_run(records, None)?;
            Err(e)
        }
    }
}

fn cmd_ask(
    cli: &Cli,
    question: &str,
    kb_dir: Option<PathBuf>,
    evidence: Option<&str>,
) -> Result<()> {
    let cfg = load_config(cli)?;
    let mut session = AuditSession::load(&cli.session).or_report()?;
    let kb_dir = resolve_kb_dir(kb_dir, &session, &cfg);

    let kb = KnowledgeBase::load(&kb_dir).or_report()?;
    let embedder = embedder_for_model(&cfg, kb.model())?;
    let pipeline = pipeline(cfg, embedder)?;

    let (asked, answer) = match evidence {
        Some(file) => (
            format!("[{file}] {question}"),
            pipeline
                .ask_about_evidence(question, file, &kb, &session.records)
                .or_report()?,
        ),
        None => (
            question.to_string(),
            pipeline.ask(question, &kb, &session.records).or_report()?,
        ),
    };
    println!("{answer}");

    session.chat.push(asked, answer).or_report()?;
    session.save(&cli.session).or_report()?;
    Ok(())
}

fn cmd_history(cli: &Cli) -> Result<()> {
    let session = AuditSession::load(&cli.session).or_report()?;
    if session.chat.is_empty() {
        println!("No questions asked yet.");
        return Ok(());
    }
    for turn in session.chat.latest_first() {
        println!("[{}]", turn.asked_at);
        println!("You: {}", turn.question);
        println!("Bot: {}", turn.answer);
        println!();
    }
    Ok(())
}

fn cmd_version() -> Result<()> {
    let commit = option_env!("GIT_COMMIT_HASH").unwrap_or("unknown");
    println!("controltester {} (commit {commit})", env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn audit_flags_parse() {
        let cli = Cli::try_parse_from([
            "controltester",
            "--embedder",
            "hashing",
            "audit",
            "auth.log",
            "users.csv",
            "--concurrency",
            "8",
        ])
        .expect("parse");
        assert_eq!(cli.embedder, EmbedderKind::Hashing);
        match cli.command {
            Command::Audit {
                files, concurrency, ..
            } => {
                assert_eq!(files.len(), 2);
                assert_eq!(concurrency, Some(8));
            }
            _ => panic!("expected audit"),
        }
    }

    #[test]
    fn empty_run_replaces_the_previous_one() {
        let mut session = AuditSession::new();
        let prior = AssessmentRecord {
            evidence_snippet: "login failed".to_string(),
            evidence_type: "Auth log".to_string(),
            verdict: Verdict::NonCompliant,
            control_statement: "AC-7".to_string(),
            rationale: None,
            improvement_suggestion: None,
            risk_score: None,
            source: "auth.log".to_string(),
            origin_document_index: 0,
            sequence_index: 0,
            policy_refs: Vec::new(),
        };
        session.record_run(vec![prior], None).expect("run");

        let err = export_and_record(
            &mut session,
            Vec::new(),
            Path::new("unused-report-dir"),
            "2026-02-10T00:00:00Z",
            ReportFormat::Xlsx,
        )
        .expect_err("empty");
        assert_eq!(err.code, codes::REPORT_EMPTY);
        assert!(session.records.is_empty());
        assert!(session.report.is_none());
        assert!(!Path::new("unused-report-dir").exists());
    }

    #[test]
    fn audit_format_defaults_to_xlsx() {
        let cli = Cli::try_parse_from(["controltester", "audit", "auth.log"]).expect("parse");
        match cli.command {
            Command::Audit { format, .. } => assert_eq!(format, ReportFormatArg::Xlsx),
            _ => panic!("expected audit"),
        }
        let cli = Cli::try_parse_from(["controltester", "audit", "auth.log", "--format", "csv"])
            .expect("parse");
        match cli.command {
            Command::Audit { format, .. } => assert_eq!(format, ReportFormatArg::Csv),
            _ => panic!("expected audit"),
        }
    }

    #[test]
    fn ask_accepts_an_evidence_file() {
        let cli = Cli::try_parse_from([
            "controltester",
            "ask",
            "Why did this fail?",
            "--evidence",
            "auth.log",
        ])
        .expect("parse");
        match cli.command {
            Command::Ask {
                question, evidence, ..
            } => {
                assert_eq!(question, "Why did this fail?");
                assert_eq!(evidence.as_deref(), Some("auth.log"));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn kb_dir_prefers_flag_then_session_then_config() {
        let cfg = AppConfig::default();
        let mut session = AuditSession::new();
        assert_eq!(
            resolve_kb_dir(None, &session, &cfg),
            PathBuf::from("saved_kb_vectorstore")
        );
        session.kb_dir = Some("from_session".to_string());
        assert_eq!(resolve_kb_dir(None, &session, &cfg), PathBuf::from("from_session"));
        assert_eq!(
            resolve_kb_dir(Some(PathBuf::from("flag")), &session, &cfg),
            PathBuf::from("flag")
        );
    }
}
