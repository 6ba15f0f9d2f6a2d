//! Overlapping, boundary-aware text chunking.
//!
//! Sizes are measured in bytes of UTF-8 text; cuts always land on char boundaries.
//! A cut prefers, in order: paragraph break, line break, sentence end, clause end,
//! word break. Only when the window holds none of these is the text hard-cut at the
//! window edge. Every chunk ends strictly past the previous one, so iteration always
//! terminates, and no byte of the source is skipped.

use crate::config::ChunkingConfig;
use crate::domain::{Chunk, Document};
use crate::error::{codes, AppError};

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, AppError> {
        if chunk_size == 0 {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "chunk_size must be greater than zero",
            ));
        }
        if overlap >= chunk_size {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "overlap must be smaller than chunk_size",
            )
            .with_details(format!("chunk_size={chunk_size}; overlap={overlap}")));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(cfg: &ChunkingConfig) -> Result<Self, AppError> {
        Self::new(cfg.chunk_size, cfg.overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazy chunk sequence over `text`. Clone the iterator to restart it.
    ///
    /// Whitespace-only text yields nothing.
    pub fn chunks<'a>(&self, text: &'a str, source: &'a str, doc_index: u32) -> ChunkIter<'a> {
        ChunkIter {
            text,
            source,
            doc_index,
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            start: 0,
            prev_end: 0,
            seq: 0,
            done: text.trim().is_empty(),
        }
    }

    pub fn chunk_document(&self, doc: &Document, doc_index: u32) -> Vec<Chunk> {
        self.chunks(&doc.text, &doc.source, doc_index).collect()
    }

    /// Chunk a batch; `origin_document_index` is the position in `docs`.
    ///
    /// Whitespace-only chunks (runs of blank lines between paragraphs) are dropped;
    /// kept chunks keep their original `sequence_index`.
    pub fn chunk_documents(&self, docs: &[Document]) -> Vec<Chunk> {
        let mut out = Vec::new();
        for (i, doc) in docs.iter().enumerate() {
            if doc.is_blank() {
                tracing::warn!(doc_index = i, source = %doc.source, "document is empty and skipped");
                continue;
            }
            let before = out.len();
            let mut blank = 0usize;
            for chunk in self.chunks(&doc.text, &doc.source, i as u32) {
                if chunk.text.trim().is_empty() {
                    blank += 1;
                    continue;
                }
                out.push(chunk);
            }
            if blank > 0 {
                tracing::debug!(doc_index = i, source = %doc.source, blank, "whitespace-only chunks skipped");
            }
            tracing::info!(
                doc_index = i,
                source = %doc.source,
                chunks = out.len() - before,
                "document split into chunks"
            );
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    text: &'a str,
    source: &'a str,
    doc_index: u32,
    chunk_size: usize,
    overlap: usize,
    start: usize,
    prev_end: usize,
    seq: u32,
    done: bool,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let len = self.text.len();
        if self.done || self.start >= len {
            return None;
        }

        let start = self.start;
        // The cut must land past everything already emitted.
        let floor = self.prev_end.max(start);

        let end = if start + self.chunk_size >= len {
            len
        } else {
            let mut window_end = floor_boundary(self.text, start + self.chunk_size);
            if window_end <= floor {
                window_end = ceil_boundary(self.text, floor + 1);
            }
            let min_cut = (floor + 1).max(start + self.chunk_size / 2);
            natural_cut(self.text, floor, window_end, min_cut)
                .or_else(|| natural_cut(self.text, floor, window_end, floor + 1))
                .unwrap_or(window_end)
        };

        let chunk = Chunk {
            text: self.text[start..end].to_string(),
            source: self.source.to_string(),
            origin_document_index: self.doc_index,
            sequence_index: self.seq,
            start_offset: start,
        };
        self.seq += 1;
        self.prev_end = end;

        if end >= len {
            self.done = true;
        } else {
            self.start = self.next_start(start, end);
        }
        Some(chunk)
    }
}

impl<'a> ChunkIter<'a> {
    /// Step back `overlap` bytes from `end`, nudged forward to the next word start so the
    /// overlap does not begin mid-word.
    fn next_start(&self, start: usize, end: usize) -> usize {
        let back = end.saturating_sub(self.overlap);
        if back <= start || self.overlap == 0 {
            return end;
        }
        let next = ceil_boundary(self.text, back);
        if next >= end {
            return end;
        }
        let region = &self.text[next..end];
        if let Some((i, ws)) = region.char_indices().find(|(_, c)| c.is_whitespace()) {
            let cand = next + i + ws.len_utf8();
            if cand < end {
                return cand;
            }
        }
        next
    }
}

/// Latest separator end inside `(floor, window_end]` that is at least `min_cut`.
fn natural_cut(text: &str, floor: usize, window_end: usize, min_cut: usize) -> Option<usize> {
    let window = &text[floor..window_end];
    for sep in SEPARATORS {
        if let Some(i) = window.rfind(sep) {
            let cut = floor + i + sep.len();
            if cut >= min_cut {
                return Some(cut);
            }
        }
    }
    None
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Stitch chunks of one document back together, dropping overlapped bytes.
///
/// Chunks must be in sequence order.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for c in chunks {
        let covered = out.len();
        let chunk_end = c.start_offset + c.text.len();
        if chunk_end <= covered {
            continue;
        }
        let skip = covered.saturating_sub(c.start_offset);
        out.push_str(&c.text[skip..]);
    }
    out
}
