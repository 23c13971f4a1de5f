//! Paragraph-boundary text chunker with token overlap.
//!
//! Splits extracted document text into [`Chunk`]s no larger than
//! `chunk_size` tokens. Splitting prefers paragraph boundaries (`\n\n`),
//! then falls back to newline or space boundaries for oversized paragraphs.
//! Each chunk after the first is prefixed with the trailing `chunk_overlap`
//! tokens of its predecessor so that sentences straddling a boundary stay
//! retrievable from either side.
//!
//! Token counts are approximated at four characters per token.
//!
//! # Example
//!
//! ```rust
//! use nexusync_core::chunk::{chunk_document, ChunkParams};
//!
//! let params = ChunkParams { chunk_size: 1024, chunk_overlap: 20 };
//! let chunks = chunk_document("/docs/a.txt", "/docs/a.txt", "Hello.\n\nWorld.", params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Rough characters-per-token ratio used for every token estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Chunk sizing, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Split `text` into chunks for the document at `identity`.
///
/// Always returns at least one chunk, even for empty text, so that every
/// indexed identity owns at least one node. Indices are contiguous from 0.
pub fn chunk_document(identity: &str, file_path: &str, text: &str, params: ChunkParams) -> Vec<Chunk> {
    let max_chars = params.chunk_size.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (params.chunk_overlap * CHARS_PER_TOKEN).min(max_chars / 2);
    let budget = max_chars - overlap_chars;

    let pieces = split_paragraphs(text, budget.max(1));
    if pieces.is_empty() {
        return vec![make_chunk(identity, file_path, 0, text.trim())];
    }

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut previous: Option<&str> = None;
    for (index, piece) in pieces.iter().enumerate() {
        let body = match previous {
            Some(prev) if overlap_chars > 0 => {
                let tail = overlap_tail(prev, overlap_chars);
                if tail.is_empty() {
                    piece.clone()
                } else {
                    format!("{} {}", tail, piece)
                }
            }
            _ => piece.clone(),
        };
        chunks.push(make_chunk(identity, file_path, index as i64, &body));
        previous = Some(piece.as_str());
    }
    chunks
}

/// Greedily pack paragraphs into pieces of at most `max_chars` bytes.
fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    pieces
}

/// Split an oversized paragraph at the last newline or space that fits.
fn hard_split(mut remaining: &str, max_chars: usize, out: &mut Vec<String>) {
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, max_chars);
        let mut cut = if limit < remaining.len() {
            remaining[..limit]
                .rfind(['\n', ' '])
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        if cut == 0 {
            // A single character wider than the budget.
            cut = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[cut..];
    }
}

/// The last `max_chars` bytes of `text`, starting on a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut start = text.len() - max_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => tail,
    }
}

fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(identity: &str, file_path: &str, index: i64, text: &str) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    Chunk {
        id: Uuid::new_v4().to_string(),
        identity: identity.to_string(),
        file_path: file_path.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(chunk_size: usize, chunk_overlap: usize) -> ChunkParams {
        ChunkParams {
            chunk_size,
            chunk_overlap,
        }
    }

    #[test]
    fn small_text_is_one_chunk() {
        let chunks = chunk_document("/a", "/a", "Paris is the capital of France.", params(1024, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Paris is the capital of France.");
        assert_eq!(chunks[0].identity, "/a");
    }

    #[test]
    fn empty_text_still_yields_a_chunk() {
        let chunks = chunk_document("/a", "/a", "", params(1024, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn indices_are_contiguous() {
        let text = (0..60)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document("/a", "/a", &text, params(10, 2));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn chunks_respect_size_limit() {
        let text = "word ".repeat(2000);
        let chunks = chunk_document("/a", "/a", &text, params(16, 4));
        for c in &chunks {
            assert!(c.text.len() <= 16 * CHARS_PER_TOKEN, "chunk too long: {}", c.text.len());
        }
    }

    #[test]
    fn overlap_repeats_tail_of_previous_piece() {
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = chunk_document("/a", "/a", text, params(8, 2));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("delta"), "got {:?}", chunks[1].text);
        assert!(chunks[1].text.ends_with("theta"));
    }

    #[test]
    fn zero_overlap_has_no_prefix() {
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = chunk_document("/a", "/a", text, params(6, 0));
        assert_eq!(chunks[1].text, "epsilon zeta eta theta");
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let text = "┌──────────────────┐\n│ Héllo wörld      │\n└──────────────────┘";
        let chunks = chunk_document("/a", "/a", text, params(2, 1));
        assert!(!chunks.is_empty());
    }

    #[test]
    fn splits_are_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = chunk_document("/a", "/a", text, params(3, 1));
        let b = chunk_document("/a", "/a", text, params(3, 1));
        let texts_a: Vec<_> = a.iter().map(|c| (&c.text, &c.hash)).collect();
        let texts_b: Vec<_> = b.iter().map(|c| (&c.text, &c.hash)).collect();
        assert_eq!(texts_a, texts_b);
    }
}
