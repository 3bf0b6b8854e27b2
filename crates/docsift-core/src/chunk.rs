//! Paragraph-boundary text chunker.
//!
//! Splits extracted document text into size-bounded [`Chunk`]s on
//! paragraph boundaries (`\n\n`). The split is deterministic: the same
//! text and limit always produce the same chunks and hashes, which is
//! what makes re-ingestion change detection work.
//!
//! Chunk indices count from 1. Index 0 is reserved for document-level
//! aspects (title, summary, OCR text) so that `(document_id, chunk_index,
//! embedding_type)` stays unique across aspect kinds.

use sha2::{Digest, Sha256};

/// A bounded contiguous sub-span of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based sequential position within the document.
    pub index: i64,
    pub text: String,
    /// SHA-256 hex of `text`, for staleness detection.
    pub hash: String,
}

/// SHA-256 hex digest of a text span.
///
/// Used for every aspect, not only content chunks: titles, summaries,
/// and OCR text get the same change-detection treatment.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split text into chunks on paragraph boundaries, respecting `max_chars`.
///
/// Paragraphs are accumulated until adding the next one would exceed the
/// limit; a single paragraph longer than the limit is hard-split at the
/// nearest newline or space boundary. Whitespace-only input produces no
/// chunks (an item with no text never reaches the chunker).
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut next_index: i64 = 1;

    let flush = |buf: &mut String, next_index: &mut i64, chunks: &mut Vec<Chunk>| {
        if !buf.is_empty() {
            chunks.push(make_chunk(*next_index, buf));
            *next_index += 1;
            buf.clear();
        }
    };

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
            flush(&mut buf, &mut next_index, &mut chunks);
        }

        if trimmed.len() > max_chars {
            flush(&mut buf, &mut next_index, &mut chunks);
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = split_point(remaining, max_chars);
                let piece = remaining[..split_at].trim();
                if !piece.is_empty() {
                    chunks.push(make_chunk(next_index, piece));
                    next_index += 1;
                }
                remaining = &remaining[split_at..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    flush(&mut buf, &mut next_index, &mut chunks);
    chunks
}

/// Pick a split point at or below `max_chars`, preferring a newline or
/// space boundary, always on a valid UTF-8 char boundary, and always
/// making progress.
fn split_point(s: &str, max_chars: usize) -> usize {
    if s.len() <= max_chars {
        return s.len();
    }

    let mut limit = max_chars;
    while limit > 0 && !s.is_char_boundary(limit) {
        limit -= 1;
    }
    if limit == 0 {
        // First char alone exceeds the limit; emit it whole.
        return s
            .char_indices()
            .nth(1)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
    }

    s[..limit]
        .rfind('\n')
        .or_else(|| s[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

fn make_chunk(index: i64, text: &str) -> Chunk {
    Chunk {
        index,
        text: text.to_string(),
        hash: content_hash(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Receipt total $42.10", 2000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 1);
        assert_eq!(chunks[0].text, "Receipt total $42.10");
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_text("", 2000).is_empty());
        assert!(chunk_text("  \n\n  ", 2000).is_empty());
    }

    #[test]
    fn test_paragraphs_accumulate_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 2000);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_indices_start_at_one_and_are_contiguous() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 40);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as i64 + 1);
        }
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let text = "word ".repeat(200);
        let chunks = chunk_text(&text, 50);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 50, "chunk too long: {}", c.text.len());
        }
    }

    #[test]
    fn test_multibyte_utf8_split() {
        let text = "é".repeat(300);
        let chunks = chunk_text(&text, 100);
        assert!(!chunks.is_empty());
        // Reassembling loses nothing.
        let total: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        assert_eq!(total, 300);
    }

    #[test]
    fn test_deterministic_hashes() {
        let text = "Alpha\n\nBeta\n\nGamma";
        let a = chunk_text(text, 10);
        let b = chunk_text(text, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("x"), content_hash("x"));
        assert_ne!(content_hash("x"), content_hash("y"));
        assert_eq!(content_hash("x").len(), 64);
    }
}
