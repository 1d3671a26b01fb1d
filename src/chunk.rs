//! Code-aware source chunker.
//!
//! Splits file content on structural boundaries (function, type, and class
//! definitions) and packs consecutive segments up to a size cap, so each
//! chunk embeds as one coherent unit of code. Segments larger than the cap
//! fall back to fixed-size windows with a bounded overlap. Chunks carry byte
//! offsets into the original content and contiguous 0-based indices.

/// A chunk of source text with its position in the original file.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChunk {
    pub chunk_index: i64,
    pub content: String,
    pub offset_start: usize,
    pub offset_end: usize,
}

/// Line prefixes (after leading whitespace) that start a new structural
/// segment. Covers the languages the scanner admits.
const BOUNDARY_PREFIXES: &[&str] = &[
    "fn ",
    "pub fn ",
    "pub(crate) fn ",
    "async fn ",
    "pub async fn ",
    "impl ",
    "struct ",
    "pub struct ",
    "enum ",
    "pub enum ",
    "trait ",
    "pub trait ",
    "mod ",
    "pub mod ",
    "def ",
    "async def ",
    "class ",
    "function ",
    "async function ",
    "export ",
    "func ",
    "type ",
    "interface ",
    "const ",
    "static ",
];

fn is_boundary_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    BOUNDARY_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Split `text` into chunks of at most `max_chars` bytes of content.
/// `overlap_chars` applies only when a single segment exceeds the cap and
/// must be windowed. Every byte of the input is covered by exactly one
/// chunk, except the overlapping tail bytes of fallback windows.
pub fn chunk_source(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<CodeChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let segments = split_segments(text);

    let mut chunks: Vec<CodeChunk> = Vec::new();
    let mut buf_start: usize = 0;
    let mut buf_end: usize = 0;

    let mut flush = |chunks: &mut Vec<CodeChunk>, start: usize, end: usize| {
        let content = &text[start..end];
        if content.trim().is_empty() {
            return;
        }
        chunks.push(CodeChunk {
            chunk_index: chunks.len() as i64,
            content: content.to_string(),
            offset_start: start,
            offset_end: end,
        });
    };

    for (seg_start, seg_end) in segments {
        let seg_len = seg_end - seg_start;

        if seg_len > max_chars {
            // Oversized segment: flush the buffer, then window it.
            if buf_end > buf_start {
                flush(&mut chunks, buf_start, buf_end);
            }
            for (win_start, win_end) in windows(text, seg_start, seg_end, max_chars, overlap_chars)
            {
                flush(&mut chunks, win_start, win_end);
            }
            buf_start = seg_end;
            buf_end = seg_end;
            continue;
        }

        if buf_end > buf_start && (seg_end - buf_start) > max_chars {
            flush(&mut chunks, buf_start, buf_end);
            buf_start = seg_start;
        }
        if buf_end == buf_start {
            buf_start = seg_start;
        }
        buf_end = seg_end;
    }

    if buf_end > buf_start {
        flush(&mut chunks, buf_start, buf_end);
    }

    chunks
}

/// Byte ranges of structural segments. Consecutive lines between boundary
/// lines form one segment; the file prelude before the first boundary is
/// its own segment.
fn split_segments(text: &str) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut seg_start = 0usize;
    let mut pos = 0usize;

    for line in text.split_inclusive('\n') {
        if pos > seg_start && is_boundary_line(line) {
            segments.push((seg_start, pos));
            seg_start = pos;
        }
        pos += line.len();
    }
    if pos > seg_start {
        segments.push((seg_start, pos));
    }
    segments
}

/// Fixed-size windows over an oversized segment, preferring to break at a
/// line or space boundary, with `overlap` bytes carried between windows.
fn windows(
    text: &str,
    start: usize,
    end: usize,
    max_chars: usize,
    overlap: usize,
) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let step = max_chars.saturating_sub(overlap).max(1);
    let mut win_start = start;

    while win_start < end {
        let hard_end = (win_start + max_chars).min(end);
        let win_end = if hard_end < end {
            let slice = &text[win_start..hard_end];
            slice
                .rfind('\n')
                .or_else(|| slice.rfind(' '))
                .map(|p| win_start + p + 1)
                .unwrap_or_else(|| floor_char_boundary(text, hard_end))
        } else {
            hard_end
        };

        out.push((win_start, win_end));
        if win_end >= end {
            break;
        }
        let next = floor_char_boundary(text, win_start + step.min(win_end - win_start).max(1));
        win_start = next.max(win_start + 1).min(win_end);
    }
    out
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_source("", 1600, 200).is_empty());
        assert!(chunk_source("   \n\n  ", 1600, 200).is_empty());
    }

    #[test]
    fn test_small_file_single_chunk() {
        let src = "fn main() {\n    println!(\"hi\");\n}\n";
        let chunks = chunk_source(src, 1600, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].offset_start, 0);
        assert_eq!(chunks[0].offset_end, src.len());
        assert_eq!(chunks[0].content, src);
    }

    #[test]
    fn test_splits_on_function_boundaries() {
        let f1 = format!("def first():\n{}\n", "    x = 1\n".repeat(10));
        let f2 = format!("def second():\n{}\n", "    y = 2\n".repeat(10));
        let src = format!("{f1}{f2}");
        // Cap small enough that both functions cannot share a chunk.
        let chunks = chunk_source(&src, f1.len() + 10, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with("def first"));
        assert!(chunks[1].content.starts_with("def second"));
    }

    #[test]
    fn test_packs_small_segments_together() {
        let src = "def a():\n    pass\n\ndef b():\n    pass\n\ndef c():\n    pass\n";
        let chunks = chunk_source(src, 1600, 200);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("def a"));
        assert!(chunks[0].content.contains("def c"));
    }

    #[test]
    fn test_indices_contiguous_and_offsets_ordered() {
        let src = (0..40)
            .map(|i| format!("fn item_{i}() {{\n    let v = {i};\n}}\n"))
            .collect::<String>();
        let chunks = chunk_source(&src, 120, 20);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.offset_end > c.offset_start);
            assert_eq!(&src[c.offset_start..c.offset_end], c.content);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].offset_start >= pair[0].offset_start);
        }
    }

    #[test]
    fn test_oversized_segment_windows_respect_cap() {
        // One giant function body with no inner boundaries.
        let body = "    value += 1;\n".repeat(200);
        let src = format!("fn huge() {{\n{body}}}\n");
        let chunks = chunk_source(&src, 300, 50);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.len() <= 300, "chunk of {} bytes", c.content.len());
        }
        // Windows must cover the full segment.
        assert_eq!(chunks[0].offset_start, 0);
        assert_eq!(chunks.last().unwrap().offset_end, src.len());
    }

    #[test]
    fn test_non_overlapping_cover_for_structural_chunks() {
        let src = (0..10)
            .map(|i| format!("def f{i}():\n    return {i}\n"))
            .collect::<String>();
        let chunks = chunk_source(&src, 60, 10);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].offset_end, pair[1].offset_start);
        }
    }

    #[test]
    fn test_deterministic() {
        let src = "class A:\n    pass\n\nclass B:\n    pass\n";
        assert_eq!(chunk_source(src, 30, 5), chunk_source(src, 30, 5));
    }
}
