/// Overlapping window parameters for text chunking.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 100,
        }
    }
}

/// Split text into overlapping windows of up to `chunk_size` characters with
/// `overlap` characters shared between consecutive chunks.
///
/// For windows that do not reach the end of the text, the cut is pulled back
/// to the nearest sentence terminator (`.` or newline) when one exists past
/// the window midpoint, so the common case does not split mid-sentence. The
/// start position advances by `chunk_len - overlap` with a floor of 1, and an
/// iteration cap bounds the loop against any boundary-search edge case that
/// would otherwise stall progress.
pub fn chunk_text(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return Vec::new();
    }
    let chunk_size = cfg.chunk_size.max(2);
    let overlap = cfg.overlap.min(chunk_size - 1);
    // A boundary cut can shrink a window down to just past the midpoint, so
    // the smallest advance a continuing iteration can make is
    // chunk_size/2 + 2 - overlap (floor 1). The cap is sized from that, not
    // from the full stride, so sentence-rich text still reaches the end.
    let min_advance = (chunk_size / 2 + 2).saturating_sub(overlap).max(1);
    let max_iters = len.div_ceil(min_advance) + 8;

    let mut out = Vec::new();
    let mut start = 0usize;
    let mut iters = 0usize;
    while start < len && iters < max_iters {
        iters += 1;
        let mut end = (start + chunk_size).min(len);
        if end < len {
            if let Some(cut) = (start..end).rev().find(|&i| chars[i] == '.' || chars[i] == '\n') {
                if cut > start + chunk_size / 2 {
                    end = cut + 1;
                }
            }
        }
        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            out.push(piece);
        }
        if end >= len {
            break;
        }
        start += (end - start).saturating_sub(overlap).max(1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
        }
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("hello world", &ChunkingConfig::default());
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn empty_and_whitespace_emit_nothing() {
        assert!(chunk_text("", &ChunkingConfig::default()).is_empty());
        assert!(chunk_text("   \n\t  ", &ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn plain_text_2300_chars_yields_three_overlapping_chunks() {
        // No sentence terminators, so cuts land at the raw window edges.
        let text = "a".repeat(2300);
        let chunks = chunk_text(&text, &cfg(1000, 100));
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks[1].chars().count(), 1000);
        assert_eq!(chunks[2].chars().count(), 500);
    }

    #[test]
    fn consecutive_chunks_share_the_overlap() {
        // Distinct characters let us verify the tail of one chunk is the
        // head of the next.
        let text: String = (0..2300u32)
            .map(|i| char::from_u32('a' as u32 + (i % 26)).unwrap())
            .collect();
        let chunks = chunk_text(&text, &cfg(1000, 100));
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].chars().collect();
            let next: Vec<char> = pair[1].chars().collect();
            let tail: String = prev[prev.len() - 100..].iter().collect();
            let head: String = next[..100].iter().collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn prefers_sentence_boundary_past_the_midpoint() {
        // A period at position 800 of a 1000-char window is past the midpoint
        // and becomes the cut; the chunk ends right after it.
        let mut text = "x".repeat(800);
        text.push('.');
        text.push_str(&"y".repeat(700));
        let chunks = chunk_text(&text, &cfg(1000, 100));
        assert_eq!(chunks[0].chars().count(), 801);
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn early_boundary_is_ignored() {
        // A period before the midpoint must not shrink the window below half.
        let mut text = "x".repeat(300);
        text.push('.');
        text.push_str(&"y".repeat(1200));
        let chunks = chunk_text(&text, &cfg(1000, 100));
        assert_eq!(chunks[0].chars().count(), 1000);
    }

    #[test]
    fn sentence_rich_text_is_chunked_to_the_very_end() {
        // Every block ends in a period just past the window midpoint, so the
        // boundary rule fires on each window and advances fall well short of
        // the raw stride. The loop must still cover the whole text rather
        // than run out of iterations with the tail unchunked.
        let mut text = String::new();
        for _ in 0..36 {
            text.push_str(&"x".repeat(501));
            text.push('.');
        }
        text.push_str("closing remarks");
        let chunks = chunk_text(&text, &cfg(1000, 100));
        assert!(
            chunks.last().unwrap().ends_with("closing remarks"),
            "tail of the text was dropped: {} chunks for {} chars",
            chunks.len(),
            text.chars().count()
        );
        // All interior cuts landed on a sentence terminator.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('.'));
        }
    }

    #[test]
    fn progress_is_guaranteed_with_degenerate_overlap() {
        // overlap >= chunk_size would stall; the clamp and the floor of 1
        // keep the loop moving and the iteration cap bounds it regardless.
        let text = "z".repeat(50);
        let chunks = chunk_text(&text, &cfg(10, 10));
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 60);
    }

    #[test]
    fn newline_counts_as_a_boundary() {
        let mut text = "x".repeat(900);
        text.push('\n');
        text.push_str(&"y".repeat(600));
        let chunks = chunk_text(&text, &cfg(1000, 100));
        assert_eq!(chunks[0].chars().count(), 901);
    }
}
