//! Fixed-size text splitter with overlap.
//!
//! Splits long text into character windows of at most `chunk_size` chars,
//! with consecutive windows sharing `overlap` chars. A window is pulled back
//! to the last whitespace inside it when possible so words are not cut in
//! half. Boundaries know nothing about paragraphs or sentences.

/// Split `text` into overlapping chunks. Empty or whitespace-only input
/// yields no chunks.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let hard_end = (start + chunk_size).min(chars.len());
        let mut end = hard_end;

        // Pull back to a whitespace boundary, but keep moving past the overlap
        if hard_end < chars.len() {
            if let Some(pos) = chars[start..hard_end]
                .iter()
                .rposition(|c| c.is_whitespace())
            {
                let candidate = start + pos + 1;
                if candidate > start + overlap {
                    end = candidate;
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Split each text independently and concatenate the chunks in input order.
pub fn split_texts<S: AsRef<str>>(texts: &[S], chunk_size: usize, overlap: usize) -> Vec<String> {
    texts
        .iter()
        .flat_map(|t| split_text(t.as_ref(), chunk_size, overlap))
        .collect()
}
