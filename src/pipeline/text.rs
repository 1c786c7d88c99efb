//! Char-offset helpers.
//!
//! Stored offsets are Unicode scalar (char) offsets while `regex` and
//! `str::find` report byte offsets. `CharIndex` converts between the two
//! and derives 1-based line/column positions.

/// Precomputed char boundaries and line starts for one text.
pub struct CharIndex<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    char_bytes: Vec<usize>,
    /// Char offsets at which each line begins.
    line_starts: Vec<usize>,
}

impl<'a> CharIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut char_bytes = Vec::with_capacity(text.len() + 1);
        let mut line_starts = vec![0];
        for (char_pos, (byte, ch)) in text.char_indices().enumerate() {
            char_bytes.push(byte);
            if ch == '\n' {
                line_starts.push(char_pos + 1);
            }
        }
        char_bytes.push(text.len());
        Self {
            text,
            char_bytes,
            line_starts,
        }
    }

    pub fn char_len(&self) -> usize {
        self.char_bytes.len() - 1
    }

    /// Char offset for a byte offset on a char boundary.
    pub fn char_at_byte(&self, byte: usize) -> usize {
        match self.char_bytes.binary_search(&byte) {
            Ok(pos) => pos,
            Err(pos) => pos.saturating_sub(1),
        }
    }

    pub fn byte_at_char(&self, char_pos: usize) -> usize {
        self.char_bytes[char_pos.min(self.char_len())]
    }

    /// 1-based line containing `char_pos`.
    pub fn line_of(&self, char_pos: usize) -> usize {
        match self.line_starts.binary_search(&char_pos) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// 1-based column of `char_pos` within its line.
    pub fn column_of(&self, char_pos: usize) -> usize {
        let line = self.line_of(char_pos);
        char_pos - self.line_starts[line - 1] + 1
    }

    /// Slice by char range, clamped to the text.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        let start = start.min(self.char_len());
        let end = end.clamp(start, self.char_len());
        &self.text[self.byte_at_char(start)..self.byte_at_char(end)]
    }

    /// Char offsets of every occurrence of `needle`.
    pub fn find_all(&self, needle: &str) -> Vec<usize> {
        if needle.is_empty() {
            return Vec::new();
        }
        self.text
            .match_indices(needle)
            .map(|(byte, _)| self.char_at_byte(byte))
            .collect()
    }
}

/// Slice `text` by char range without building an index.
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    CharIndex::new(text).slice(start, end)
}
