//! Position and location utilities.
//!
//! Diagnostics are printed with line/column positions, while the AST and
//! spans use byte offsets. This module provides conversion utilities.

/// A position in a source file (0-indexed line, 0-indexed column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    /// 0-indexed line number
    pub line: u32,
    /// 0-indexed column in bytes from the line start
    pub column: u32,
}

impl Position {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Source location with both offset and line/column info, as carried on
/// diagnostic records.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceLocation {
    /// File path the location points into
    pub file: String,
    /// 0-indexed line number
    pub line: u32,
    /// 0-indexed column
    pub column: u32,
    /// Byte offset from start of file
    pub start: u32,
    /// Length of the highlighted region in bytes
    pub length: u32,
}

/// Line map for efficient offset -> position conversion.
/// Stores the starting offset of each line.
#[derive(Debug, Clone)]
pub struct LineMap {
    /// Starting offset of each line (`line_starts[0]` is always 0)
    line_starts: Vec<u32>,
}

impl LineMap {
    /// Build a line map from source text.
    #[must_use]
    pub fn build(source: &str) -> Self {
        let mut line_starts = vec![0u32];

        for (i, ch) in source.char_indices() {
            if ch == '\n' {
                line_starts.push(u32::try_from(i + 1).unwrap_or(u32::MAX));
            } else if ch == '\r' {
                let next_idx = i + 1;
                if source.as_bytes().get(next_idx) != Some(&b'\n') {
                    // Lone \r is a line ending; \r\n is handled by the \n arm.
                    line_starts.push(u32::try_from(next_idx).unwrap_or(u32::MAX));
                }
            }
        }

        Self { line_starts }
    }

    /// Convert a byte offset to a Position (line, column).
    #[must_use]
    pub fn offset_to_position(&self, offset: u32) -> Position {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insert_point) => insert_point.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line).copied().unwrap_or(0);

        Position {
            line: u32::try_from(line).unwrap_or(u32::MAX),
            column: offset.saturating_sub(line_start),
        }
    }

    /// Get the full text of the line containing `offset`.
    #[must_use]
    pub fn line_text<'a>(&self, offset: u32, source: &'a str) -> &'a str {
        let line = self.offset_to_position(offset).line as usize;
        let start = self.line_starts.get(line).copied().unwrap_or(0) as usize;
        let end = self
            .line_starts
            .get(line + 1)
            .map_or(source.len(), |&next| next as usize);
        source
            .get(start.min(source.len())..end.min(source.len()))
            .unwrap_or("")
            .trim_end_matches(['\n', '\r'])
    }

    /// Get the number of lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Get the starting offset of a line.
    #[must_use]
    pub fn line_start(&self, line: usize) -> Option<u32> {
        self.line_starts.get(line).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_offsets_across_lines() {
        let map = LineMap::build("let a = 1;\nlet b = 2;\n");
        assert_eq!(map.offset_to_position(0), Position::new(0, 0));
        assert_eq!(map.offset_to_position(4), Position::new(0, 4));
        assert_eq!(map.offset_to_position(11), Position::new(1, 0));
        assert_eq!(map.offset_to_position(15), Position::new(1, 4));
        assert_eq!(map.line_count(), 3);
    }

    #[test]
    fn handles_crlf_and_lone_cr() {
        let map = LineMap::build("a\r\nb\rc");
        assert_eq!(map.offset_to_position(3), Position::new(1, 0));
        assert_eq!(map.offset_to_position(5), Position::new(2, 0));
    }

    #[test]
    fn line_text_strips_terminator() {
        let src = "first\nsecond\n";
        let map = LineMap::build(src);
        assert_eq!(map.line_text(0, src), "first");
        assert_eq!(map.line_text(8, src), "second");
    }
}
