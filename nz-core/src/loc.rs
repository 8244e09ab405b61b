//! Source locations and line/column translation.

use std::fmt;

/// Byte position in a source file.
pub type Pos = u32;

/// Half-open `[start, end)` byte range into one source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Loc {
    pub start: Pos,
    pub end: Pos,
}

impl Loc {
    pub const ZERO: Loc = Loc { start: 0, end: 0 };

    pub fn new(start: Pos, end: Pos) -> Self {
        Loc { start, end }
    }

    pub fn single_char(start: Pos) -> Self {
        Loc {
            start,
            end: start + 1,
        }
    }

    /// Smallest range covering both `self` and `other`.
    pub fn to(self, other: Loc) -> Loc {
        Loc {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineColumn {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for LineColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineColumnLoc {
    pub start: LineColumn,
    pub end: LineColumn,
}

impl fmt::Display for LineColumnLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Maps byte offsets of one text to lines and columns.
#[derive(Debug, Clone)]
pub struct LineIndex {
    // Byte offset of the first character of every line.
    line_starts: Vec<Pos>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (pos, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(pos as Pos + 1);
            }
        }
        LineIndex { line_starts }
    }

    pub fn line_column(&self, pos: Pos) -> LineColumn {
        let line = match self.line_starts.binary_search(&pos) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        LineColumn {
            line: line as u32 + 1,
            column: pos - self.line_starts[line] + 1,
        }
    }

    pub fn line(&self, pos: Pos) -> u32 {
        self.line_column(pos).line
    }

    pub fn translate(&self, loc: Loc) -> LineColumnLoc {
        LineColumnLoc {
            start: self.line_column(loc.start),
            end: self.line_column(loc.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_offsets_to_lines_and_columns() {
        let index = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(index.line_column(0), LineColumn { line: 1, column: 1 });
        assert_eq!(index.line_column(2), LineColumn { line: 1, column: 3 });
        assert_eq!(index.line_column(3), LineColumn { line: 2, column: 1 });
        assert_eq!(index.line_column(7), LineColumn { line: 4, column: 1 });
        assert_eq!(index.line(8), 4);
    }

    #[test]
    fn formats_ranges() {
        let index = LineIndex::new("fun\n\tbody");
        let range = index.translate(Loc::new(5, 9));
        assert_eq!(range.to_string(), "2:2-2:6");
    }
}
