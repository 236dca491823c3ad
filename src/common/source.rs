/// A byte-offset span in source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// A span for synthesized tokens/nodes that have no source text.
    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A human-readable source location.
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Maps byte-offset spans of one compilation unit back to file/line/column
/// and to source-line text for diagnostic snippets.
///
/// The compiler consumes one fully-expanded token sequence per run, so a
/// single file with a precomputed line-offset table is all that is needed;
/// spans resolve by binary search over the line starts.
#[derive(Debug)]
pub struct SourceMap {
    name: String,
    content: String,
    /// Byte offset of the start of each line, in ascending order.
    line_offsets: Vec<u32>,
}

impl SourceMap {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let mut line_offsets = vec![0u32];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                line_offsets.push(i as u32 + 1);
            }
        }
        Self {
            name: name.into(),
            content,
            line_offsets,
        }
    }

    pub fn filename(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Resolve a span's start offset to a 1-based line and column.
    pub fn resolve(&self, span: Span) -> SourceLocation {
        let offset = span.start.min(self.content.len() as u32);
        let line_idx = match self.line_offsets.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        SourceLocation {
            file: self.name.clone(),
            line: line_idx as u32 + 1,
            column: offset - self.line_offsets[line_idx] + 1,
        }
    }

    /// The full text of the line a span starts on, without the trailing
    /// newline. Used for diagnostic snippets.
    pub fn line_text(&self, span: Span) -> Option<&str> {
        let offset = span.start as usize;
        if offset > self.content.len() {
            return None;
        }
        let start = self.content[..offset].rfind('\n').map_or(0, |i| i + 1);
        let end = self.content[offset..]
            .find('\n')
            .map_or(self.content.len(), |i| offset + i);
        Some(&self.content[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_line_and_column() {
        let sm = SourceMap::new("t.c", "int x;\nint y;\n");
        let loc = sm.resolve(Span::new(11, 12)); // the 'y'
        assert_eq!(loc.line, 2);
        assert_eq!(loc.column, 5);
        assert_eq!(loc.file, "t.c");
    }

    #[test]
    fn line_text_strips_newline() {
        let sm = SourceMap::new("t.c", "int x;\nint y;\n");
        assert_eq!(sm.line_text(Span::new(11, 12)), Some("int y;"));
        assert_eq!(sm.line_text(Span::new(0, 3)), Some("int x;"));
    }

    #[test]
    fn merge_covers_both_spans() {
        let a = Span::new(4, 6);
        let b = Span::new(1, 5);
        assert_eq!(a.merge(b), Span::new(1, 6));
    }
}
