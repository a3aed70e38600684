/// Byte offset to line/column translation for one source text.
#[derive(Debug, Clone)]
pub struct SourceMap {
    /// Offset of the first byte of every line.
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { line_starts }
    }

    /// 1-based line containing `offset`. A newline belongs to the line it ends.
    pub fn line_of(&self, offset: usize) -> u32 {
        self.line_starts.partition_point(|&start| start <= offset).max(1) as u32
    }

    /// (line, col), both 1-based. Columns count bytes.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = self.line_of(offset) as usize;
        (line, offset - self.line_starts[line - 1] + 1)
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Text of a 1-based line without its terminator; empty when out of range.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return "";
        };
        let end = self.line_starts.get(line).map_or(source.len(), |&next| next);
        source[start..end].trim_end_matches(['\n', '\r'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_and_columns() {
        let src = "let a = 1;\nprint a;\n\nprint a + 1;";
        let sm = SourceMap::new(src);
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.lookup(4), (1, 5));
        assert_eq!(sm.lookup(10), (1, 11)); // the newline itself
        assert_eq!(sm.lookup(11), (2, 1));
        assert_eq!(sm.line_of(20), 3);
        assert_eq!(sm.line_of(21), 4);
        assert_eq!(sm.line_count(), 4);
    }

    #[test]
    fn line_text_strips_terminators() {
        let src = "first\r\nsecond\nthird";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 1), "first");
        assert_eq!(sm.line_text(src, 2), "second");
        assert_eq!(sm.line_text(src, 3), "third");
        assert_eq!(sm.line_text(src, 0), "");
        assert_eq!(sm.line_text(src, 4), "");
    }

    #[test]
    fn empty_and_trailing_newline() {
        let sm = SourceMap::new("");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.line_text("", 1), "");

        let src = "x\n";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_count(), 2);
        assert_eq!(sm.line_of(2), 2);
        assert_eq!(sm.line_text(src, 2), "");
    }
}
