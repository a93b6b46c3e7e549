/// Indented source lines under construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lines {
    lines: Vec<String>,
}

const INDENT: &str = "    ";

impl Lines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `text` at the given indentation level; multi-line text is indented line by line
    pub fn add(&mut self, indent: usize, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            if line.is_empty() {
                self.lines.push(String::new());
            } else {
                self.lines.push(format!("{}{}", INDENT.repeat(indent), line));
            }
        }
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    /// Append `other`, shifted by `indent` levels
    pub fn extend(&mut self, indent: usize, other: Lines) {
        for line in other.lines {
            if line.is_empty() {
                self.blank();
            } else {
                self.add(indent, line);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indentation() {
        let mut inner = Lines::new();
        inner.add(0, "self.idx_sim = idx;");
        inner.blank();
        inner.add(0, "Ok(())");

        let mut lines = Lines::new();
        lines.add(0, "fn do_it(&mut self, idx: usize) -> io::Result<()> {");
        lines.extend(1, inner);
        lines.add(0, "}");

        assert_eq!(
            lines.render(),
            "fn do_it(&mut self, idx: usize) -> io::Result<()> {\n    self.idx_sim = idx;\n\n    Ok(())\n}\n"
        );
        assert_eq!(lines.len(), 5);
    }
}
