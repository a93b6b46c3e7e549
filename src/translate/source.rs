use crate::error::TranslateError;

/// One logical line of a routine: physical lines joined across brackets
/// and backslash continuations, with comments and docstrings removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based number of the first physical line
    pub number: usize,
    /// Leading whitespace width, tabs advancing to the next multiple of 8
    pub indent: usize,
    pub text: String,
}

/// Strip documentation and comments, then join continuations
///
/// Bracket depth is tracked across the whole routine. A closing bracket
/// without an opener, or an opener still pending at the end of the
/// source, fails with [TranslateError::UnbalancedBrackets].
pub fn logical_lines(routine: &str, source: &str) -> Result<Vec<LogicalLine>, TranslateError> {
    let unbalanced = |line| TranslateError::UnbalancedBrackets {
        routine: routine.to_string(),
        line,
    };

    let chars: Vec<char> = source.chars().collect();
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start = 1;
    let mut number = 1;
    let mut openers: Vec<usize> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '"' | '\'' => {
                let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                let width = if triple { 3 } else { 1 };
                i += width;
                loop {
                    if i >= chars.len() {
                        return Err(TranslateError::syntax(routine, number, "unterminated string"));
                    }
                    if chars[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if chars[i] == '\n' {
                        if !triple {
                            return Err(TranslateError::syntax(routine, number, "unterminated string"));
                        }
                        number += 1;
                    }
                    if chars[i] == c && (!triple || (i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c)) {
                        i += width;
                        break;
                    }
                    i += 1;
                }
                continue;
            }
            '(' | '[' | '{' => openers.push(number),
            ')' | ']' | '}' => {
                if openers.pop().is_none() {
                    return Err(unbalanced(number));
                }
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                current.push(' ');
                number += 1;
                i += 2;
                continue;
            }
            '\n' => {
                number += 1;
                if openers.is_empty() {
                    push_line(&mut lines, &current, start);
                    current.clear();
                    start = number;
                } else {
                    current.push(' ');
                }
                i += 1;
                continue;
            }
            _ => {}
        }
        current.push(c);
        i += 1;
    }
    if let Some(&line) = openers.first() {
        return Err(unbalanced(line));
    }
    push_line(&mut lines, &current, start);
    Ok(lines)
}

fn push_line(lines: &mut Vec<LogicalLine>, raw: &str, number: usize) {
    let text = raw.trim();
    if text.is_empty() || text.starts_with('@') {
        return;
    }
    let mut indent = 0;
    for c in raw.chars() {
        match c {
            ' ' => indent += 1,
            '\t' => indent = (indent / 8 + 1) * 8,
            _ => break,
        }
    }
    lines.push(LogicalLine {
        number,
        indent,
        text: text.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_docstrings_and_comments() {
        let source = "def f(model):\n    \"\"\"Doc\n    more doc\n    \"\"\"\n    # comment\n    x = 1  # trailing\n";
        let lines = logical_lines("f", source).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "x = 1");
        assert_eq!(lines[1].number, 6);
        assert_eq!(lines[1].indent, 4);
    }

    #[test]
    fn test_joins_bracketed_continuations() {
        let source = "def f(model):\n    x = (a +\n         b) * \\\n        c\n    y = 2\n";
        let lines = logical_lines("f", source).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].number, 2);
        assert!(lines[1].text.starts_with("x = (a +"));
        assert!(lines[1].text.ends_with("c"));
        assert_eq!(lines[2].number, 5);
    }

    #[test]
    fn test_drops_decorators_and_expands_tabs() {
        let lines = logical_lines("f", "@staticmethod\ndef f(model):\n\tpass\n").unwrap();
        assert_eq!(lines[0].text, "def f(model):");
        assert_eq!(lines[1].indent, 8);
    }

    #[test]
    fn test_unbalanced_brackets() {
        let err = logical_lines("calc_q", "def calc_q(model):\n    x = (a + b\n").unwrap_err();
        assert!(matches!(
            err,
            TranslateError::UnbalancedBrackets { line: 2, ref routine } if routine == "calc_q"
        ));

        let err = logical_lines("calc_q", "def calc_q(model):\n    x = a)\n").unwrap_err();
        assert!(matches!(err, TranslateError::UnbalancedBrackets { line: 2, .. }));
    }
}
