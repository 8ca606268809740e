// src/motion/script.rs - Plain-text move lists
//!
//! One relative move per line, step counts separated by whitespace or commas:
//!
//! ```text
//! # x     y
//! 1000, 4000
//! -500    0
//! 250            # missing axes do not move
//! ```

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("line {line}: invalid step count '{token}'")]
    BadNumber { line: usize, token: String },
    #[error("line {line}: {found} values for {axes} axes")]
    TooManyValues { line: usize, found: usize, axes: usize },
}

/// Parse a move list for `axes` axes. Line numbers in errors start at 1.
pub fn parse_moves(text: &str, axes: usize) -> Result<Vec<Vec<i64>>, ScriptError> {
    let mut moves = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let content = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };

        let mut steps = Vec::with_capacity(axes);
        for token in content.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
            let value = token.parse::<i64>().map_err(|_| ScriptError::BadNumber {
                line,
                token: token.to_string(),
            })?;
            steps.push(value);
        }

        if steps.is_empty() {
            continue;
        }
        if steps.len() > axes {
            return Err(ScriptError::TooManyValues { line, found: steps.len(), axes });
        }
        steps.resize(axes, 0);
        moves.push(steps);
    }

    tracing::debug!("parsed {} moves", moves.len());
    Ok(moves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_separators() {
        let text = "# header\n1000, 4000\n\n-500 0\n250   # short\n";
        let moves = parse_moves(text, 2).unwrap();
        assert_eq!(moves, vec![vec![1000, 4000], vec![-500, 0], vec![250, 0]]);
    }

    #[test]
    fn test_too_many_values() {
        let err = parse_moves("1 2\n1 2 3\n", 2).unwrap_err();
        assert_eq!(err, ScriptError::TooManyValues { line: 2, found: 3, axes: 2 });
    }

    #[test]
    fn test_bad_number() {
        let err = parse_moves("10, x1\n", 2).unwrap_err();
        assert_eq!(err, ScriptError::BadNumber { line: 1, token: "x1".to_string() });
    }

    #[test]
    fn test_empty_script() {
        assert!(parse_moves("\n  # nothing\n", 3).unwrap().is_empty());
    }
}
