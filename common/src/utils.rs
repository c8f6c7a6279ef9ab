use anyhow::Result;
use bytes::Bytes;

/// Decodes a byte buffer as UTF-8, failing on invalid input.
pub fn string_from_bytes(bytes: Bytes) -> Result<String> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Splits a command line on single spaces.
///
/// A missing or blank command line yields no arguments.
pub fn split_args(command_line: Option<&str>) -> Vec<String> {
    match command_line {
        Some(line) if !line.trim().is_empty() => line.split(' ').map(str::to_string).collect(),
        _ => vec![],
    }
}

/// Returns `true` when the string is absent or contains only whitespace.
pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_args() {
        assert_eq!(split_args(Some("cli args")), vec!["cli", "args"]);
        assert!(split_args(None).is_empty());
        assert!(split_args(Some("  ")).is_empty());
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(None));
        assert!(is_blank(Some("")));
        assert!(is_blank(Some(" \t")));
        assert!(!is_blank(Some("k")));
    }
}
