//! Glob patterns over backend-relative paths.
//!
//! Patterns are compiled into an anchored [`Regex`]:
//!
//! - `*` matches any run of characters within one path segment
//! - `**` as a whole segment matches zero or more segments
//! - `?` matches one character other than `/`
//! - `[abc]`, `[a-z]`, `[!a]` / `[^a]` character classes
//! - `{a,b}` alternatives
//! - `\` escapes the next character
//!
//! Matching is case-sensitive and always against the full path relative to
//! the adapter root, never just the base name.

use regex::Regex;

use crate::{file_info::segment_count, FsError, FsResult};

const META_CHARS: &[char] = &['*', '?', '[', '{', '\\'];

/// Split a pattern into its literal directory prefix and the glob remainder.
///
/// The prefix ends at the last `/` before the first meta character. A pattern
/// without meta characters is returned whole as the prefix with an empty
/// remainder.
///
/// ```
/// use artifact_fs::glob::split_pattern;
///
/// assert_eq!(split_pattern("logs/**/*.json"), ("logs", "**/*.json"));
/// assert_eq!(split_pattern("*.json"), ("", "*.json"));
/// assert_eq!(split_pattern("logs/a.json"), ("logs/a.json", ""));
/// ```
pub fn split_pattern(pattern: &str) -> (&str, &str) {
    let Some(first_meta) = pattern.find(META_CHARS) else {
        return (pattern, "");
    };
    match pattern[..first_meta].rfind('/') {
        Some(0) => ("/", &pattern[1..]),
        Some(sep) => (&pattern[..sep], &pattern[sep + 1..]),
        None => ("", pattern),
    }
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    recursive: bool,
    segments: usize,
}

impl Pattern {
    pub fn new(pattern: &str) -> FsResult<Self> {
        let (expr, recursive) = translate(pattern)?;
        let regex = Regex::new(&expr).map_err(|e| invalid(pattern, e.to_string()))?;
        Ok(Self {
            regex,
            recursive,
            segments: segment_count(pattern),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Whether the pattern contains a `**` segment.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Deepest path (in segments) that can match, or `None` for `**` patterns.
    pub fn max_depth(&self) -> Option<usize> {
        (!self.recursive).then_some(self.segments)
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> FsError {
    FsError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

fn push_literal(expr: &mut String, c: char) {
    let mut buf = [0u8; 4];
    expr.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn translate(pattern: &str) -> FsResult<(String, bool)> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    let mut recursive = false;
    let mut braces = 0usize;
    let mut i = 0;

    expr.push('^');
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let segment_start = i == 0 || chars[i - 1] == '/';
                let segment_end = i + 2 == chars.len() || chars[i + 2] == '/';
                if !(segment_start && segment_end) {
                    // `**` inside a segment is just a wider `*`.
                    expr.push_str("[^/]*");
                    i += 2;
                    continue;
                }
                recursive = true;
                if i + 2 == chars.len() {
                    // trailing `/**` also matches the directory itself
                    if expr.ends_with('/') {
                        expr.pop();
                        expr.push_str("(?:/.*)?");
                    } else {
                        expr.push_str(".*");
                    }
                    i += 2;
                } else {
                    expr.push_str("(?:[^/]*/)*");
                    i += 3;
                }
            }
            '*' => {
                expr.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                expr.push_str("[^/]");
                i += 1;
            }
            '[' => {
                i = translate_class(pattern, &chars, i, &mut expr)?;
            }
            '{' => {
                braces += 1;
                expr.push_str("(?:");
                i += 1;
            }
            '}' if braces > 0 => {
                braces -= 1;
                expr.push(')');
                i += 1;
            }
            ',' if braces > 0 => {
                expr.push('|');
                i += 1;
            }
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| invalid(pattern, "trailing escape character"))?;
                push_literal(&mut expr, *escaped);
                i += 2;
            }
            c => {
                push_literal(&mut expr, c);
                i += 1;
            }
        }
    }
    if braces > 0 {
        return Err(invalid(pattern, "unclosed '{'"));
    }
    expr.push('$');
    Ok((expr, recursive))
}

/// Translate the class starting at `chars[start] == '['`, returning the index
/// just past its closing `]`.
fn translate_class(pattern: &str, chars: &[char], start: usize, expr: &mut String) -> FsResult<usize> {
    let mut i = start + 1;
    let negated = matches!(chars.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut body = String::new();
    let mut first = true;
    loop {
        let c = *chars
            .get(i)
            .ok_or_else(|| invalid(pattern, "unclosed character class"))?;
        match c {
            // a leading `]` is a literal member
            ']' if !first => break,
            '-' => body.push('-'),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| invalid(pattern, "trailing escape character"))?;
                body.push('\\');
                body.push(*escaped);
                i += 1;
            }
            '[' | ']' | '^' | '&' | '~' => {
                body.push('\\');
                body.push(c);
            }
            c => body.push(c),
        }
        first = false;
        i += 1;
    }

    if negated {
        expr.push_str("[^/");
    } else {
        expr.push('[');
    }
    expr.push_str(&body);
    expr.push(']');
    Ok(i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        Pattern::new(pattern).unwrap().matches(path)
    }

    #[test]
    fn test_split_pattern() {
        assert_eq!(split_pattern("logs/**/*.json"), ("logs", "**/*.json"));
        assert_eq!(split_pattern("a/b/c*.txt"), ("a/b", "c*.txt"));
        assert_eq!(split_pattern("**/*.json"), ("", "**/*.json"));
        assert_eq!(split_pattern("/srv/*.log"), ("/", "srv/*.log"));
        assert_eq!(split_pattern("logs/a.json"), ("logs/a.json", ""));
        assert_eq!(split_pattern(""), ("", ""));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        assert!(matches("a/*.json", "a/f.json"));
        assert!(!matches("a/*.json", "a/x/f.json"));
        assert!(!matches("*.json", "a/f.json"));
        assert!(matches("record-*", "record-1.txt"));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        assert!(matches("a/**/*.json", "a/x/y/f.json"));
        assert!(matches("a/**/*.json", "a/f.json"));
        assert!(!matches("a/**/*.json", "a/f.txt"));
        assert!(matches("**/*.json", "f.json"));
        assert!(matches("**/*.json", "json/flanksource/tech/cloud/aws.json"));
        assert!(!matches("**/*.yaml", "json/flanksource/users/yash.json"));
    }

    #[test]
    fn test_double_star_is_anchored_to_full_path() {
        let pattern = Pattern::new("json/**/users/*.json").unwrap();
        assert!(pattern.matches("json/flanksource/users/aditya.json"));
        assert!(pattern.matches("json/users/aditya.json"));
        assert!(!pattern.matches("json/flanksource/myusers/aditya.json"));
        assert!(!pattern.matches("json/flanksource/projects/mission-control.json"));
        assert!(!pattern.matches("other/json/users/a.json"));
    }

    #[test]
    fn test_trailing_double_star() {
        assert!(matches("logs/**", "logs"));
        assert!(matches("logs/**", "logs/a/b.txt"));
        assert!(!matches("logs/**", "logsx/a"));
        assert!(matches("**", "anything/at/all"));
    }

    #[test]
    fn test_double_star_inside_segment_is_single_star() {
        let pattern = Pattern::new("a/b**.txt").unwrap();
        assert!(!pattern.is_recursive());
        assert!(pattern.matches("a/bcd.txt"));
        assert!(!pattern.matches("a/b/c.txt"));
    }

    #[test]
    fn test_question_classes_and_braces() {
        assert!(matches("file?.txt", "file1.txt"));
        assert!(!matches("file?.txt", "file10.txt"));
        assert!(matches("[a-c].txt", "b.txt"));
        assert!(!matches("[a-c].txt", "d.txt"));
        assert!(matches("[!a-c].txt", "d.txt"));
        assert!(!matches("[!a-c]", "/"));
        assert!(matches("*.{json,yaml}", "third.yaml"));
        assert!(matches("*.{json,yaml}", "first.json"));
        assert!(!matches("*.{json,yaml}", "record-1.txt"));
    }

    #[test]
    fn test_case_sensitive_and_literal_metas() {
        assert!(!matches("*.JSON", "a.json"));
        assert!(matches("a\\*b", "a*b"));
        assert!(!matches("a\\*b", "axb"));
        assert!(matches("v1.0/*.txt", "v1.0/a.txt"));
        assert!(!matches("v1.0/*.txt", "v1x0/a.txt"));
    }

    #[test]
    fn test_malformed_patterns() {
        for pattern in ["[abc", "{a,b", "abc\\", "[!"] {
            let err = Pattern::new(pattern).unwrap_err();
            assert!(
                matches!(err, FsError::InvalidPattern { .. }),
                "{pattern} should be rejected"
            );
        }
    }

    #[test]
    fn test_max_depth() {
        assert_eq!(Pattern::new("a/*/*.json").unwrap().max_depth(), Some(3));
        assert_eq!(Pattern::new("a/**/*.json").unwrap().max_depth(), None);
    }
}
