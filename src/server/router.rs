//! Path Patterns
//!
//! Route patterns with named and positional captures. A pattern such as
//! `/users/:id` or `/api/*` is compiled once into a regular expression and
//! then tested against request paths; captured values can be filled back
//! into a target template like `http://localhost:9000/users/:id`.
//!
//! Supported syntax:
//! - `:name` named segment (`[^/]+?`), `:name(\d+)` with a custom pattern
//! - `(regex)` unnamed group and `*` wildcard, keyed by position
//! - `?`, `*` and `+` modifiers after a parameter
//! - `\` escapes the next character
//!
//! Matching is case-insensitive, anchored, and allows one trailing slash.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Default pattern for a parameter without a custom group
const DEFAULT_SEGMENT: &str = "[^/]+?";

/// Escaped when a positional capture is filled into a template
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Escaped when a named capture is filled into a template
const SEGMENT: &AsciiSet = &PATH.add(b'/');

/// Same sets for captures that are still percent-encoded
const PATH_RAW: &AsciiSet = &PATH.remove(b'%');
const SEGMENT_RAW: &AsciiSet = &SEGMENT.remove(b'%');

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("unbalanced group at offset {offset} in pattern '{pattern}'")]
    UnbalancedGroup { pattern: String, offset: usize },
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// Identifies a capture group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// `:name` parameter
    Named(String),
    /// Unnamed `(group)` or `*`, numbered from zero
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Named(name) => write!(f, ":{}", name),
            Key::Index(index) => write!(f, "{}", index),
        }
    }
}

#[derive(Debug)]
enum Token {
    Literal(String),
    Param(Param),
}

#[derive(Debug)]
struct Param {
    key: Key,
    prefix: Option<char>,
    pattern: String,
    optional: bool,
    repeat: bool,
}

/// A compiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    keys: Vec<Key>,
}

impl PathPattern {
    /// Compile a pattern string
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let mut tokens = tokenize(pattern)?;

        // Non-strict mode: a trailing delimiter becomes optional
        if let Some(Token::Literal(last)) = tokens.last_mut() {
            if last.ends_with('/') {
                last.pop();
            }
        }

        let mut source = String::from("(?i)^");
        let mut keys = Vec::new();

        for token in &tokens {
            match token {
                Token::Literal(text) => source.push_str(&regex::escape(text)),
                Token::Param(param) => {
                    let group = format!("p{}", keys.len());
                    let prefix = param
                        .prefix
                        .map(|c| regex::escape(&c.to_string()))
                        .unwrap_or_default();

                    let capture = if param.repeat {
                        format!(
                            "(?P<{group}>(?:{pat})(?:{prefix}(?:{pat}))*)",
                            group = group,
                            pat = param.pattern,
                            prefix = prefix
                        )
                    } else {
                        format!("(?P<{}>(?:{}))", group, param.pattern)
                    };

                    if param.prefix.is_some() {
                        source.push_str(&format!("(?:{}{})", prefix, capture));
                    } else {
                        source.push_str(&capture);
                    }
                    if param.optional {
                        source.push('?');
                    }

                    keys.push(param.key.clone());
                }
            }
        }

        source.push_str("/?$");

        let regex = Regex::new(&source).map_err(|e| PatternError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            keys,
        })
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Capture keys in left-to-right order
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Check whether a path matches, ignoring captured values
    pub fn test(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Positional captures for a matching path
    pub fn match_path(&self, path: &str) -> Option<Vec<String>> {
        self.exec(path).map(|captures| captures.positional())
    }

    /// Match a path and extract every capture, keyed and in order.
    ///
    /// Values are percent-decoded; a value that does not decode to UTF-8
    /// is kept as it appeared in the path.
    pub fn exec(&self, path: &str) -> Option<Captures> {
        let caps = self.regex.captures(path)?;

        let entries = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let (value, raw) = match caps.name(&format!("p{}", i)) {
                    Some(m) => match percent_decode_str(m.as_str()).decode_utf8() {
                        Ok(decoded) => (Some(decoded.into_owned()), false),
                        Err(_) => (Some(m.as_str().to_string()), true),
                    },
                    None => (None, false),
                };
                Entry {
                    key: key.clone(),
                    value,
                    raw,
                }
            })
            .collect();

        Some(Captures { entries })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Values captured by a successful match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: Key,
    value: Option<String>,
    /// Still percent-encoded
    raw: bool,
}

impl Captures {
    /// Number of capture groups in the pattern
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value of a named capture; `None` if absent or not part of the pattern
    pub fn get(&self, name: &str) -> Option<&str> {
        self.named_entry(name).and_then(|e| e.value.as_deref())
    }

    /// Whether the pattern declares this named capture
    pub fn has_key(&self, name: &str) -> bool {
        self.named_entry(name).is_some()
    }

    /// Value at a zero-based position
    pub fn nth(&self, index: usize) -> Option<&str> {
        self.entries.get(index).and_then(|e| e.value.as_deref())
    }

    /// All captures in order, with absent optional groups as empty strings
    pub fn positional(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.value.clone().unwrap_or_default())
            .collect()
    }

    /// Named captures that matched
    pub fn named(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .filter_map(|e| match (&e.key, &e.value) {
                (Key::Named(name), Some(v)) => Some((name.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }

    fn named_entry(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| matches!(&e.key, Key::Named(n) if n == name))
    }
}

/// Escape a captured value for a template position
fn encode(entry: &Entry, set: &'static AsciiSet, raw_set: &'static AsciiSet) -> String {
    match &entry.value {
        Some(v) if entry.raw => utf8_percent_encode(v, raw_set).to_string(),
        Some(v) => utf8_percent_encode(v, set).to_string(),
        None => String::new(),
    }
}

/// Result of filling a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filled {
    /// Template text with every placeholder substituted
    pub value: String,
    /// Placeholders that had no corresponding capture
    pub unresolved: Vec<String>,
}

impl Filled {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Substitute captures into a template.
///
/// `:name` takes the named capture (segment-escaped) and `$N` the 1-based
/// positional capture (path-escaped). A placeholder name must start with
/// a letter or `_`, so `host:8080` is left alone. Optional captures that
/// did not participate fill as empty strings; placeholders with no capture
/// at all also fill as empty strings and are reported in `unresolved`.
/// Captures kept percent-encoded are not escaped a second time.
pub fn fill(template: &str, captures: &Captures) -> Filled {
    let chars: Vec<char> = template.chars().collect();
    let mut value = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == ':' && chars.get(i + 1).map_or(false, |n| n.is_alphabetic() || *n == '_') {
            let end = scan_while(&chars, i + 1, |ch| ch.is_alphanumeric() || ch == '_');
            let name: String = chars[i + 1..end].iter().collect();

            if let Some(entry) = captures.named_entry(&name) {
                value.push_str(&encode(entry, SEGMENT, SEGMENT_RAW));
            } else {
                unresolved.push(format!(":{}", name));
            }
            i = end;
            continue;
        }

        if c == '$' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit()) {
            let end = scan_while(&chars, i + 1, |ch| ch.is_ascii_digit());
            let digits: String = chars[i + 1..end].iter().collect();
            let position = digits.parse::<usize>().unwrap_or(0);

            if let Some(entry) = position.checked_sub(1).and_then(|i| captures.entries.get(i)) {
                value.push_str(&encode(entry, PATH, PATH_RAW));
            } else {
                unresolved.push(format!("${}", digits));
            }
            i = end;
            continue;
        }

        value.push(c);
        i += 1;
    }

    Filled { value, unresolved }
}

fn scan_while(chars: &[char], start: usize, pred: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && pred(chars[end]) {
        end += 1;
    }
    end
}

fn tokenize(pattern: &str) -> Result<Vec<Token>, PatternError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut next_index = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        let (key, pattern_src, end) = match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some(&escaped) => {
                        literal.push(escaped);
                        i += 2;
                    }
                    None => {
                        literal.push('\\');
                        i += 1;
                    }
                }
                continue;
            }
            ':' if chars.get(i + 1).map_or(false, |n| n.is_alphanumeric() || *n == '_') => {
                let name_end = scan_while(&chars, i + 1, |ch| ch.is_alphanumeric() || ch == '_');
                let name: String = chars[i + 1..name_end].iter().collect();

                if chars.get(name_end) == Some(&'(') {
                    let (group, after) = read_group(&chars, name_end, pattern)?;
                    (Key::Named(name), group, after)
                } else {
                    (Key::Named(name), DEFAULT_SEGMENT.to_string(), name_end)
                }
            }
            '(' => {
                let (group, after) = read_group(&chars, i, pattern)?;
                let key = Key::Index(next_index);
                next_index += 1;
                (key, group, after)
            }
            '*' => {
                let key = Key::Index(next_index);
                next_index += 1;
                (key, ".*".to_string(), i + 1)
            }
            _ => {
                literal.push(c);
                i += 1;
                continue;
            }
        };

        let modifier = chars.get(end).copied().filter(|m| matches!(m, '?' | '*' | '+'));
        let prefix = match literal.chars().last() {
            Some(p @ ('/' | '.')) => {
                literal.pop();
                Some(p)
            }
            _ => None,
        };

        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }

        tokens.push(Token::Param(Param {
            key,
            prefix,
            pattern: pattern_src,
            optional: matches!(modifier, Some('?') | Some('*')),
            repeat: matches!(modifier, Some('+') | Some('*')),
        }));

        i = if modifier.is_some() { end + 1 } else { end };
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    Ok(tokens)
}

/// Read a parenthesised group starting at `open`; returns its body and the
/// index just past the closing paren
fn read_group(chars: &[char], open: usize, pattern: &str) -> Result<(String, usize), PatternError> {
    let mut depth = 0usize;
    let mut body = String::new();
    let mut i = open;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                body.push(c);
                if let Some(&escaped) = chars.get(i + 1) {
                    body.push(escaped);
                    i += 1;
                }
            }
            '(' => {
                if depth > 0 {
                    body.push(c);
                }
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if body.is_empty() {
                        break;
                    }
                    return Ok((body, i + 1));
                }
                body.push(c);
            }
            _ => body.push(c),
        }
        i += 1;
    }

    Err(PatternError::UnbalancedGroup {
        pattern: pattern.to_string(),
        offset: open,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(p: &str) -> PathPattern {
        PathPattern::compile(p).unwrap()
    }

    #[test]
    fn test_literal_pattern() {
        let pattern = compile("/secret");
        assert!(pattern.test("/secret"));
        assert!(pattern.test("/secret/"));
        assert!(pattern.test("/SECRET"));
        assert!(!pattern.test("/secret/more"));
        assert!(!pattern.test("/public"));
        assert!(pattern.keys().is_empty());
    }

    #[test]
    fn test_named_capture() {
        let pattern = compile("/users/:id");
        let captures = pattern.exec("/users/42").unwrap();
        assert_eq!(captures.get("id"), Some("42"));
        assert_eq!(pattern.match_path("/users/42"), Some(vec!["42".to_string()]));
        assert!(pattern.exec("/users").is_none());
        assert!(pattern.exec("/users/42/posts").is_none());
    }

    #[test]
    fn test_multiple_named_captures() {
        let pattern = compile("/repos/:owner/:name");
        let captures = pattern.exec("/repos/rust-lang/cargo").unwrap();
        assert_eq!(captures.get("owner"), Some("rust-lang"));
        assert_eq!(captures.get("name"), Some("cargo"));
        assert_eq!(captures.positional(), vec!["rust-lang", "cargo"]);
        assert_eq!(captures.named().len(), 2);
    }

    #[test]
    fn test_wildcard() {
        let pattern = compile("/admin/*");
        assert!(pattern.test("/admin/panel"));
        assert!(pattern.test("/admin/users/1"));
        assert!(pattern.test("/admin/"));
        assert!(!pattern.test("/admin"));
        assert!(!pattern.test("/administrator"));
        assert_eq!(pattern.keys(), &[Key::Index(0)]);
        assert_eq!(
            pattern.match_path("/admin/users/1"),
            Some(vec!["users/1".to_string()])
        );
    }

    #[test]
    fn test_optional_parameter() {
        let pattern = compile("/posts/:id?");
        assert!(pattern.test("/posts"));
        assert!(pattern.test("/posts/9"));

        let captures = pattern.exec("/posts").unwrap();
        assert_eq!(captures.get("id"), None);
        assert!(captures.has_key("id"));
        assert_eq!(captures.positional(), vec![String::new()]);
    }

    #[test]
    fn test_repeated_parameter() {
        let pattern = compile("/files/:path+");
        assert!(!pattern.test("/files"));
        assert_eq!(
            pattern.match_path("/files/a/b/c"),
            Some(vec!["a/b/c".to_string()])
        );

        let pattern = compile("/files/:path*");
        assert!(pattern.test("/files"));
    }

    #[test]
    fn test_custom_group() {
        let pattern = compile("/items/:id(\\d+)");
        assert!(pattern.test("/items/12"));
        assert!(!pattern.test("/items/abc"));

        let pattern = compile("/v(\\d+)/status");
        assert_eq!(pattern.match_path("/v2/status"), Some(vec!["2".to_string()]));
    }

    #[test]
    fn test_dot_prefix() {
        let pattern = compile("/report.:format?");
        assert_eq!(pattern.exec("/report.json").unwrap().get("format"), Some("json"));
        assert!(pattern.test("/report"));
    }

    #[test]
    fn test_escaped_characters() {
        let pattern = compile("/literal\\:colon");
        assert!(pattern.test("/literal:colon"));
        assert!(pattern.keys().is_empty());
    }

    #[test]
    fn test_captures_are_decoded() {
        let pattern = compile("/search/:term");
        let captures = pattern.exec("/search/hello%20world").unwrap();
        assert_eq!(captures.get("term"), Some("hello world"));
    }

    #[test]
    fn test_undecodable_capture_is_kept_raw() {
        let pattern = compile("/files/:name");
        let captures = pattern.exec("/files/%FF%20x").unwrap();
        assert_eq!(captures.get("name"), Some("%FF%20x"));
        assert_eq!(fill("/raw/:name", &captures).value, "/raw/%FF%20x");

        let captures = pattern.exec("/files/%25FF").unwrap();
        assert_eq!(captures.get("name"), Some("%FF"));
        assert_eq!(fill("/raw/:name", &captures).value, "/raw/%25FF");

        let captures = compile("/files/*").exec("/files/a/%FF").unwrap();
        assert_eq!(fill("/raw/$1", &captures).value, "/raw/a/%FF");
    }

    #[test]
    fn test_unbalanced_group() {
        let err = PathPattern::compile("/bad/(\\d+").unwrap_err();
        assert!(matches!(err, PatternError::UnbalancedGroup { .. }));
    }

    #[test]
    fn test_fill_named() {
        let captures = compile("/api/:id").exec("/api/42").unwrap();
        let filled = fill("http://api/:id", &captures);
        assert_eq!(filled.value, "http://api/42");
        assert!(filled.is_complete());
    }

    #[test]
    fn test_fill_escapes_named_values() {
        let captures = compile("/search/:term").exec("/search/a%20b%2Fc").unwrap();
        let filled = fill("/q/:term", &captures);
        assert_eq!(filled.value, "/q/a%20b%2Fc");
    }

    #[test]
    fn test_fill_positional() {
        let captures = compile("/api/*").exec("/api/users/7").unwrap();
        let filled = fill("http://localhost:9000/v1/$1", &captures);
        assert_eq!(filled.value, "http://localhost:9000/v1/users/7");
        assert!(filled.is_complete());
    }

    #[test]
    fn test_fill_leaves_ports_alone() {
        let captures = compile("/x/:id").exec("/x/1").unwrap();
        let filled = fill("http://localhost:8080/y/:id", &captures);
        assert_eq!(filled.value, "http://localhost:8080/y/1");
    }

    #[test]
    fn test_fill_reports_unresolved() {
        let captures = compile("/api/:id").exec("/api/42").unwrap();
        let filled = fill("http://api/:missing/$3", &captures);
        assert_eq!(filled.value, "http://api//");
        assert_eq!(filled.unresolved, vec![":missing".to_string(), "$3".to_string()]);
        assert!(!filled.is_complete());
    }

    #[test]
    fn test_fill_absent_optional_is_empty() {
        let captures = compile("/posts/:id?").exec("/posts").unwrap();
        let filled = fill("/archive/:id", &captures);
        assert_eq!(filled.value, "/archive/");
        assert!(filled.is_complete());
    }
}
