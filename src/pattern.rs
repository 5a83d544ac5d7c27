//! Key Pattern Module
//!
//! Full-match regular expressions over keys.
//!
//! Keys are arbitrary bytes, so patterns run without Unicode mode and `.`
//! matches every byte including `\n`. Non-ASCII literals still match their
//! UTF-8 encoding.
//!
//! A pattern that cannot be parsed, that can only ever match the empty
//! string, or that has a stray `]` outside a class compiles to an invalid
//! [`KeyPattern`] which matches nothing. Callers never see a pattern error.

use regex::bytes::{Regex, RegexBuilder};
use regex_syntax::ParserBuilder;

/// Compiled key filter; `None` inside means the pattern was malformed
#[derive(Debug, Clone)]
pub struct KeyPattern {
    regex: Option<Regex>,
}

impl KeyPattern {
    /// Compile `pattern` with full-match semantics
    pub fn compile(pattern: &str) -> Self {
        if !matches_something(pattern) || has_stray_bracket(pattern) {
            return Self { regex: None };
        }
        let anchored = format!(r"\A(?:{})\z", pattern);
        let regex = RegexBuilder::new(&anchored)
            .unicode(false)
            .dot_matches_new_line(true)
            .build()
            .ok();
        Self { regex }
    }

    /// False if the pattern was malformed
    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    /// True if the whole of `key` matches
    pub fn matches(&self, key: &[u8]) -> bool {
        self.regex.as_ref().map_or(false, |regex| regex.is_match(key))
    }
}

/// Parses and can match at least one non-empty key
fn matches_something(pattern: &str) -> bool {
    let parsed = ParserBuilder::new()
        .unicode(false)
        .utf8(false)
        .dot_matches_new_line(true)
        .build()
        .parse(pattern);
    match parsed {
        Ok(hir) => hir.properties().maximum_len() != Some(0),
        Err(_) => false,
    }
}

/// True if an unescaped `]` closes no class.
/// Only called on patterns that already parse.
fn has_stray_bracket(pattern: &str) -> bool {
    let mut depth = 0usize;
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' => {
                depth += 1;
                // A leading `]` (after an optional `^`) is a literal member
                if chars.peek() == Some(&'^') {
                    chars.next();
                }
                if chars.peek() == Some(&']') {
                    chars.next();
                }
            }
            ']' if depth > 0 => depth -= 1,
            ']' => return true,
            _ => {}
        }
    }
    false
}
