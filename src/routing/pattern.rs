//! Route pattern parsing and matching.
//!
//! # Syntax
//! - Patterns start with `/`
//! - `:name` matches one non-empty path segment
//! - `*` matches any run of characters, including `/` and nothing at all
//! - Everything else is a case-sensitive literal
//!
//! # Design Decisions
//! - Patterns compiled once per registry refresh, matched many times
//! - No regex; a small backtracking matcher over tokens
//! - Consecutive wildcards collapse into one

use thiserror::Error;

/// Error raised when a route pattern cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("route pattern is empty")]
    Empty,
    #[error("route pattern {0:?} must start with '/'")]
    MissingLeadingSlash(String),
    #[error("route pattern {pattern:?} has a ':' without a parameter name at byte {position}")]
    EmptyParamName { pattern: String, position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    tokens: Vec<Token>,
}

impl RoutePattern {
    /// Compile a pattern.
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }
        if !source.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(source.to_string()));
        }

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '*' => {
                    flush_literal(&mut literal, &mut tokens);
                    if tokens.last() != Some(&Token::Wildcard) {
                        tokens.push(Token::Wildcard);
                    }
                }
                ':' => {
                    flush_literal(&mut literal, &mut tokens);
                    let mut name = String::new();
                    while let Some(&(_, n)) = chars.peek() {
                        if n.is_ascii_alphanumeric() || n == '_' {
                            name.push(n);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(PatternError::EmptyParamName {
                            pattern: source.to_string(),
                            position,
                        });
                    }
                    tokens.push(Token::Param(name));
                }
                _ => literal.push(c),
            }
        }
        flush_literal(&mut literal, &mut tokens);

        Ok(Self { tokens })
    }

    /// Returns true if `path` matches the whole pattern.
    pub fn matches(&self, path: &str) -> bool {
        match_tokens(&self.tokens, path)
    }
}

fn flush_literal(literal: &mut String, tokens: &mut Vec<Token>) {
    if !literal.is_empty() {
        tokens.push(Token::Literal(std::mem::take(literal)));
    }
}

fn match_tokens(tokens: &[Token], path: &str) -> bool {
    match tokens.split_first() {
        None => path.is_empty(),
        Some((Token::Literal(lit), rest)) => path
            .strip_prefix(lit.as_str())
            .is_some_and(|tail| match_tokens(rest, tail)),
        Some((Token::Param(_), rest)) => {
            let segment_end = path.find('/').unwrap_or(path.len());
            (1..=segment_end)
                .filter(|&i| path.is_char_boundary(i))
                .any(|i| match_tokens(rest, &path[i..]))
        }
        Some((Token::Wildcard, rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=path.len())
                .filter(|&i| path.is_char_boundary(i))
                .any(|i| match_tokens(rest, &path[i..]))
        }
    }
}
