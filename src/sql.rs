//! Rendering of LISTEN / UNLISTEN / NOTIFY statements.

use crate::error::{ListenError, Result};
use std::borrow::Cow;

/// Builds statement batches for channel operations.
#[derive(Clone, Copy, Debug, Default)]
pub struct Statements {
    /// Emit upper-case keywords.
    pub capitalized: bool,
}

impl Statements {
    pub fn new(capitalized: bool) -> Self {
        Self { capitalized }
    }

    fn keyword(&self, upper: &'static str) -> Cow<'static, str> {
        if self.capitalized {
            Cow::Borrowed(upper)
        } else {
            Cow::Owned(upper.to_ascii_lowercase())
        }
    }

    /// One `LISTEN` per channel.
    pub fn listen(&self, channels: &[String]) -> Vec<String> {
        let kw = self.keyword("LISTEN");
        channels
            .iter()
            .map(|c| format!("{} {}", kw, quote_identifier(c)))
            .collect()
    }

    /// One `UNLISTEN` per channel.
    pub fn unlisten(&self, channels: &[String]) -> Vec<String> {
        let kw = self.keyword("UNLISTEN");
        channels
            .iter()
            .map(|c| format!("{} {}", kw, quote_identifier(c)))
            .collect()
    }

    /// One `NOTIFY` per channel. An empty payload is left out of the statement.
    pub fn notify(&self, channels: &[String], payload: &str) -> Vec<String> {
        let kw = self.keyword("NOTIFY");
        channels
            .iter()
            .map(|c| {
                if payload.is_empty() {
                    format!("{} {}", kw, quote_identifier(c))
                } else {
                    format!("{} {}, {}", kw, quote_identifier(c), quote_literal(payload))
                }
            })
            .collect()
    }
}

/// Quote a channel name unless it is a plain lower-case identifier.
pub fn quote_identifier(name: &str) -> Cow<'_, str> {
    let mut chars = name.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');

    if simple {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Channel names must contain at least one non-whitespace character.
pub fn validate_channel(name: &str) -> Result<()> {
    if name.chars().any(|c| !c.is_whitespace()) {
        Ok(())
    } else {
        Err(ListenError::InvalidChannel(name.to_string()))
    }
}

/// Validate `names` and drop duplicates, keeping first occurrences in order.
pub(crate) fn unique_channels<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        validate_channel(name)?;
        if !out.iter().any(|c| c == name) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}
