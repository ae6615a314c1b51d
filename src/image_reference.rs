use std::fmt;
use thiserror::Error;

/// Container image reference as written in a pod spec, e.g. `registry.example.com/team/app:1.2`.
///
/// The reference is kept opaque: registry, repository, tag and digest are never split
/// apart, only the `/`-delimited path is inspected when deriving short target names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageReference(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("image reference is empty")]
    Empty,
    #[error("image reference {0:?} contains whitespace")]
    Whitespace(String),
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ParseError::Whitespace(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last two `/`-delimited segments, e.g. `team/app:1.2`.
    ///
    /// Returns `None` for single-segment references such as `app:1.2`.
    pub fn path_suffix(&self) -> Option<&str> {
        let mut slashes = self.0.rmatch_indices('/').map(|(pos, _)| pos);
        match (slashes.next(), slashes.next()) {
            (Some(_), Some(second_last)) => Some(&self.0[second_last + 1..]),
            (Some(_), None) => Some(&self.0),
            (None, _) => None,
        }
    }
}
