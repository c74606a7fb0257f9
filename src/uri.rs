//! `scheme:address` URIs used to select a transport plugin.

use std::fmt;

use crate::error::Error;

/// A parsed `scheme:address` string.
///
/// This is a thin wrapper, not a general-purpose URL type — no query or
/// fragment semantics are defined at this layer, only the scheme prefix used
/// to pick a transport and the address handed to it verbatim. The literal
/// address `default` (i.e. the full URI `"<scheme>:default"`) means "listen
/// on this scheme with default parameters".
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    raw: String,
    scheme_len: usize,
}

impl Uri {
    /// Parses `raw` into a `Uri`, rejecting strings with no `:` separator or
    /// an empty scheme.
    pub fn parse(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        match raw.find(':') {
            Some(0) | None => Err(Error::InvalidUri(raw)),
            Some(idx) => Ok(Self {
                scheme_len: idx,
                raw,
            }),
        }
    }

    /// Builds the default URI for a scheme: `"<scheme>:default"`.
    pub fn default_for_scheme(scheme: &str) -> Self {
        Self {
            scheme_len: scheme.len(),
            raw: format!("{}:default", scheme),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    pub fn address(&self) -> &str {
        &self.raw[self.scheme_len + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uri({:?})", self.raw)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl std::str::FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uri::parse(s)
    }
}
