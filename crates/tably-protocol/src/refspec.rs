//! Refspecs mapping source refs to destination refs.

use crate::{ProtocolError, Result};
use std::fmt;
use std::str::FromStr;

/// A `[+]<src>:<dst>` mapping with at most one `*` on each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    src: String,
    dst: String,
    force: bool,
}

impl Refspec {
    /// Parses a refspec.
    pub fn parse(s: &str) -> Result<Self> {
        let (force, body) = match s.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (src, dst) = body
            .split_once(':')
            .ok_or_else(|| ProtocolError::BadRequest(format!("invalid refspec: {}", s)))?;
        if src.is_empty() || dst.is_empty() {
            return Err(ProtocolError::BadRequest(format!("invalid refspec: {}", s)));
        }

        let src_stars = src.matches('*').count();
        let dst_stars = dst.matches('*').count();
        if src_stars > 1 || dst_stars > 1 || src_stars != dst_stars {
            return Err(ProtocolError::BadRequest(format!(
                "invalid refspec pattern: {}",
                s
            )));
        }

        Ok(Self {
            src: src.to_string(),
            dst: dst.to_string(),
            force,
        })
    }

    /// The default fetch refspec for a remote: `+heads/*:remotes/<remote>/*`.
    pub fn default_fetch(remote: &str) -> Self {
        Self {
            src: "heads/*".to_string(),
            dst: format!("remotes/{}/*", remote),
            force: true,
        }
    }

    /// Source side.
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Destination side.
    pub fn dst(&self) -> &str {
        &self.dst
    }

    /// Whether non-fast-forward updates are allowed.
    pub fn is_force(&self) -> bool {
        self.force
    }

    /// Returns true if the source side contains a wildcard.
    pub fn is_glob(&self) -> bool {
        self.src.contains('*')
    }

    /// Returns true if `name` matches the source side.
    pub fn matches(&self, name: &str) -> bool {
        self.capture(name).is_some()
    }

    fn capture<'a>(&self, name: &'a str) -> Option<&'a str> {
        match self.src.split_once('*') {
            Some((prefix, suffix)) => {
                if name.len() < prefix.len() + suffix.len() {
                    return None;
                }
                name.strip_prefix(prefix)?.strip_suffix(suffix)
            }
            None => (name == self.src).then_some(""),
        }
    }

    /// Maps a matching source name to its destination.
    pub fn transform(&self, name: &str) -> Option<String> {
        let captured = self.capture(name)?;
        Some(match self.dst.split_once('*') {
            Some((prefix, suffix)) => format!("{}{}{}", prefix, captured, suffix),
            None => self.dst.clone(),
        })
    }
}

impl FromStr for Refspec {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Refspec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.force {
            f.write_str("+")?;
        }
        write!(f, "{}:{}", self.src, self.dst)
    }
}
