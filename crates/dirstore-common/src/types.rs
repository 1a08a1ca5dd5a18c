//! Core type definitions for dirstore
//!
//! This module defines the identifiers and distinguished names used
//! throughout the backend.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique numeric identifier for an entry
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into, Display,
)]
#[display("{_0}")]
pub struct EntryId(u64);

impl EntryId {
    /// Parent-Child Index marker for root-level entries
    pub const ROOT: Self = Self(0);

    /// Marks an entry that has not been assigned an identifier yet
    pub const NOID: Self = Self(u64::MAX);

    /// First identifier handed out by a fresh allocator
    pub const FIRST: Self = Self(1);

    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is a real, allocated identifier
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != Self::NOID.0 && self.0 != Self::ROOT.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NOID {
            write!(f, "EntryId(NOID)")
        } else {
            write!(f, "EntryId({})", self.0)
        }
    }
}

/// One relative distinguished name, kept in both raw and normalized form
#[derive(Clone, PartialEq, Eq, Hash)]
struct Rdn {
    raw: String,
    normalized: String,
}

/// A distinguished name
///
/// The raw form is what the client supplied; the normalized form is the
/// key used by the Name Index and the Entry Cache. Two names are equal
/// when their normalized forms are equal.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dn {
    raw: String,
    normalized: String,
    rdns: Vec<Rdn>,
}

impl Dn {
    /// Parse and normalize a distinguished name
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DnError> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Ok(Self::null());
        }

        let rdns = split_rdns(raw)?
            .into_iter()
            .map(|part| normalize_rdn(&part).map(|normalized| Rdn { raw: part, normalized }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_rdns(rdns))
    }

    /// The null DN (no RDNs); used for anonymous actors
    #[must_use]
    pub const fn null() -> Self {
        Self {
            raw: String::new(),
            normalized: String::new(),
            rdns: Vec::new(),
        }
    }

    fn from_rdns(rdns: Vec<Rdn>) -> Self {
        let raw = rdns
            .iter()
            .map(|r| r.raw.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let normalized = rdns
            .iter()
            .map(|r| r.normalized.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Self {
            raw,
            normalized,
            rdns,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDNs in the name
    #[must_use]
    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    /// The name with its first RDN stripped; `None` for single-RDN names
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.rdns.len() < 2 {
            return None;
        }
        Some(Self::from_rdns(self.rdns[1..].to_vec()))
    }

    /// Parent resolution relative to a backend's suffixes.
    ///
    /// A name that is itself one of the suffixes has no parent inside the
    /// backend, whatever its depth.
    #[must_use]
    pub fn parent_within(&self, suffixes: &[Self]) -> Option<Self> {
        if suffixes.iter().any(|s| s == self) {
            return None;
        }
        self.parent()
    }

    /// Successively shorter ancestors, nearest first
    pub fn ancestors(&self) -> impl Iterator<Item = Self> + '_ {
        (1..self.rdns.len()).map(|skip| Self::from_rdns(self.rdns[skip..].to_vec()))
    }

    /// Whether `self` is `other` or lies beneath it
    #[must_use]
    pub fn is_within(&self, other: &Self) -> bool {
        if other.is_null() {
            return true;
        }
        self.rdns.len() >= other.rdns.len()
            && self.rdns[self.rdns.len() - other.rdns.len()..]
                .iter()
                .zip(&other.rdns)
                .all(|(a, b)| a.normalized == b.normalized)
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Dn {}

impl std::hash::Hash for Dn {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Debug for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dn({:?})", self.raw)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for Dn {
    type Error = DnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Dn> for String {
    fn from(dn: Dn) -> Self {
        dn.raw
    }
}

impl std::str::FromStr for Dn {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors that can occur when parsing a distinguished name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DnError {
    #[error("empty RDN in distinguished name")]
    EmptyRdn,
    #[error("RDN {0:?} is missing '='")]
    MissingEquals(String),
    #[error("RDN {0:?} has an empty attribute type")]
    EmptyAttributeType(String),
    #[error("distinguished name ends with a dangling escape")]
    TrailingEscape,
}

/// Split at unescaped commas, keeping escapes intact
fn split_rdns(raw: &str) -> Result<Vec<String>, DnError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or(DnError::TrailingEscape)?;
                current.push('\\');
                current.push(escaped);
            }
            ',' => {
                parts.push(finish_rdn(&current)?);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    parts.push(finish_rdn(&current)?);
    Ok(parts)
}

fn finish_rdn(part: &str) -> Result<String, DnError> {
    let part = part.trim();
    if part.is_empty() {
        return Err(DnError::EmptyRdn);
    }
    Ok(part.to_string())
}

fn normalize_rdn(rdn: &str) -> Result<String, DnError> {
    let eq = find_unescaped(rdn, '=').ok_or_else(|| DnError::MissingEquals(rdn.to_string()))?;
    let attr = rdn[..eq].trim();
    if attr.is_empty() {
        return Err(DnError::EmptyAttributeType(rdn.to_string()));
    }
    let value = escape_value(&normalize_value(&unescape_value(&rdn[eq + 1..])));
    Ok(format!("{}={value}", attr.to_ascii_lowercase()))
}

/// Decode `\c` and `\XX` escapes of an RDN value
fn unescape_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let hex = bytes
                .get(i + 1..i + 3)
                .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit))
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            if let Some(byte) = hex {
                out.push(byte);
                i += 3;
            } else {
                out.push(bytes[i + 1]);
                i += 2;
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Re-escape a decoded value in one canonical spelling
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        if matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') || (i == 0 && c == '#') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn find_unescaped(s: &str, needle: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == needle {
            return Some(i);
        }
    }
    None
}

/// Case-ignore normalization: trim, collapse inner whitespace, lowercase
#[must_use]
pub fn normalize_value(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
