//! Distinguished name parsing and canonicalization.
//!
//! Certificates and reverse proxies hand DNs over in two shapes:
//!
//! ```text
//! /DC=org/DC=ruby-lang/CN=Ruby certificate rbcert      (OpenSSL slash form)
//! CN=Ruby certificate rbcert, DC=ruby-lang, DC=org     (RFC 4514 comma form)
//! ```
//!
//! The directory server only accepts one rendering: `cn` first, attributes in
//! a fixed priority order, upper-cased, comma-joined. [`DistinguishedName::canonicalize`]
//! produces that rendering from either shape, in either RDN order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute priority used by the directory server when none is configured.
pub const DEFAULT_ATTRIBUTE_ORDER: [&str; 9] =
    ["cn", "l", "st", "ou", "o", "c", "street", "dc", "uid"];

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Reasons a DN string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
    /// The input was empty or only delimiters/whitespace.
    #[error("distinguished name is empty")]
    Empty,

    /// A segment had no `=` separating attribute and value.
    #[error("segment '{0}' is not an attribute=value pair")]
    MissingDelimiter(String),

    /// The attribute part of a segment is not an attribute type.
    #[error("invalid attribute type in segment '{0}'")]
    InvalidAttribute(String),

    /// The value part of a segment is empty.
    #[error("attribute '{0}' has no value")]
    MissingValue(String),

    /// The value contains a character that would be ambiguous once rendered.
    #[error("value of attribute '{0}' contains an unescaped '=' or ','")]
    UnescapedValue(String),

    /// Neither end of the DN carries the leading attribute.
    #[error("distinguished name must start with '{0}' in either direction")]
    MissingLeadingAttribute(String),

    /// The configured attribute order has no entries.
    #[error("attribute order must name at least one attribute")]
    EmptyOrder,
}

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Canonicalization options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnOptions {
    /// Attribute priority. The first entry must lead every canonical DN.
    pub attribute_order: Vec<String>,

    /// Upper-case the whole rendering.
    pub upper_case: bool,
}

impl Default for DnOptions {
    fn default() -> Self {
        Self {
            attribute_order: DEFAULT_ATTRIBUTE_ORDER
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            upper_case: true,
        }
    }
}

impl DnOptions {
    /// The attribute every canonical DN starts with.
    #[must_use]
    pub fn leading_attribute(&self) -> Option<&str> {
        self.attribute_order.first().map(String::as_str)
    }

    /// Check the options are usable.
    ///
    /// # Errors
    ///
    /// Returns [`DnError::EmptyOrder`] when no attribute order is set, or
    /// [`DnError::InvalidAttribute`] when an entry is not an attribute type.
    pub fn validate(&self) -> Result<(), DnError> {
        if self.attribute_order.is_empty() {
            return Err(DnError::EmptyOrder);
        }
        if let Some(bad) = self
            .attribute_order
            .iter()
            .find(|a| !is_attribute_type(a))
        {
            return Err(DnError::InvalidAttribute(bad.clone()));
        }
        Ok(())
    }

    /// Position of `attribute` in the priority list; unknown attributes sort last.
    fn rank(&self, attribute: &str) -> usize {
        self.attribute_order
            .iter()
            .position(|a| a.eq_ignore_ascii_case(attribute))
            .unwrap_or(self.attribute_order.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// One `attribute=value` pair. The attribute is stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rdn {
    attribute: String,
    value: String,
}

impl Rdn {
    /// Create a pair, normalising the attribute to lower case.
    #[must_use]
    pub fn new(attribute: impl AsRef<str>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.as_ref().to_ascii_lowercase(),
            value: value.into(),
        }
    }

    /// Attribute type, lower-cased (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Attribute value as given.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Case-insensitive attribute comparison.
    #[must_use]
    pub fn is(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

/// An ordered sequence of attribute/value pairs.
///
/// Duplicated attributes (several `ou` or `dc`) keep their relative order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    rdns: Vec<Rdn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Slash,
    Comma,
}

impl Delimiter {
    /// Slash form when the string is anchored on `/`, or when it has no comma
    /// and every `/`-separated piece is itself a pair.
    fn detect(raw: &str) -> Self {
        if raw.starts_with('/') || raw.ends_with('/') {
            return Self::Slash;
        }
        if raw.contains('/')
            && !raw.contains(',')
            && raw
                .split('/')
                .filter(|s| !s.trim().is_empty())
                .all(|s| s.contains('='))
        {
            return Self::Slash;
        }
        Self::Comma
    }

    fn as_char(self) -> char {
        match self {
            Self::Slash => '/',
            Self::Comma => ',',
        }
    }
}

impl DistinguishedName {
    /// Build a DN from already-split pairs.
    #[must_use]
    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    /// Split a raw DN into pairs, keeping the original order and value case.
    ///
    /// # Errors
    ///
    /// Returns a [`DnError`] for empty input or a malformed segment.
    pub fn parse(raw: &str) -> Result<Self, DnError> {
        let raw = raw.trim();
        let delimiter = Delimiter::detect(raw);

        let rdns = raw
            .split(delimiter.as_char())
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(parse_segment)
            .collect::<Result<Vec<_>, _>>()?;

        if rdns.is_empty() {
            return Err(DnError::Empty);
        }

        Ok(Self { rdns })
    }

    /// Parse `raw` and reorder it into the directory server's canonical shape.
    ///
    /// A DN that does not begin with the leading attribute is reversed once
    /// (certificates list RDNs most-significant first); if it still does not
    /// begin with it, the DN is rejected.
    ///
    /// # Errors
    ///
    /// Returns a [`DnError`] when parsing fails or no orientation leads with
    /// the configured leading attribute.
    pub fn canonicalize(raw: &str, options: &DnOptions) -> Result<Self, DnError> {
        let leading = options.leading_attribute().ok_or(DnError::EmptyOrder)?;
        let mut dn = Self::parse(raw)?;

        if !dn.starts_with(leading) {
            dn.rdns.reverse();
            if !dn.starts_with(leading) {
                return Err(DnError::MissingLeadingAttribute(leading.to_string()));
            }
        }

        dn.rdns.sort_by_key(|rdn| options.rank(&rdn.attribute));
        Ok(dn)
    }

    /// All pairs, in order.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// First value for `attribute`.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.rdns
            .iter()
            .find(|rdn| rdn.is(attribute))
            .map(Rdn::value)
    }

    /// First `cn` value.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.get("cn")
    }

    fn starts_with(&self, attribute: &str) -> bool {
        self.rdns.first().is_some_and(|rdn| rdn.is(attribute))
    }

    /// Render as `KEY=value,KEY=value`, optionally upper-casing values too.
    #[must_use]
    pub fn render(&self, upper_case: bool) -> String {
        let rendered = self
            .rdns
            .iter()
            .map(|rdn| format!("{}={}", rdn.attribute.to_ascii_uppercase(), rdn.value))
            .collect::<Vec<_>>()
            .join(",");

        if upper_case {
            rendered.to_uppercase()
        } else {
            rendered
        }
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

impl FromStr for DistinguishedName {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonicalize and render in one step.
///
/// # Errors
///
/// See [`DistinguishedName::canonicalize`].
pub fn canonicalize(raw: &str, options: &DnOptions) -> Result<String, DnError> {
    DistinguishedName::canonicalize(raw, options).map(|dn| dn.render(options.upper_case))
}

// ─────────────────────────────────────────────────────────────────────────────
// Segment grammar
// ─────────────────────────────────────────────────────────────────────────────

fn parse_segment(segment: &str) -> Result<Rdn, DnError> {
    let (attribute, value) = segment
        .split_once('=')
        .ok_or_else(|| DnError::MissingDelimiter(segment.to_string()))?;
    let attribute = attribute.trim();
    let value = value.trim();

    if !is_attribute_type(attribute) {
        return Err(DnError::InvalidAttribute(segment.to_string()));
    }
    if value.is_empty() {
        return Err(DnError::MissingValue(attribute.to_string()));
    }
    if value.contains(['=', ',']) {
        return Err(DnError::UnescapedValue(attribute.to_string()));
    }

    Ok(Rdn::new(attribute, value))
}

/// A descriptor (`cn`, `emailAddress`, `x-custom`) or a dotted OID (`2.5.4.3`).
fn is_attribute_type(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric() || c == '-'),
        Some(c) if c.is_ascii_digit() => s
            .split('.')
            .all(|arc| !arc.is_empty() && arc.bytes().all(|b| b.is_ascii_digit())),
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
