//! Directory payload → identity record mapping.
//!
//! Default fields are copied by exact key, every other key passes through
//! snake-cased, then the derived fields (`common_name`, `name`,
//! `primary_visa?`, `likely_npe?`) are computed from the result.

use std::sync::OnceLock;

use dice_core::DistinguishedName;
use heck::ToSnakeCase;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::decode::Payload;

/// Payload keys always present in `info`, in payload spelling.
pub const DEFAULT_FIELDS: &[&str] = &[
    "dn",
    "email",
    "firstName",
    "lastName",
    "fullName",
    "citizenshipStatus",
    "country",
    "grantBy",
    "organizations",
    "uid",
    "dutyorg",
    "visas",
    "affiliations",
];

/// How `info.name` is built when the directory does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameFormat {
    /// DN common name
    Cn,
    /// `full_name` field
    FullName,
    /// `"{first_name} {last_name}"`
    FirstLastName,
}

/// Normalized `info` block of an identity record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct IdentityInfo {
    pub dn: Value,
    pub email: Value,
    pub first_name: Value,
    pub last_name: Value,
    pub full_name: Value,
    pub citizenship_status: Value,
    pub country: Value,
    pub grant_by: Value,
    pub organizations: Value,
    pub uid: Value,
    pub dutyorg: Value,
    pub visas: Value,
    pub affiliations: Value,
    /// Passthrough fields, snake-cased
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// First `cn` of `dn`, original case
    pub common_name: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Whether `visas` holds the configured primary visa
    #[serde(rename = "primary_visa?")]
    pub primary_visa: bool,
    /// Non-person entity heuristic
    #[serde(rename = "likely_npe?")]
    pub likely_npe: Option<bool>,
}

impl IdentityInfo {
    /// Slot for a snake-cased known field, if `key` names one.
    fn known_mut(&mut self, key: &str) -> Option<&mut Value> {
        Some(match key {
            "dn" => &mut self.dn,
            "email" => &mut self.email,
            "first_name" => &mut self.first_name,
            "last_name" => &mut self.last_name,
            "full_name" => &mut self.full_name,
            "citizenship_status" => &mut self.citizenship_status,
            "country" => &mut self.country,
            "grant_by" => &mut self.grant_by,
            "organizations" => &mut self.organizations,
            "uid" => &mut self.uid,
            "dutyorg" => &mut self.dutyorg,
            "visas" => &mut self.visas,
            "affiliations" => &mut self.affiliations,
            _ => return None,
        })
    }

    /// Insert a field by snake-cased name.
    ///
    /// Known fields are overwritten in place. `name` seeds the derived name,
    /// and the remaining derived keys are dropped since mapping recomputes
    /// them.
    pub fn insert(&mut self, key: String, value: Value) {
        if let Some(slot) = self.known_mut(&key) {
            *slot = value;
            return;
        }
        match key.as_str() {
            "name" => self.name = text(&value).map(str::to_string),
            "common_name" | "primary_visa" | "likely_npe" => {}
            _ => {
                self.extra.insert(key, value);
            }
        }
    }

    fn full_name_text(&self) -> Option<String> {
        text(&self.full_name).map(str::to_string)
    }

    fn first_last_name(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.first_name, &self.last_name]
            .into_iter()
            .filter_map(text)
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }

    fn has_any_name(&self) -> bool {
        [&self.full_name, &self.first_name, &self.last_name]
            .into_iter()
            .any(|v| text(v).is_some())
    }
}

/// Non-empty string content of a JSON value.
fn text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
        _ => None,
    }
}

/// `extra` block of an identity record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityExtra {
    /// Directory response body as received
    pub raw_info: Value,
}

/// Identity assembled by a successful callback phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Strategy name
    pub provider: String,
    /// Canonical subject DN
    pub uid: String,
    /// Mapped directory attributes
    pub info: IdentityInfo,
    /// Raw directory answer
    pub extra: IdentityExtra,
}

// ─────────────────────────────────────────────────────────────────────────────
// Mapper
// ─────────────────────────────────────────────────────────────────────────────

/// Builds [`IdentityInfo`] from decoded directory payloads.
#[derive(Debug, Clone, Default)]
pub struct AttributeMapper {
    name_format: Option<NameFormat>,
    primary_visa: Option<String>,
}

impl AttributeMapper {
    /// Create a mapper. A blank `primary_visa` counts as unset.
    #[must_use]
    pub fn new(name_format: Option<NameFormat>, primary_visa: Option<String>) -> Self {
        Self {
            name_format,
            primary_visa: primary_visa.filter(|v| !v.trim().is_empty()),
        }
    }

    /// Map a payload into a complete `info` block.
    #[must_use]
    pub fn map(&self, payload: &Payload) -> IdentityInfo {
        let mut info = IdentityInfo::default();

        for key in DEFAULT_FIELDS {
            if let Some(value) = payload.get(*key) {
                info.insert(key.to_snake_case(), value.clone());
            }
        }
        for (key, value) in payload {
            if !DEFAULT_FIELDS.contains(&key.as_str()) {
                info.insert(key.to_snake_case(), value.clone());
            }
        }

        info.common_name = text(&info.dn)
            .and_then(|dn| DistinguishedName::parse(dn).ok())
            .and_then(|dn| dn.common_name().map(str::to_string));
        self.set_name(&mut info);
        info.primary_visa = self.has_primary_visa(&info);
        info.likely_npe = Some(identify_npe(&info));

        info
    }

    /// Fill `info.name` unless the directory already supplied one.
    pub fn set_name(&self, info: &mut IdentityInfo) {
        if info.name.as_deref().is_some_and(|n| !n.trim().is_empty()) {
            return;
        }

        let formatted = match self.name_format {
            Some(NameFormat::Cn) => info.common_name.clone(),
            Some(NameFormat::FullName) => info.full_name_text(),
            Some(NameFormat::FirstLastName) => info.first_last_name(),
            None => None,
        };

        info.name = formatted
            .or_else(|| info.common_name.clone().filter(|n| !n.trim().is_empty()))
            .or_else(|| info.full_name_text())
            .or_else(|| info.first_last_name());
    }

    /// Whether `info.visas` holds the configured primary visa.
    #[must_use]
    pub fn has_primary_visa(&self, info: &IdentityInfo) -> bool {
        let Some(visa) = self.primary_visa.as_deref() else {
            return false;
        };
        match &info.visas {
            Value::Array(visas) => visas.iter().any(|v| v.as_str() == Some(visa)),
            Value::String(s) => s == visa,
            _ => false,
        }
    }
}

/// Classify an identity as a likely non-person entity (server, service).
///
/// A domain-looking common name wins; otherwise any identity without an
/// email, or with an email but no name field, is an NPE.
#[must_use]
pub fn identify_npe(info: &IdentityInfo) -> bool {
    // Domain-looking common names (`host.example.org`, `go.vm`)
    static TLD_RE: OnceLock<Regex> = OnceLock::new();
    let tld_re = TLD_RE.get_or_init(|| Regex::new(r"\w{2}\.\w+(\.\w{3,})?").unwrap());

    if info
        .common_name
        .as_deref()
        .is_some_and(|cn| tld_re.is_match(cn))
    {
        return true;
    }
    if text(&info.email).is_none() {
        return true;
    }
    !info.has_any_name()
}
