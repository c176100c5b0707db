//! Core data types for the yearwrap service
//!
//! These types describe stored statistics records, the side payload of
//! original values that can be revealed with an unlock code, and the
//! anonymized identifiers that replace raw phone numbers and emails.

use crate::privacy::unlock::UnlockCode;
use crate::tree::StatTree;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Public identifier of a stored record or comparison
///
/// Eight url-safe characters drawn from six random bytes, so ids can be
/// embedded directly in shareable links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a new random id
    pub fn generate() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Accept an id from a request path
    ///
    /// Returns `None` for strings that could never have been generated
    /// (empty, too long, or outside the url-safe alphabet).
    pub fn parse(s: &str) -> Option<Self> {
        let valid = !s.is_empty()
            && s.len() <= 64
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of anonymized contact identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Phone,
    Email,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Phone => "phone",
            IdentifierKind::Email => "email",
        }
    }
}

/// Deterministic, irreversible replacement for a phone number or email
///
/// Renders as `{kind}_{digest}` where the digest is 12 lowercase hex
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnonymizedIdentifier {
    pub kind: IdentifierKind,
    pub digest: String,
}

impl AnonymizedIdentifier {
    /// Width of the truncated digest in hex characters
    pub const DIGEST_LEN: usize = 12;

    /// Recognize an already-anonymized identifier string
    pub fn parse(s: &str) -> Option<Self> {
        let (prefix, digest) = s.split_once('_')?;
        let kind = match prefix {
            "phone" => IdentifierKind::Phone,
            "email" => IdentifierKind::Email,
            _ => return None,
        };
        let well_formed = digest.len() == Self::DIGEST_LEN
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        well_formed.then(|| Self {
            kind,
            digest: digest.to_string(),
        })
    }
}

impl fmt::Display for AnonymizedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.as_str(), self.digest)
    }
}

/// A statistics tree that has been through the sanitizer
///
/// Only the sanitizer and the storage layer can build one, so anything
/// handed to `create_record` is guaranteed to have had PII stripped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SanitizedTree(StatTree);

impl SanitizedTree {
    pub(crate) fn from_sanitized(tree: StatTree) -> Self {
        Self(tree)
    }

    pub fn as_tree(&self) -> &StatTree {
        &self.0
    }

    pub fn into_inner(self) -> StatTree {
        self.0
    }
}

/// Mapping from field path to the original (pre-anonymization) value
///
/// Paths use dotted property names with optional bracket indices, e.g.
/// `raw.contacts.top_sent_to` or `raw.conversations.threads[0].name`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HydrationPayload(BTreeMap<String, StatTree>);

impl HydrationPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, value: StatTree) {
        self.0.insert(path.into(), value);
    }

    pub fn get(&self, path: &str) -> Option<&StatTree> {
        self.0.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StatTree)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, StatTree)> for HydrationPayload {
    fn from_iter<I: IntoIterator<Item = (String, StatTree)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Client build information stored alongside a record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dmg_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Opaque hash chosen by the client; never a raw identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_fingerprint: Option<String>,
}

/// Everything needed to create a record
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub year: i32,
    pub statistics: SanitizedTree,
    pub user_name: Option<String>,
    pub metadata: RecordMetadata,
    pub hydration: Option<HydrationPayload>,
    pub unlock_code: Option<UnlockCode>,
}

impl NewRecord {
    pub fn new(year: i32, statistics: SanitizedTree) -> Self {
        Self {
            year,
            statistics,
            user_name: None,
            metadata: RecordMetadata::default(),
            hydration: None,
            unlock_code: None,
        }
    }

    /// Attach a hydration payload gated by an unlock code
    pub fn with_hydration(mut self, payload: HydrationPayload, code: UnlockCode) -> Self {
        self.hydration = Some(payload);
        self.unlock_code = Some(code);
        self
    }
}

/// A stored statistics record
///
/// The unlock code and hydration payload are never serialized; they only
/// leave storage through the unlock gate.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsRecord {
    pub id: RecordId,
    pub year: i32,
    pub statistics: SanitizedTree,
    pub user_name: Option<String>,
    pub metadata: RecordMetadata,
    pub created_at: DateTime<Utc>,
    pub views: u64,
    #[serde(skip)]
    pub unlock_code: Option<UnlockCode>,
    #[serde(skip)]
    pub hydration: Option<HydrationPayload>,
}

impl StatisticsRecord {
    /// Whether an unlock code was configured at creation
    pub fn unlockable(&self) -> bool {
        self.unlock_code.is_some()
    }
}

/// The unlock-relevant columns of a record
#[derive(Debug, Clone)]
pub struct UnlockMaterial {
    pub year: i32,
    pub unlock_code: Option<UnlockCode>,
    pub hydration: Option<HydrationPayload>,
}

/// Two records of the same user from different years, shown side by side
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub id: RecordId,
    pub year1: i32,
    pub year2: i32,
    pub year1_id: RecordId,
    pub year2_id: RecordId,
    pub year1_statistics: SanitizedTree,
    pub year2_statistics: SanitizedTree,
    pub year1_user_name: Option<String>,
    pub year2_user_name: Option<String>,
    pub year1_unlockable: bool,
    pub year2_unlockable: bool,
    pub created_at: DateTime<Utc>,
    pub views: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_generation() {
        let id = RecordId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(RecordId::parse(id.as_str()).is_some());
        assert_ne!(id, RecordId::generate());
    }

    #[test]
    fn test_record_id_parse_rejects_garbage() {
        assert!(RecordId::parse("").is_none());
        assert!(RecordId::parse("abc/def").is_none());
        assert!(RecordId::parse(&"a".repeat(65)).is_none());
        assert!(RecordId::parse("aB3_-x9Z").is_some());
    }

    #[test]
    fn test_anonymized_identifier_parse() {
        let parsed = AnonymizedIdentifier::parse("email_0123456789ab").unwrap();
        assert_eq!(parsed.kind, IdentifierKind::Email);
        assert_eq!(parsed.to_string(), "email_0123456789ab");

        assert!(AnonymizedIdentifier::parse("phone_0123456789").is_none());
        assert!(AnonymizedIdentifier::parse("phone_0123456789AB").is_none());
        assert!(AnonymizedIdentifier::parse("fax_0123456789ab").is_none());
        assert!(AnonymizedIdentifier::parse("+15551234567").is_none());
    }

    #[test]
    fn test_metadata_deserializes_partial() {
        let metadata: RecordMetadata =
            serde_json::from_str(r#"{"sdk_version": "1.4.0", "ignored": 3}"#).unwrap();
        assert_eq!(metadata.sdk_version.as_deref(), Some("1.4.0"));
        assert!(metadata.platform.is_none());
    }
}
