//! PII stripping for incoming statistics
//!
//! Runs before anything is persisted. Free-text fields are dropped,
//! display names are nulled and contact identifiers are replaced by a
//! truncated SHA-256 digest. The transform is pure and idempotent:
//! sanitizing an already-sanitized tree changes nothing.

use crate::tree::{render_path, PathStep, StatTree, TreeVisitor};
use crate::types::{AnonymizedIdentifier, IdentifierKind, SanitizedTree};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Placeholder used for missing or unknown identifiers
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Which field names carry PII and how each is treated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizePolicy {
    /// Removed entirely, at any depth
    pub deny_list: BTreeSet<String>,
    /// Value replaced by null
    pub display_name_fields: BTreeSet<String>,
    /// String value replaced by its anonymized identifier
    pub identifier_fields: BTreeSet<String>,
}

fn owned_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        Self {
            deny_list: owned_set(&["sample_messages", "message_text", "content_samples", "text"]),
            display_name_fields: owned_set(&[
                "name",
                "display_name",
                "contact_name",
                "longest_streak_contact",
                "user_name",
            ]),
            identifier_fields: owned_set(&["identifier", "contact_id", "longest_streak_contact_id"]),
        }
    }
}

impl SanitizePolicy {
    /// Default policy with a custom deny-list
    pub fn with_deny_list<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deny_list: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Anonymize a phone number or email
///
/// Deterministic and unsalted, so the same contact maps to the same
/// identifier across every record. Strings that are already anonymized
/// pass through unchanged.
pub fn anonymize_identifier(raw: &str) -> String {
    if raw.is_empty() || raw == UNKNOWN_IDENTIFIER {
        return UNKNOWN_IDENTIFIER.to_string();
    }
    if AnonymizedIdentifier::parse(raw).is_some() {
        return raw.to_string();
    }

    let kind = if raw.contains('@') {
        IdentifierKind::Email
    } else {
        IdentifierKind::Phone
    };
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));

    AnonymizedIdentifier {
        kind,
        digest: digest[..AnonymizedIdentifier::DIGEST_LEN].to_string(),
    }
    .to_string()
}

/// Sanitizer bound to one policy
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    policy: SanitizePolicy,
}

impl Sanitizer {
    pub fn new(policy: SanitizePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SanitizePolicy {
        &self.policy
    }

    /// Strip and anonymize PII, returning a new tree
    ///
    /// Scalars at the root are treated as already sanitized and returned
    /// as they are.
    pub fn sanitize(&self, raw: &StatTree) -> SanitizedTree {
        let mut clean = raw.clone();
        strip_denied(&mut clean, &self.policy.deny_list);
        let clean = self.anonymize(clean);

        debug_assert!(residual_pii(&clean, &self.policy).is_empty());
        SanitizedTree::from_sanitized(clean)
    }

    fn anonymize(&self, node: StatTree) -> StatTree {
        match node {
            StatTree::Map(map) => {
                let cleaned: BTreeMap<String, StatTree> = map
                    .into_iter()
                    .map(|(key, value)| {
                        let value = if self.policy.display_name_fields.contains(&key) {
                            StatTree::Null
                        } else if self.policy.identifier_fields.contains(&key) {
                            match value {
                                StatTree::String(raw) => {
                                    StatTree::String(anonymize_identifier(&raw))
                                }
                                other => self.anonymize(other),
                            }
                        } else {
                            self.anonymize(value)
                        };
                        (key, value)
                    })
                    .collect();
                StatTree::Map(cleaned)
            }
            StatTree::List(items) => {
                StatTree::List(items.into_iter().map(|item| self.anonymize(item)).collect())
            }
            scalar => scalar,
        }
    }
}

/// Sanitize with an explicit policy
pub fn sanitize(raw: &StatTree, policy: &SanitizePolicy) -> SanitizedTree {
    Sanitizer::new(policy.clone()).sanitize(raw)
}

/// Remove deny-listed keys at any depth
fn strip_denied(node: &mut StatTree, deny_list: &BTreeSet<String>) {
    match node {
        StatTree::Map(map) => {
            let before = map.len();
            map.retain(|key, _| !deny_list.contains(key));
            if map.len() != before {
                debug!("Dropped {} free-text field(s)", before - map.len());
            }
            for child in map.values_mut() {
                strip_denied(child, deny_list);
            }
        }
        StatTree::List(items) => {
            for item in items.iter_mut() {
                strip_denied(item, deny_list);
            }
        }
        _ => {}
    }
}

/// Visitor that records every location still carrying PII
struct PiiAudit<'a> {
    policy: &'a SanitizePolicy,
    findings: Vec<String>,
}

impl TreeVisitor for PiiAudit<'_> {
    fn visit(&mut self, path: &[PathStep], node: &StatTree) {
        let Some(PathStep::Key(key)) = path.last() else {
            return;
        };

        let leaked = if self.policy.deny_list.contains(key) {
            true
        } else if self.policy.display_name_fields.contains(key) {
            !node.is_null()
        } else if self.policy.identifier_fields.contains(key) {
            matches!(node.as_str(), Some(s) if s != UNKNOWN_IDENTIFIER && AnonymizedIdentifier::parse(s).is_none())
        } else {
            false
        };

        if leaked {
            self.findings.push(render_path(path));
        }
    }
}

/// Paths in `tree` that would be changed by sanitizing under `policy`
///
/// Empty for any sanitizer output.
pub fn residual_pii(tree: &StatTree, policy: &SanitizePolicy) -> Vec<String> {
    let mut audit = PiiAudit {
        policy,
        findings: Vec::new(),
    };
    tree.walk(&mut audit);
    audit.findings
}
