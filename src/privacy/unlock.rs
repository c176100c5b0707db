//! Unlock codes and the unlock gate
//!
//! A record created with an unlock code can release its hydration payload
//! to whoever presents the same code again. Comparison ignores ASCII case.
//! There is no fallback path: a wrong code is a mismatch, and a record
//! created without a code can never be unlocked.

use crate::error::{Result, UnlockError, WrapError};
use crate::storage::StatsStorage;
use crate::types::{HydrationPayload, RecordId, UnlockMaterial};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Six-character alphanumeric secret gating a hydration payload
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnlockCode(String);

impl UnlockCode {
    pub const LEN: usize = 6;

    /// Generate a fresh uppercase code
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..Self::LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Accept a code supplied at upload time
    ///
    /// The code is stored uppercased; surrounding whitespace is not trimmed.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::LEN && s.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then(|| Self(s.to_ascii_uppercase()))
    }

    /// Case-insensitive comparison against a presented code
    pub fn matches(&self, presented: &str) -> bool {
        self.0.eq_ignore_ascii_case(presented)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Never print the code itself
impl fmt::Debug for UnlockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnlockCode(******)")
    }
}

impl TryFrom<String> for UnlockCode {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| "unlock code must be 6 ASCII letters or digits".to_string())
    }
}

impl From<UnlockCode> for String {
    fn from(code: UnlockCode) -> Self {
        code.0
    }
}

/// Check a presented code against the unlock columns of a record
///
/// `None` means the record does not exist. A record with a code but no
/// stored payload reveals an empty payload.
pub fn verify_unlock(
    material: Option<UnlockMaterial>,
    presented: &str,
) -> std::result::Result<HydrationPayload, UnlockError> {
    let material = material.ok_or(UnlockError::NotFound)?;
    let code = material.unlock_code.ok_or(UnlockError::NoSecretConfigured)?;

    if !code.matches(presented) {
        return Err(UnlockError::Mismatch);
    }
    Ok(material.hydration.unwrap_or_default())
}

/// Releases hydration payloads from storage on a matching code
pub struct UnlockGate {
    storage: Arc<dyn StatsStorage>,
}

impl UnlockGate {
    pub fn new(storage: Arc<dyn StatsStorage>) -> Self {
        Self { storage }
    }

    /// Reveal the payload of record `id`
    pub async fn reveal(&self, id: &RecordId, presented: &str) -> Result<HydrationPayload> {
        let material = self.storage.unlock_material(id).await?;
        let payload = verify_unlock(material, presented).map_err(|e| {
            debug!("Unlock refused for {}: {}", id, e);
            WrapError::Unlock(e)
        })?;

        info!("Unlocked record {} ({} hydration entries)", id, payload.len());
        Ok(payload)
    }

    /// Reveal the payload of record `id`, which must belong to `year`
    pub async fn reveal_in_year(
        &self,
        year: i32,
        id: &RecordId,
        presented: &str,
    ) -> Result<HydrationPayload> {
        let material = self
            .storage
            .unlock_material(id)
            .await?
            .filter(|m| m.year == year);
        let payload = verify_unlock(material, presented).map_err(|e| {
            debug!("Unlock refused for {}/{}: {}", year, id, e);
            WrapError::Unlock(e)
        })?;

        info!("Unlocked record {}/{} ({} hydration entries)", year, id, payload.len());
        Ok(payload)
    }
}
