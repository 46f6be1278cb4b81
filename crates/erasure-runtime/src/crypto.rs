//! SHA-256 hashing, canonical serialization, the hash-chain link function, and
//! detached certificate signatures (spec.md §2, "Crypto utilities").
//!
//! Canonicalization is sorted-key, UTF-8, whitespace-free JSON — the design
//! notes flag the source's canonicalization as unspecified, so this is the
//! one pinned encoding (spec.md §9, open question 3).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize `value` to canonical JSON: object keys sorted, no insignificant
/// whitespace. `serde_json::Value`'s `BTreeMap`-backed object representation
/// already sorts keys when the `preserve_order` feature is not enabled, so a
/// round-trip through `Value` is sufficient to canonicalize arbitrary `T`.
pub fn canonicalize<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let as_value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&as_value)?)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Genesis hash for a fresh audit trail: `SHA256("genesis:{workflow_id}:{created_at}")`
/// (spec.md §3, "Audit trail").
pub fn genesis_hash(workflow_id: &str, created_at: &str) -> String {
    sha256_hex(format!("genesis:{workflow_id}:{created_at}").as_bytes())
}

/// Hash-chain link function: `SHA256(previous_hash || canonical(event))`.
pub fn link_hash(previous_hash: &str, canonical_event: &str) -> String {
    let mut buf = String::with_capacity(previous_hash.len() + canonical_event.len());
    buf.push_str(previous_hash);
    buf.push_str(canonical_event);
    sha256_hex(buf.as_bytes())
}

/// Process-wide signing key for certificates of destruction (spec.md §6).
pub struct SigningContext {
    key: SigningKey,
}

impl SigningContext {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign `(workflow_id, audit_hash_root, policy_version, issued_at)` joined
    /// with `|` (spec.md §4.10 step 3).
    pub fn sign_certificate(
        &self,
        workflow_id: &str,
        audit_hash_root: &str,
        policy_version: &str,
        issued_at: &str,
    ) -> String {
        let message = format!("{workflow_id}|{audit_hash_root}|{policy_version}|{issued_at}");
        let signature: Signature = self.key.sign(message.as_bytes());
        hex::encode(signature.to_bytes())
    }

    pub fn verify_certificate(
        &self,
        workflow_id: &str,
        audit_hash_root: &str,
        policy_version: &str,
        issued_at: &str,
        signature_hex: &str,
    ) -> bool {
        let message = format!("{workflow_id}|{audit_hash_root}|{policy_version}|{issued_at}");
        let Ok(raw) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(array) = <[u8; 64]>::try_from(raw.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&array);
        self.verifying_key()
            .verify(message.as_bytes(), &signature)
            .is_ok()
    }
}
