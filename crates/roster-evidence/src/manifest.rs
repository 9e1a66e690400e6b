//! Evidence manifests
//!
//! A manifest records the SHA-256 of every file in an exported artifact set,
//! an aggregate hash over those entries, and an HMAC signature over the
//! aggregate. The persisted JSON shape is fixed:
//!
//! ```json
//! {"pack_id": "...", "generated_at": "...", "files": {"name": "sha256"},
//!  "overall_hash": "...", "signature": "..."}
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::digest::Sha256Digest;
use crate::error::EvidenceError;
use crate::signer::EvidenceSigner;

/// Signed hash record of an artifact set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceManifest {
    /// Caller-chosen pack id
    pub pack_id: String,
    /// Build time
    pub generated_at: DateTime<Utc>,
    /// File name to lowercase hex SHA-256
    pub files: BTreeMap<String, String>,
    /// Hash over the sorted file entries, hex
    pub overall_hash: String,
    /// HMAC over the overall hash, hex
    pub signature: String,
}

impl EvidenceManifest {
    /// Parse a manifest from its persisted JSON form
    ///
    /// # Errors
    /// Returns error if the JSON does not match the manifest shape
    pub fn from_json(json: &str) -> Result<Self, EvidenceError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Persisted JSON form
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json_pretty(&self) -> Result<String, EvidenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Outcome of checking files against a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True when every listed file matches and the signature, if checked, holds
    pub passed: bool,
    /// Files whose hash differs from the manifest, or that are missing
    pub failures: Vec<String>,
    /// Files supplied but not listed in the manifest
    pub unexpected: Vec<String>,
    /// Whether the recomputed overall hash matches; `None` when not checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_hash_valid: Option<bool>,
    /// Whether the HMAC holds; `None` when no signer was given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_valid: Option<bool>,
}

/// Aggregate hash over the file table in name order
///
/// Each entry is fed as a length-prefixed name followed by a length-prefixed
/// lowercase hex hash (lengths are `u64` big-endian), so no name can collide
/// with another entry boundary.
#[must_use]
pub fn aggregate_hash(file_hashes: &BTreeMap<String, String>) -> Sha256Digest {
    let mut hasher = Sha256::new();
    for (name, hash) in file_hashes {
        let hash = hash.to_ascii_lowercase();
        hasher.update((name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
        hasher.update((hash.len() as u64).to_be_bytes());
        hasher.update(hash.as_bytes());
    }
    Sha256Digest::new(hasher.finalize().into())
}

fn validate_file_name(name: &str) -> Result<(), EvidenceError> {
    if name.is_empty() {
        return Err(EvidenceError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Hash and sign a file set
///
/// # Errors
/// Returns error if the pack id or a file name is empty
pub fn build_manifest(
    pack_id: &str,
    files: &BTreeMap<String, Vec<u8>>,
    signer: &EvidenceSigner,
    generated_at: DateTime<Utc>,
) -> Result<EvidenceManifest, EvidenceError> {
    if pack_id.trim().is_empty() {
        return Err(EvidenceError::EmptyPackId);
    }

    let mut file_hashes = BTreeMap::new();
    for (name, bytes) in files {
        validate_file_name(name)?;
        file_hashes.insert(name.clone(), Sha256Digest::compute(bytes).to_hex());
    }

    let overall = aggregate_hash(&file_hashes).to_hex();
    let signature = signer.sign(overall.as_bytes());

    tracing::debug!(
        pack_id,
        files = file_hashes.len(),
        overall_hash = %overall,
        key = signer.key_fingerprint(),
        "built evidence manifest"
    );

    Ok(EvidenceManifest {
        pack_id: pack_id.to_string(),
        generated_at,
        files: file_hashes,
        overall_hash: overall,
        signature,
    })
}

/// Recompute each file hash and compare against the manifest
///
/// Every mismatch is reported by name. Hex comparison ignores case.
#[must_use]
pub fn verify(manifest: &EvidenceManifest, files: &BTreeMap<String, Vec<u8>>) -> VerificationReport {
    let mut failures = Vec::new();
    for (name, recorded) in &manifest.files {
        match files.get(name) {
            Some(bytes) if Sha256Digest::compute(bytes).matches_hex(recorded) => {}
            _ => failures.push(name.clone()),
        }
    }

    let unexpected: Vec<String> = files
        .keys()
        .filter(|name| !manifest.files.contains_key(*name))
        .cloned()
        .collect();

    if !failures.is_empty() {
        tracing::warn!(pack_id = %manifest.pack_id, ?failures, "evidence verification failed");
    }

    VerificationReport {
        passed: failures.is_empty(),
        failures,
        unexpected,
        overall_hash_valid: None,
        signature_valid: None,
    }
}

/// [`verify`] plus aggregate-hash and signature checks
#[must_use]
pub fn verify_signed(
    manifest: &EvidenceManifest,
    files: &BTreeMap<String, Vec<u8>>,
    signer: &EvidenceSigner,
) -> VerificationReport {
    let mut report = verify(manifest, files);

    let overall_ok = aggregate_hash(&manifest.files).matches_hex(&manifest.overall_hash);
    let signature_ok = signer.verify(
        manifest.overall_hash.to_ascii_lowercase().as_bytes(),
        &manifest.signature,
    );

    report.passed = report.passed && overall_ok && signature_ok;
    report.overall_hash_valid = Some(overall_ok);
    report.signature_valid = Some(signature_ok);
    report
}

/// A file set together with its manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidencePack {
    /// Signed manifest
    pub manifest: EvidenceManifest,
    /// File contents by name
    pub files: BTreeMap<String, Vec<u8>>,
}

impl EvidencePack {
    /// Verify this pack's files against its own manifest
    #[must_use]
    pub fn verify(&self, signer: &EvidenceSigner) -> VerificationReport {
        verify_signed(&self.manifest, &self.files, signer)
    }
}

/// Collects files for an [`EvidencePack`]
#[derive(Debug, Clone, Default)]
pub struct EvidencePackBuilder {
    pack_id: String,
    files: BTreeMap<String, Vec<u8>>,
}

impl EvidencePackBuilder {
    /// Start a pack
    #[must_use]
    pub fn new(pack_id: impl Into<String>) -> Self {
        Self {
            pack_id: pack_id.into(),
            files: BTreeMap::new(),
        }
    }

    /// Add raw file bytes
    #[must_use]
    pub fn file(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.into(), bytes.into());
        self
    }

    /// Add a value as pretty JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn json_file<T: Serialize>(
        self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, EvidenceError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        Ok(self.file(name, bytes))
    }

    /// Hash, sign and seal the pack
    ///
    /// # Errors
    /// Returns error if the manifest cannot be built
    pub fn build(
        self,
        signer: &EvidenceSigner,
        generated_at: DateTime<Utc>,
    ) -> Result<EvidencePack, EvidenceError> {
        let manifest = build_manifest(&self.pack_id, &self.files, signer, generated_at)?;
        Ok(EvidencePack {
            manifest,
            files: self.files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signer() -> EvidenceSigner {
        EvidenceSigner::new(&[9u8; 32]).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
    }

    fn files() -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        files.insert("input.json".to_string(), b"{\"tours\":3}".to_vec());
        files.insert("output.json".to_string(), b"{\"assigned\":3}".to_vec());
        files
    }

    #[test]
    fn manifest_hashes_every_file() {
        let manifest = build_manifest("pack-1", &files(), &signer(), at()).unwrap();
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(
            manifest.files["input.json"],
            Sha256Digest::compute(b"{\"tours\":3}").to_hex()
        );
        assert_eq!(manifest.overall_hash, aggregate_hash(&manifest.files).to_hex());
    }

    #[test]
    fn rejects_empty_pack_id_and_empty_name() {
        assert!(matches!(
            build_manifest(" ", &files(), &signer(), at()),
            Err(EvidenceError::EmptyPackId)
        ));
        let mut bad = files();
        bad.insert(String::new(), vec![]);
        assert!(matches!(
            build_manifest("p", &bad, &signer(), at()),
            Err(EvidenceError::InvalidFileName(_))
        ));
    }

    #[test]
    fn timestamped_names_are_accepted() {
        let mut files = files();
        files.insert("roster_2026-03-02T06:00.json".to_string(), b"[]".to_vec());
        files.insert("notes\nwith newline.txt".to_string(), b"n".to_vec());
        let manifest = build_manifest("pack-ts", &files, &signer(), at()).unwrap();
        assert!(manifest.files.contains_key("roster_2026-03-02T06:00.json"));
        assert!(verify_signed(&manifest, &files, &signer()).passed);
    }

    #[test]
    fn entry_boundaries_cannot_be_shifted() {
        let hash = Sha256Digest::compute(b"x").to_hex();
        let mut split = BTreeMap::new();
        split.insert("a".to_string(), format!("{hash}\nb:{hash}"));
        let mut joined = BTreeMap::new();
        joined.insert("a".to_string(), hash.clone());
        joined.insert("b".to_string(), hash);
        assert_ne!(aggregate_hash(&split), aggregate_hash(&joined));
    }

    #[test]
    fn verify_reports_missing_and_unexpected() {
        let manifest = build_manifest("pack-1", &files(), &signer(), at()).unwrap();
        let mut supplied = files();
        supplied.remove("output.json");
        supplied.insert("extra.txt".to_string(), b"x".to_vec());

        let report = verify(&manifest, &supplied);
        assert!(!report.passed);
        assert_eq!(report.failures, vec!["output.json".to_string()]);
        assert_eq!(report.unexpected, vec!["extra.txt".to_string()]);
    }

    #[test]
    fn verify_accepts_uppercase_hashes() {
        let mut manifest = build_manifest("pack-1", &files(), &signer(), at()).unwrap();
        for hash in manifest.files.values_mut() {
            *hash = hash.to_uppercase();
        }
        manifest.overall_hash = manifest.overall_hash.to_uppercase();
        assert!(verify_signed(&manifest, &files(), &signer()).passed);
    }

    #[test]
    fn verify_signed_detects_forged_signature() {
        let mut manifest = build_manifest("pack-1", &files(), &signer(), at()).unwrap();
        manifest.signature = EvidenceSigner::new(&[1u8; 32])
            .unwrap()
            .sign(manifest.overall_hash.as_bytes());

        let report = verify_signed(&manifest, &files(), &signer());
        assert!(!report.passed);
        assert!(report.failures.is_empty());
        assert_eq!(report.overall_hash_valid, Some(true));
        assert_eq!(report.signature_valid, Some(false));
    }

    #[test]
    fn verify_signed_detects_edited_file_table() {
        let mut manifest = build_manifest("pack-1", &files(), &signer(), at()).unwrap();
        manifest
            .files
            .insert("input.json".to_string(), Sha256Digest::compute(b"x").to_hex());

        let report = verify_signed(&manifest, &files(), &signer());
        assert_eq!(report.failures, vec!["input.json".to_string()]);
        assert_eq!(report.overall_hash_valid, Some(false));
    }

    #[test]
    fn builder_produces_verifiable_pack() {
        let pack = EvidencePackBuilder::new("audit-7")
            .file("notes.txt", "hello")
            .json_file("plan.json", &serde_json::json!({"version": 2}))
            .unwrap()
            .build(&signer(), at())
            .unwrap();
        assert_eq!(pack.manifest.pack_id, "audit-7");
        assert!(pack.verify(&signer()).passed);
    }
}
