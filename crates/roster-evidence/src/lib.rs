//! Roster Evidence
//!
//! Tamper-evident hashing for exported artifact sets: snapshot publishes and
//! audit-pack exports both seal their files with an [`EvidenceManifest`].
//!
//! # Core Concepts
//!
//! - [`Sha256Digest`]: 32-byte SHA-256 digest, hex on the wire
//! - [`EvidenceSigner`]: HMAC-SHA256 key handle, passed explicitly
//! - [`build_manifest`] / [`verify`]: per-file hashes, aggregate, signature
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use roster_evidence::{build_manifest, verify, EvidenceSigner};
//!
//! let signer = EvidenceSigner::new(&[42u8; 32]).unwrap();
//! let mut files = BTreeMap::new();
//! files.insert("plan.json".to_string(), b"{}".to_vec());
//!
//! let manifest = build_manifest("pack-1", &files, &signer, chrono::Utc::now()).unwrap();
//! assert!(verify(&manifest, &files).passed);
//! ```

#![warn(unreachable_pub)]

mod digest;
mod error;
mod manifest;
mod signer;

pub use digest::Sha256Digest;
pub use error::EvidenceError;
pub use manifest::{
    aggregate_hash, build_manifest, verify, verify_signed, EvidenceManifest, EvidencePack,
    EvidencePackBuilder, VerificationReport,
};
pub use signer::{EvidenceSigner, MIN_KEY_LEN};
