//! Engine configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! yields a usable configuration.

use std::path::{Path, PathBuf};

use chrono::Duration;
use roster_evidence::{EvidenceError, EvidenceSigner};
use serde::{Deserialize, Serialize};

/// Environment variable consulted when no signing key is configured
pub const SIGNING_KEY_ENV: &str = "ROSTER_EVIDENCE_KEY";

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Neither the config nor the environment holds a key
    #[error("no evidence signing key: set [evidence].signing_key_hex or {SIGNING_KEY_ENV}")]
    MissingSigningKey,

    /// The key was found but is unusable
    #[error("evidence signing key rejected: {0}")]
    SigningKey(#[from] EvidenceError),
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minutes between publish and automatic freeze
    pub freeze_horizon_minutes: i64,
    /// Repair session lifetime in minutes
    pub session_ttl_minutes: i64,
    /// Number of proposals returned by repair preview
    pub proposal_top_k: usize,
    /// Longest accepted idempotency key, in bytes
    pub max_idempotency_key_len: usize,
    /// Evidence signing settings
    pub evidence: EvidenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            freeze_horizon_minutes: 60,
            session_ttl_minutes: 30,
            proposal_top_k: 3,
            max_idempotency_key_len: 255,
            evidence: EvidenceConfig::default(),
        }
    }
}

/// `[evidence]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Hex-encoded HMAC key; falls back to [`SIGNING_KEY_ENV`]
    pub signing_key_hex: Option<String>,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With freeze horizon
    #[inline]
    #[must_use]
    pub fn with_freeze_horizon_minutes(mut self, minutes: i64) -> Self {
        self.freeze_horizon_minutes = minutes;
        self
    }

    /// With session TTL
    #[inline]
    #[must_use]
    pub fn with_session_ttl_minutes(mut self, minutes: i64) -> Self {
        self.session_ttl_minutes = minutes;
        self
    }

    /// With preview top-k
    #[inline]
    #[must_use]
    pub fn with_proposal_top_k(mut self, k: usize) -> Self {
        self.proposal_top_k = k;
        self
    }

    /// Parse configuration from a TOML string
    ///
    /// # Errors
    /// Returns error if the TOML is invalid or a value is out of range
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, or defaults when `path` is `None`
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Range checks
    ///
    /// # Errors
    /// `ConfigError::Validation` naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.freeze_horizon_minutes < 0 {
            return Err(ConfigError::Validation(
                "freeze_horizon_minutes must not be negative".into(),
            ));
        }
        if self.session_ttl_minutes <= 0 {
            return Err(ConfigError::Validation(
                "session_ttl_minutes must be positive".into(),
            ));
        }
        if self.proposal_top_k == 0 {
            return Err(ConfigError::Validation("proposal_top_k must be positive".into()));
        }
        if self.max_idempotency_key_len == 0 {
            return Err(ConfigError::Validation(
                "max_idempotency_key_len must be positive".into(),
            ));
        }
        Ok(())
    }

    /// `freeze_horizon_minutes` as a duration
    #[must_use]
    pub fn freeze_horizon(&self) -> Duration {
        Duration::minutes(self.freeze_horizon_minutes)
    }

    /// `session_ttl_minutes` as a duration
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::minutes(self.session_ttl_minutes)
    }

    /// Build the evidence signer from config, then the environment
    ///
    /// # Errors
    /// `MissingSigningKey` if neither source provides a key
    pub fn signer(&self) -> Result<EvidenceSigner, ConfigError> {
        let configured = self.evidence.signing_key_hex.clone();
        let hex_key = configured
            .or_else(|| std::env::var(SIGNING_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingSigningKey)?;
        Ok(EvidenceSigner::from_hex(&hex_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.freeze_horizon(), Duration::minutes(60));
        assert_eq!(config.session_ttl(), Duration::minutes(30));
    }

    #[test]
    fn partial_toml_overrides() {
        let config = EngineConfig::from_toml(
            "freeze_horizon_minutes = 15\n[evidence]\nsigning_key_hex = \"000102030405060708090a0b0c0d0e0f\"\n",
        )
        .unwrap();
        assert_eq!(config.freeze_horizon_minutes, 15);
        assert_eq!(config.proposal_top_k, 3);
        assert!(config.signer().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            EngineConfig::from_toml("session_ttl_minutes = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("proposal_top_k = \"three\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn short_key_is_rejected() {
        let config = EngineConfig::from_toml("[evidence]\nsigning_key_hex = \"abcd\"").unwrap();
        assert!(matches!(config.signer(), Err(ConfigError::SigningKey(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "proposal_top_k = 5").unwrap();
        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.proposal_top_k, 5);
        assert_eq!(EngineConfig::load(None).unwrap(), EngineConfig::default());
    }
}
