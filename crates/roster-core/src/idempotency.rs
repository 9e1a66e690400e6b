//! Idempotency-keyed request deduplication
//!
//! Every mutating operation is scoped by `(tenant, site, operation, key)`.
//! The first successful call stores a fingerprint of the request and the
//! serialized response. A retry with the same key and request gets the stored
//! bytes back; the same key with a different request is a conflict. Failed
//! calls store nothing, so the caller may retry them with the same key.

use std::collections::BTreeMap;

use roster_evidence::Sha256Digest;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::EngineError;
use crate::store::Tables;
use crate::types::{RequestContext, SiteId, TenantId};

/// Validated client-supplied idempotency key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Parse a key from an optional header value
    ///
    /// # Errors
    /// `IDEMPOTENCY_KEY_REQUIRED` when absent or blank, `VALIDATION_ERROR`
    /// when longer than `max_len`
    pub fn parse(
        raw: Option<&str>,
        operation: &'static str,
        max_len: usize,
    ) -> Result<Self, EngineError> {
        let key = raw.map(str::trim).unwrap_or_default();
        if key.is_empty() {
            return Err(EngineError::IdempotencyKeyRequired { operation });
        }
        if key.len() > max_len {
            return Err(EngineError::Validation(format!(
                "idempotency key longer than {max_len} bytes"
            )));
        }
        Ok(Self(key.to_string()))
    }

    /// The raw key
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ScopeKey {
    tenant_id: TenantId,
    site_id: SiteId,
    operation: &'static str,
    key: String,
}

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    fingerprint: Sha256Digest,
    response: Vec<u8>,
}

/// Stored responses by scope
#[derive(Debug, Clone, Default)]
pub struct IdempotencyTable {
    records: BTreeMap<ScopeKey, IdempotencyRecord>,
}

impl IdempotencyTable {
    fn scope(ctx: &RequestContext, operation: &'static str, key: &IdempotencyKey) -> ScopeKey {
        ScopeKey {
            tenant_id: ctx.tenant_id.clone(),
            site_id: ctx.site_id.clone(),
            operation,
            key: key.0.clone(),
        }
    }

    /// Stored response for this scope, if any
    ///
    /// # Errors
    /// `IDEMPOTENCY_CONFLICT` if the key was used with a different request
    pub fn replay<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        key: &IdempotencyKey,
        fingerprint: Sha256Digest,
    ) -> Result<Option<T>, EngineError> {
        let Some(record) = self.records.get(&Self::scope(ctx, operation, key)) else {
            return Ok(None);
        };
        if record.fingerprint != fingerprint {
            return Err(EngineError::IdempotencyConflict {
                operation,
                key: key.0.clone(),
            });
        }
        Ok(Some(serde_json::from_slice(&record.response)?))
    }

    /// Remember a successful response
    ///
    /// # Errors
    /// `INTERNAL` if the response cannot be serialized
    pub fn record<T: Serialize>(
        &mut self,
        ctx: &RequestContext,
        operation: &'static str,
        key: &IdempotencyKey,
        fingerprint: Sha256Digest,
        response: &T,
    ) -> Result<(), EngineError> {
        let response = serde_json::to_vec(response)?;
        self.records.insert(
            Self::scope(ctx, operation, key),
            IdempotencyRecord {
                fingerprint,
                response,
            },
        );
        Ok(())
    }

    /// Stored keys across every scope
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no key is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Run `op` at most once per key inside the current transaction
///
/// # Errors
/// Whatever `op` returns, or `IDEMPOTENCY_CONFLICT`
pub(crate) fn run_keyed<Req, Resp, F>(
    tx: &mut Tables,
    ctx: &RequestContext,
    operation: &'static str,
    key: &IdempotencyKey,
    request: &Req,
    op: F,
) -> Result<Resp, EngineError>
where
    Req: Serialize,
    Resp: Serialize + DeserializeOwned,
    F: FnOnce(&mut Tables) -> Result<Resp, EngineError>,
{
    let fingerprint = Sha256Digest::compute_json(request)?;
    if let Some(stored) = tx.idempotency().replay(ctx, operation, key, fingerprint)? {
        tracing::debug!(operation, key = key.as_str(), "idempotent replay");
        return Ok(stored);
    }
    let response = op(tx)?;
    tx.idempotency_mut()
        .record(ctx, operation, key, fingerprint, &response)?;
    Ok(response)
}
