//! Append-only audit trail
//!
//! Each tenant+site owns its own hash chain: `seq` counts from zero within
//! the scope and `prev_hash` links to the previous row of the same scope, so
//! an exported slice can be re-verified without any other tenant's rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use roster_evidence::Sha256Digest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::EngineError;
use crate::types::{RequestContext, SiteId, TenantId};

/// One append-only, hash-chained audit row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the scope's chain, from zero
    pub seq: u64,
    /// Unique per row
    pub event_id: Uuid,
    /// Engine time of the event
    pub at: DateTime<Utc>,
    /// Tenant whose chain holds the row
    pub tenant_id: TenantId,
    /// Site whose chain holds the row
    pub site_id: SiteId,
    /// Actor id of the caller
    pub actor: String,
    /// Dotted event name, e.g. `plan.locked`
    pub action: String,
    /// Id of the row the event is about
    pub subject: String,
    /// Event-specific payload
    pub detail: serde_json::Value,
    /// `hash` of the previous row in the scope; zero for the first
    pub prev_hash: Sha256Digest,
    /// SHA-256 over every other field, `prev_hash` included
    pub hash: Sha256Digest,
}

type Scope = (TenantId, SiteId);

/// Audit rows can be appended, never edited.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    chains: BTreeMap<Scope, Vec<AuditRecord>>,
}

impl AuditLog {
    /// Append a row to the caller's chain and return its `seq`
    pub fn append(
        &mut self,
        ctx: &RequestContext,
        at: DateTime<Utc>,
        action: &str,
        subject: impl ToString,
        detail: serde_json::Value,
    ) -> u64 {
        let chain = self
            .chains
            .entry((ctx.tenant_id.clone(), ctx.site_id.clone()))
            .or_default();
        let prev_hash = chain.last().map(|r| r.hash).unwrap_or_default();
        let mut record = AuditRecord {
            seq: chain.len() as u64,
            event_id: Uuid::new_v4(),
            at,
            tenant_id: ctx.tenant_id.clone(),
            site_id: ctx.site_id.clone(),
            actor: ctx.actor.id.clone(),
            action: action.to_string(),
            subject: subject.to_string(),
            detail,
            prev_hash,
            hash: Sha256Digest::default(),
        };
        record.hash = compute_hash(&record);
        let seq = record.seq;
        chain.push(record);
        seq
    }

    /// The caller's whole chain, in order
    #[must_use]
    pub fn records_for(&self, ctx: &RequestContext) -> Vec<AuditRecord> {
        self.chains
            .get(&(ctx.tenant_id.clone(), ctx.site_id.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Rows across every scope
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.values().map(Vec::len).sum()
    }

    /// True before the first append
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.values().all(Vec::is_empty)
    }

    /// Walk every scope's chain
    ///
    /// # Errors
    /// `INTERNAL` naming the first broken row
    pub fn verify_integrity(&self) -> Result<(), EngineError> {
        self.chains.values().try_for_each(|chain| verify_chain(chain))
    }

    #[cfg(test)]
    pub(crate) fn records_mut(&mut self, ctx: &RequestContext) -> &mut Vec<AuditRecord> {
        self.chains
            .entry((ctx.tenant_id.clone(), ctx.site_id.clone()))
            .or_default()
    }
}

/// Check one scope's chain, e.g. the `audit_log.json` of an exported pack
///
/// The rows must start at `seq` 0, share one tenant and site, link each
/// `prev_hash` to the row before, and hash to their stored `hash`.
///
/// # Errors
/// `INTERNAL` naming the first broken row
pub fn verify_chain(records: &[AuditRecord]) -> Result<(), EngineError> {
    let mut prev = Sha256Digest::default();
    let scope = records.first().map(|r| (&r.tenant_id, &r.site_id));
    for (i, r) in records.iter().enumerate() {
        if r.seq != i as u64
            || Some((&r.tenant_id, &r.site_id)) != scope
            || r.prev_hash != prev
            || r.hash != compute_hash(r)
        {
            return Err(EngineError::Internal(format!(
                "audit chain broken at seq {i}"
            )));
        }
        prev = r.hash;
    }
    Ok(())
}

fn compute_hash(record: &AuditRecord) -> Sha256Digest {
    let mut hasher = Sha256::new();
    hasher.update(record.seq.to_le_bytes());
    hasher.update(record.event_id.as_bytes());
    hasher.update(record.at.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update(record.tenant_id.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(record.site_id.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(record.actor.as_bytes());
    hasher.update([0]);
    hasher.update(record.action.as_bytes());
    hasher.update([0]);
    hasher.update(record.subject.as_bytes());
    hasher.update([0]);
    hasher.update(record.detail.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(record.prev_hash.as_bytes());
    Sha256Digest::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, Role};

    fn ctx(tenant: &str) -> RequestContext {
        RequestContext::new(tenant, "depot-1", Actor::new("ops", Role::Approver)).unwrap()
    }

    #[test]
    fn chain_links_records() {
        let mut log = AuditLog::default();
        log.append(&ctx("t1"), Utc::now(), "plan.created", "p1", serde_json::json!({}));
        log.append(&ctx("t1"), Utc::now(), "plan.locked", "p1", serde_json::json!({"reason": "x"}));
        assert_eq!(log.len(), 2);
        assert!(log.verify_integrity().is_ok());
    }

    #[test]
    fn tampering_is_detected() {
        let mut log = AuditLog::default();
        log.append(&ctx("t1"), Utc::now(), "plan.locked", "p1", serde_json::json!({}));
        log.append(&ctx("t1"), Utc::now(), "snapshot.frozen", "s1", serde_json::json!({}));
        log.records_mut(&ctx("t1"))[0].action = "plan.unlocked".into();
        assert!(log.verify_integrity().is_err());
    }

    #[test]
    fn records_are_tenant_scoped() {
        let mut log = AuditLog::default();
        log.append(&ctx("t1"), Utc::now(), "a", "x", serde_json::Value::Null);
        log.append(&ctx("t2"), Utc::now(), "b", "y", serde_json::Value::Null);
        let visible = log.records_for(&ctx("t1"));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].action, "a");
    }

    #[test]
    fn interleaved_scopes_keep_separate_chains() {
        let mut log = AuditLog::default();
        for i in 0..3 {
            log.append(&ctx("t1"), Utc::now(), "a", i, serde_json::Value::Null);
            log.append(&ctx("t2"), Utc::now(), "b", i, serde_json::Value::Null);
        }
        let t1 = log.records_for(&ctx("t1"));
        let seqs: Vec<u64> = t1.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(verify_chain(&t1).is_ok());
        assert!(verify_chain(&log.records_for(&ctx("t2"))).is_ok());
    }

    #[test]
    fn spliced_or_truncated_slices_fail() {
        let mut log = AuditLog::default();
        for i in 0..3 {
            log.append(&ctx("t1"), Utc::now(), "a", i, serde_json::Value::Null);
        }
        log.append(&ctx("t2"), Utc::now(), "b", 0, serde_json::Value::Null);
        let t1 = log.records_for(&ctx("t1"));

        assert!(verify_chain(&t1[1..]).is_err());
        let mut spliced = t1.clone();
        spliced.remove(1);
        assert!(verify_chain(&spliced).is_err());
        let mut mixed = t1[..1].to_vec();
        mixed.extend(log.records_for(&ctx("t2")));
        assert!(verify_chain(&mixed).is_err());
        assert!(verify_chain(&[]).is_ok());
    }
}
