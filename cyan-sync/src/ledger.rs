//! Pending-operation ledger and seen-id dedup shared by every store.
//!
//! ```text
//!  optimistic apply ──► register(temp_id, fingerprint) ──► nonce (sent as client_ref)
//!
//!  confirming event ──► resolve(client_ref?, fingerprint)
//!                         ├─ client_ref present: match on nonce only
//!                         └─ client_ref absent:  oldest entry with that fingerprint
//!
//!  sweep ──► expire(now): entries older than the timeout leave the ledger
//! ```
//!
//! Matching the oldest entry first keeps two identical sends from the same
//! author (same fingerprint) resolving in send order.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Content key derived from semantically stable fields (never the temp id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// FNV-1a over the parts, with a separator byte so `["ab","c"]` and
    /// `["a","bc"]` differ.
    pub fn of(parts: &[&str]) -> Self {
        let mut hash = FNV_OFFSET;
        for part in parts {
            for byte in part.as_bytes() {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
            hash ^= 0xff;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        Fingerprint(hash)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Monotonic, namespaced temporary ids: `local_1`, `local_2`, ...
#[derive(Debug, Clone)]
pub struct TempIds {
    prefix: &'static str,
    next: u64,
}

impl TempIds {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 1 }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        id
    }

    pub fn is_temp(&self, id: &str) -> bool {
        id.starts_with(self.prefix)
    }
}

/// An optimistic mutation awaiting confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation<K> {
    pub temp_id: String,
    /// Correlation nonce sent to the engine as `client_ref`.
    pub nonce: String,
    pub fingerprint: Fingerprint,
    pub created_at: Instant,
    /// What was mutated (store-specific).
    pub entity: K,
}

impl<K> PendingOperation<K> {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Age-ordered ledger of pending operations.
#[derive(Debug, Clone)]
pub struct PendingLedger<K> {
    entries: VecDeque<PendingOperation<K>>,
    timeout: Duration,
}

impl<K> PendingLedger<K> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            timeout,
        }
    }

    /// Record an optimistic mutation; returns the correlation nonce.
    pub fn register(
        &mut self,
        temp_id: impl Into<String>,
        fingerprint: Fingerprint,
        entity: K,
        now: Instant,
    ) -> String {
        let nonce = Uuid::new_v4().to_string();
        self.entries.push_back(PendingOperation {
            temp_id: temp_id.into(),
            nonce: nonce.clone(),
            fingerprint,
            created_at: now,
            entity,
        });
        nonce
    }

    /// Find and remove the operation a confirming event answers.
    ///
    /// A `client_ref` the ledger never issued belongs to another client, so
    /// it never falls back to content matching.
    pub fn resolve(
        &mut self,
        client_ref: Option<&str>,
        fingerprint: Fingerprint,
    ) -> Option<PendingOperation<K>> {
        let position = match client_ref {
            Some(nonce) => self.entries.iter().position(|op| op.nonce == nonce),
            None => self
                .entries
                .iter()
                .position(|op| op.fingerprint == fingerprint),
        };
        position.and_then(|i| self.entries.remove(i))
    }

    /// Content-only match restricted by `accept`: the oldest operation with
    /// this fingerprint that `accept` admits.
    pub fn resolve_matching(
        &mut self,
        fingerprint: Fingerprint,
        mut accept: impl FnMut(&PendingOperation<K>) -> bool,
    ) -> Option<PendingOperation<K>> {
        let position = self
            .entries
            .iter()
            .position(|op| op.fingerprint == fingerprint && accept(op))?;
        self.entries.remove(position)
    }

    /// Remove the operation for a temp id (e.g. the entity was deleted locally).
    pub fn take_temp(&mut self, temp_id: &str) -> Option<PendingOperation<K>> {
        let position = self.entries.iter().position(|op| op.temp_id == temp_id)?;
        self.entries.remove(position)
    }

    pub fn retain(&mut self, keep: impl FnMut(&PendingOperation<K>) -> bool) {
        self.entries.retain(keep);
    }

    /// Drop every operation at least `timeout` old, returning them.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingOperation<K>> {
        let timeout = self.timeout;
        let mut expired = Vec::new();
        // Entries are age-ordered, so expired ones form a prefix.
        while self
            .entries
            .front()
            .is_some_and(|op| op.age(now) >= timeout)
        {
            if let Some(op) = self.entries.pop_front() {
                expired.push(op);
            }
        }
        expired
    }

    pub fn contains_temp(&self, temp_id: &str) -> bool {
        self.entries.iter().any(|op| op.temp_id == temp_id)
    }

    pub fn get(&self, temp_id: &str) -> Option<&PendingOperation<K>> {
        self.entries.iter().find(|op| op.temp_id == temp_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOperation<K>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Confirmed ids a store has already applied.
#[derive(Debug, Clone, Default)]
pub struct SeenIds {
    ids: HashSet<String>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `id` had not been seen before.
    pub fn mark(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn forget(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_separated() {
        assert_eq!(Fingerprint::of(&["me", "hello"]), Fingerprint::of(&["me", "hello"]));
        assert_ne!(Fingerprint::of(&["ab", "c"]), Fingerprint::of(&["a", "bc"]));
        assert_ne!(Fingerprint::of(&["me", "hello"]), Fingerprint::of(&["you", "hello"]));
        assert_eq!(Fingerprint::of(&["x"]).to_string().len(), 16);
    }

    #[test]
    fn test_temp_ids_are_monotonic() {
        let mut ids = TempIds::new("local_");
        assert_eq!(ids.next_id(), "local_1");
        assert_eq!(ids.next_id(), "local_2");
        assert!(ids.is_temp("local_9"));
        assert!(!ids.is_temp("g-42"));
    }

    #[test]
    fn test_resolve_by_nonce() {
        let now = Instant::now();
        let mut ledger = PendingLedger::new(Duration::from_secs(30));
        let fp = Fingerprint::of(&["me", "hi"]);
        let _first = ledger.register("temp_1", fp, (), now);
        let second = ledger.register("temp_2", fp, (), now);

        let op = ledger.resolve(Some(&second), fp).unwrap();
        assert_eq!(op.temp_id, "temp_2");
        assert!(ledger.contains_temp("temp_1"));
    }

    #[test]
    fn test_resolve_by_fingerprint_takes_oldest() {
        let now = Instant::now();
        let mut ledger = PendingLedger::new(Duration::from_secs(30));
        let fp = Fingerprint::of(&["me", "same text"]);
        ledger.register("temp_1", fp, (), now);
        ledger.register("temp_2", fp, (), now);

        assert_eq!(ledger.resolve(None, fp).unwrap().temp_id, "temp_1");
        assert_eq!(ledger.resolve(None, fp).unwrap().temp_id, "temp_2");
        assert!(ledger.resolve(None, fp).is_none());
    }

    #[test]
    fn test_resolve_matching_skips_rejected_entries() {
        let mut ledger = PendingLedger::new(Duration::from_secs(30));
        let fp = Fingerprint::of(&["w1", "me", "ok"]);
        let now = Instant::now();
        ledger.register("temp_1", fp, 1u8, now);
        ledger.register("temp_2", fp, 2u8, now);

        assert!(ledger.resolve_matching(fp, |_| false).is_none());
        let op = ledger.resolve_matching(fp, |op| op.entity == 2).unwrap();
        assert_eq!(op.temp_id, "temp_2");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_foreign_nonce_never_matches_content() {
        let now = Instant::now();
        let mut ledger = PendingLedger::new(Duration::from_secs(30));
        let fp = Fingerprint::of(&["me", "hi"]);
        ledger.register("temp_1", fp, (), now);

        assert!(ledger.resolve(Some("someone-elses-nonce"), fp).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_expire_after_timeout() {
        let t0 = Instant::now();
        let mut ledger = PendingLedger::new(Duration::from_secs(30));
        ledger.register("local_1", Fingerprint::of(&["a"]), "group", t0);
        ledger.register("local_2", Fingerprint::of(&["b"]), "group", t0 + Duration::from_secs(10));

        assert!(ledger.expire(t0 + Duration::from_secs(29)).is_empty());

        let expired = ledger.expire(t0 + Duration::from_secs(30) + Duration::from_millis(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].temp_id, "local_1");
        assert_eq!(expired[0].entity, "group");
        assert!(!ledger.contains_temp("local_1"));
        assert!(ledger.contains_temp("local_2"));
    }

    #[test]
    fn test_take_temp_and_retain() {
        let now = Instant::now();
        let mut ledger = PendingLedger::new(Duration::from_secs(30));
        ledger.register("local_1", Fingerprint::of(&["a"]), 1u8, now);
        ledger.register("local_2", Fingerprint::of(&["b"]), 2u8, now);
        ledger.register("local_3", Fingerprint::of(&["c"]), 3u8, now);

        assert_eq!(ledger.take_temp("local_2").map(|op| op.entity), Some(2));
        ledger.retain(|op| op.entity != 3);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get("local_1").is_some());
    }

    #[test]
    fn test_seen_ids() {
        let mut seen = SeenIds::new();
        assert!(seen.mark("g-42"));
        assert!(!seen.mark("g-42"));
        assert!(seen.contains("g-42"));
        assert!(seen.forget("g-42"));
        assert!(seen.is_empty());
    }
}
