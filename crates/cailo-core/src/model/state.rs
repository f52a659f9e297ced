//! Canonical coordinator state and its persisted form.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{BlockMode, BlockRule, Domain, QuotaRecord};
use crate::error::StoreError;
use crate::quota::DecayPolicy;
use crate::storage::{keys, KvStore};

pub type QuotaMap = BTreeMap<Domain, QuotaRecord>;

/// Everything the coordinator owns. Saved wholesale on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalState {
    pub enabled: bool,
    pub mode: BlockMode,
    /// Newest first.
    pub rules: Vec<BlockRule>,
    pub quota_records: QuotaMap,
    /// Lockout events per calendar date (`YYYY-MM-DD`).
    pub lockout_counts: BTreeMap<String, u32>,
    /// Bumped on every rule or flag edit.
    pub revision: u64,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: BlockMode::Detox,
            rules: Vec::new(),
            quota_records: QuotaMap::new(),
            lockout_counts: BTreeMap::new(),
            revision: 0,
        }
    }
}

/// What [`GlobalState::repair`] changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub created: Vec<Domain>,
    pub dropped: Vec<Domain>,
    pub duplicate_rules: usize,
    pub floors_raised: usize,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.dropped.is_empty()
            && self.duplicate_rules == 0
            && self.floors_raised == 0
    }
}

fn read_key<T: DeserializeOwned + Default>(store: &impl KvStore, key: &str) -> T {
    match store.get(key) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding malformed persisted value");
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read persisted value");
            T::default()
        }
    }
}

impl GlobalState {
    /// Load from the store. Missing keys take their defaults; a key that
    /// cannot be read or decoded is logged and defaulted on its own.
    ///
    /// # Errors
    /// Returns an error only if the store cannot be queried at all.
    pub fn load(store: &impl KvStore) -> Result<Self, StoreError> {
        // Probe once so a dead store is reported instead of silently emptied.
        store.get(keys::ENABLED)?;

        let enabled: Option<bool> = read_key(store, keys::ENABLED);
        let mode: Option<BlockMode> = read_key(store, keys::MODE);
        Ok(Self {
            enabled: enabled.unwrap_or(true),
            mode: mode.unwrap_or_default(),
            rules: read_key(store, keys::RULES),
            quota_records: read_key(store, keys::QUOTA_RECORDS),
            lockout_counts: read_key(store, keys::LOCKOUT_COUNTS),
            revision: read_key(store, keys::REVISION),
        })
    }

    /// Write every key back in one call.
    pub fn save(&self, store: &mut impl KvStore) -> Result<(), StoreError> {
        let encode = |key: &str, value: serde_json::Result<Value>| {
            value.map_err(|e| StoreError::Malformed {
                key: key.to_string(),
                message: e.to_string(),
            })
        };
        let entries = vec![
            (keys::RULES, encode(keys::RULES, serde_json::to_value(&self.rules))?),
            (keys::ENABLED, Value::Bool(self.enabled)),
            (
                keys::QUOTA_RECORDS,
                encode(keys::QUOTA_RECORDS, serde_json::to_value(&self.quota_records))?,
            ),
            (keys::MODE, encode(keys::MODE, serde_json::to_value(self.mode))?),
            (
                keys::LOCKOUT_COUNTS,
                encode(keys::LOCKOUT_COUNTS, serde_json::to_value(&self.lockout_counts))?,
            ),
            (keys::REVISION, Value::from(self.revision)),
        ];
        store.set_many(entries)
    }

    pub fn rule(&self, domain: &Domain) -> Option<&BlockRule> {
        self.rules.iter().find(|r| &r.name == domain)
    }

    pub fn contains(&self, domain: &Domain) -> bool {
        self.rule(domain).is_some()
    }

    /// Re-establish the model invariants on loaded data: unique domains,
    /// one record per detox rule and none for anything else, limits at or
    /// above the floor.
    pub fn repair(&mut self, policy: &DecayPolicy, now: DateTime<Utc>) -> RepairReport {
        let mut report = RepairReport::default();

        let before = self.rules.len();
        let mut seen = std::collections::BTreeSet::new();
        self.rules.retain(|r| seen.insert(r.name.clone()));
        report.duplicate_rules = before - self.rules.len();

        for rule in self.rules.iter().filter(|r| r.detox_mode) {
            if !self.quota_records.contains_key(&rule.name) {
                self.quota_records
                    .insert(rule.name.clone(), QuotaRecord::new(policy, now));
                report.created.push(rule.name.clone());
            }
        }

        let detox: std::collections::BTreeSet<&Domain> = self
            .rules
            .iter()
            .filter(|r| r.detox_mode)
            .map(|r| &r.name)
            .collect();
        let orphans: Vec<Domain> = self
            .quota_records
            .keys()
            .filter(|d| !detox.contains(d))
            .cloned()
            .collect();
        for domain in orphans {
            self.quota_records.remove(&domain);
            report.dropped.push(domain);
        }

        let floor = f64::from(policy.floor_minutes);
        report.floors_raised = self
            .quota_records
            .values_mut()
            .filter_map(|rec| rec.enforce_floor(floor).then_some(()))
            .count();

        report
    }

    /// Toolbar badge: `OFF` when disabled, else the number of detox domains.
    pub fn badge_text(&self) -> String {
        if !self.enabled {
            return "OFF".to_string();
        }
        match self.quota_records.len() {
            0 => String::new(),
            n => n.to_string(),
        }
    }

    pub fn lockouts_on(&self, date_key: &str) -> u32 {
        self.lockout_counts.get(date_key).copied().unwrap_or(0)
    }

    pub fn total_lockouts(&self) -> u64 {
        self.lockout_counts.values().map(|&n| u64::from(n)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn domain(s: &str) -> Domain {
        Domain::parse(s).unwrap()
    }

    #[test]
    fn empty_store_loads_defaults() {
        let store = MemoryStore::new();
        let state = GlobalState::load(&store).unwrap();
        assert_eq!(state, GlobalState::default());
        assert!(state.enabled);
        assert_eq!(state.mode, BlockMode::Detox);
    }

    #[test]
    fn save_then_load_preserves_state() {
        let mut state = GlobalState::default();
        state.rules.push(BlockRule::new(domain("reddit.com"), Category::Social, BlockMode::Detox, now()));
        state
            .quota_records
            .insert(domain("reddit.com"), QuotaRecord::new(&DecayPolicy::default(), now()));
        state.lockout_counts.insert("2024-03-01".into(), 3);
        state.enabled = false;
        state.revision = 7;

        let mut store = MemoryStore::new();
        state.save(&mut store).unwrap();
        assert_eq!(store.raw(keys::MODE), Some(&json!("detox")));
        assert_eq!(GlobalState::load(&store).unwrap(), state);
    }

    #[test]
    fn malformed_key_defaults_only_that_key() {
        let mut store = MemoryStore::new();
        store.insert_raw(keys::ENABLED, json!(false));
        store.insert_raw(keys::RULES, json!("not a list"));
        let state = GlobalState::load(&store).unwrap();
        assert!(!state.enabled);
        assert!(state.rules.is_empty());
    }

    #[test]
    fn repair_creates_and_drops_records() {
        let mut state = GlobalState::default();
        state.rules.push(BlockRule::new(domain("reddit.com"), Category::Social, BlockMode::Detox, now()));
        state.rules.push(BlockRule::new(domain("chess.com"), Category::Game, BlockMode::Normal, now()));
        state.rules.push(BlockRule::new(domain("reddit.com"), Category::Social, BlockMode::Normal, now()));
        state
            .quota_records
            .insert(domain("chess.com"), QuotaRecord::new(&DecayPolicy::default(), now()));

        let report = state.repair(&DecayPolicy::default(), now());
        assert_eq!(report.created, vec![domain("reddit.com")]);
        assert_eq!(report.dropped, vec![domain("chess.com")]);
        assert_eq!(report.duplicate_rules, 1);
        assert_eq!(state.rules.len(), 2);
        assert!(state.quota_records.contains_key(&domain("reddit.com")));
        assert!(state.repair(&DecayPolicy::default(), now()).is_empty());
    }

    #[test]
    fn badge_reflects_enablement_and_count() {
        let mut state = GlobalState::default();
        assert_eq!(state.badge_text(), "");
        state
            .quota_records
            .insert(domain("reddit.com"), QuotaRecord::new(&DecayPolicy::default(), now()));
        assert_eq!(state.badge_text(), "1");
        state.enabled = false;
        assert_eq!(state.badge_text(), "OFF");
    }
}
