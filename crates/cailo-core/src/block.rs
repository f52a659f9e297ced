//! Block decision engine.
//!
//! [`evaluate`] is the pure predicate used by replicas; [`decide`] is the
//! coordinator path, which rebases the matched record before reading it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::{BlockRule, Domain, GlobalState, QuotaMap};
use crate::quota::QuotaScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    /// Non-detox rule: always blocked.
    Hard,
    /// Detox rule whose daily budget is spent.
    QuotaExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum Verdict {
    Allowed,
    Blocked { domain: Domain, reason: BlockReason },
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked { .. })
    }
}

/// Hostname of a web URL, lowercased, without a trailing dot.
///
/// Anything that does not parse, or is not `http`/`https`, yields `None`.
pub fn resolve_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

pub fn matching_rule<'a>(rules: &'a [BlockRule], host: &str) -> Option<&'a BlockRule> {
    rules.iter().find(|r| r.name.matches_host(host))
}

fn verdict_for(rule: &BlockRule, quotas: &QuotaMap) -> Verdict {
    let blocked = |reason| Verdict::Blocked {
        domain: rule.name.clone(),
        reason,
    };
    if !rule.detox_mode {
        return blocked(BlockReason::Hard);
    }
    match quotas.get(&rule.name) {
        Some(record) if record.is_exhausted() => blocked(BlockReason::QuotaExhausted),
        Some(_) => Verdict::Allowed,
        // Detox rule without a record: treat as hard until repaired.
        None => blocked(BlockReason::Hard),
    }
}

/// Evaluate `url` against a snapshot without touching it.
pub fn evaluate(enabled: bool, rules: &[BlockRule], quotas: &QuotaMap, url: &str) -> Verdict {
    if !enabled {
        return Verdict::Allowed;
    }
    let Some(host) = resolve_host(url) else {
        return Verdict::Allowed;
    };
    match matching_rule(rules, &host) {
        Some(rule) => verdict_for(rule, quotas),
        None => Verdict::Allowed,
    }
}

/// Decide for the canonical state: rebase the matched record, then read.
///
/// The second value reports whether the rebase changed state.
pub fn decide(
    state: &mut GlobalState,
    scheduler: &QuotaScheduler,
    url: &str,
    now: DateTime<Utc>,
) -> (Verdict, bool) {
    if !state.enabled {
        return (Verdict::Allowed, false);
    }
    let Some(host) = resolve_host(url) else {
        return (Verdict::Allowed, false);
    };
    let Some(rule) = matching_rule(&state.rules, &host) else {
        return (Verdict::Allowed, false);
    };
    let mut rebased = false;
    if rule.detox_mode {
        if let Some(record) = state.quota_records.get_mut(&rule.name) {
            rebased = scheduler.rebase_if_stale(record, now);
        }
    }
    (verdict_for(rule, &state.quota_records), rebased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockMode, Category, QuotaRecord};
    use crate::quota::DecayPolicy;
    use chrono::{FixedOffset, TimeZone};

    fn t(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn state_with(domain: &str, mode: BlockMode) -> GlobalState {
        let name = Domain::parse(domain).unwrap();
        let mut state = GlobalState::default();
        if mode == BlockMode::Detox {
            state
                .quota_records
                .insert(name.clone(), QuotaRecord::new(&DecayPolicy::default(), t(1, 8)));
        }
        state.rules.push(BlockRule::new(name, Category::Social, mode, t(1, 8)));
        state
    }

    #[test]
    fn resolve_host_handles_schemes_and_case() {
        assert_eq!(resolve_host("https://WWW.Reddit.com./r/rust"), Some("www.reddit.com".into()));
        assert_eq!(resolve_host("chrome://extensions"), None);
        assert_eq!(resolve_host("about:blank"), None);
        assert_eq!(resolve_host("not a url"), None);
    }

    #[test]
    fn disabled_never_blocks() {
        let mut state = state_with("reddit.com", BlockMode::Normal);
        state.enabled = false;
        let v = evaluate(state.enabled, &state.rules, &state.quota_records, "https://reddit.com");
        assert_eq!(v, Verdict::Allowed);
    }

    #[test]
    fn hard_rule_blocks_subdomains() {
        let state = state_with("reddit.com", BlockMode::Normal);
        let v = evaluate(true, &state.rules, &state.quota_records, "https://old.reddit.com/");
        assert!(matches!(v, Verdict::Blocked { reason: BlockReason::Hard, .. }));
        let v = evaluate(true, &state.rules, &state.quota_records, "https://notreddit.com/");
        assert_eq!(v, Verdict::Allowed);
    }

    #[test]
    fn detox_blocks_only_when_exhausted() {
        let mut state = state_with("reddit.com", BlockMode::Detox);
        let url = "https://reddit.com/";
        assert_eq!(evaluate(true, &state.rules, &state.quota_records, url), Verdict::Allowed);
        let name = Domain::parse("reddit.com").unwrap();
        if let Some(rec) = state.quota_records.get_mut(&name) {
            rec.add_usage(60.0, t(1, 10));
        }
        let v = evaluate(true, &state.rules, &state.quota_records, url);
        assert!(matches!(v, Verdict::Blocked { reason: BlockReason::QuotaExhausted, .. }));
    }

    #[test]
    fn decide_rebases_before_reading() {
        let sched = QuotaScheduler::new(DecayPolicy::default(), FixedOffset::east_opt(0).unwrap());
        let mut state = state_with("reddit.com", BlockMode::Detox);
        let name = Domain::parse("reddit.com").unwrap();
        if let Some(rec) = state.quota_records.get_mut(&name) {
            rec.add_usage(60.0, t(1, 10));
        }
        let (v, rebased) = decide(&mut state, &sched, "https://reddit.com", t(1, 20));
        assert!(v.is_blocked());
        assert!(!rebased);

        let (v, rebased) = decide(&mut state, &sched, "https://reddit.com", t(2, 9));
        assert_eq!(v, Verdict::Allowed);
        assert!(rebased);
        assert_eq!(state.quota_records[&name].daily_limit(), 50.0);
    }
}
