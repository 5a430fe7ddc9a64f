//! Incomplete-structures table.
//!
//! Tracks every materialized structure that still has configurations left to
//! submit in the current repetition. Each entry holds the structure, its
//! remaining budget and the number of its evaluations currently running.
//!
//! `remaining + running` never increases for an entry: claiming moves one
//! unit from `remaining` to `running`, releasing drops one from `running`.
//! An entry is removed as soon as its last configuration is claimed, so
//! completions of its outstanding evaluations find no entry and leave the
//! table untouched.
//!
//! The table is not synchronized; the scheduler only touches it while holding
//! its shared-state lock.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::model::{CandidateId, CandidateStructure};

/// Policy picking the next incomplete structure to draw a configuration from.
///
/// No fairness or priority guarantee is attached to any of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Uniform choice among incomplete structures.
    #[default]
    Random,
    /// Cycle through incomplete structures in id order.
    RoundRobin,
    /// Always the structure registered first.
    OldestFirst,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::Random => write!(f, "random"),
            SelectionPolicy::RoundRobin => write!(f, "round-robin"),
            SelectionPolicy::OldestFirst => write!(f, "oldest-first"),
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "random" => Ok(SelectionPolicy::Random),
            "round-robin" => Ok(SelectionPolicy::RoundRobin),
            "oldest-first" => Ok(SelectionPolicy::OldestFirst),
            other => Err(format!("unknown selection policy '{}'", other)),
        }
    }
}

/// A row of the table.
#[derive(Debug, Clone)]
pub struct TableEntry {
    pub structure: CandidateStructure,
    /// Configurations not yet submitted.
    pub remaining: u32,
    /// Configurations submitted and not yet completed.
    pub running: u32,
    /// Registration order, used by [`SelectionPolicy::OldestFirst`].
    seq: u64,
}

impl TableEntry {
    /// Budget still in play for this entry.
    pub fn outstanding(&self) -> u32 {
        self.remaining + self.running
    }
}

/// A configuration slot claimed from an entry.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Structure the configuration belongs to.
    pub structure: CandidateStructure,
    /// Fresh id of the configuration.
    pub config_id: CandidateId,
    /// Whether this claim consumed the last remaining configuration.
    pub removed: bool,
}

/// Mapping from structure id to `(structure, remaining, running)`.
#[derive(Debug, Default)]
pub struct IncompleteStructures {
    entries: BTreeMap<CandidateId, TableEntry>,
    next_seq: u64,
    cursor: Option<CandidateId>,
}

impl IncompleteStructures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, cid: &CandidateId) -> bool {
        self.entries.contains_key(cid)
    }

    pub fn get(&self, cid: &CandidateId) -> Option<&TableEntry> {
        self.entries.get(cid)
    }

    /// Registers a materialized structure with its full declared budget and
    /// no running evaluation.
    ///
    /// Structures with a zero budget have nothing to submit and are not
    /// registered; returns whether an entry was created.
    pub fn insert(&mut self, structure: CandidateStructure) -> bool {
        if structure.budget == 0 {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            structure.cid,
            TableEntry {
                remaining: structure.budget,
                running: 0,
                structure,
                seq,
            },
        );
        true
    }

    /// Picks the entry the next configuration is drawn from.
    pub fn select(&mut self, policy: SelectionPolicy, rng: &mut ChaCha8Rng) -> Option<CandidateId> {
        if self.entries.is_empty() {
            return None;
        }
        match policy {
            SelectionPolicy::Random => {
                let keys: Vec<CandidateId> = self.entries.keys().copied().collect();
                keys.choose(rng).copied()
            }
            SelectionPolicy::RoundRobin => {
                let next = self
                    .cursor
                    .and_then(|cursor| {
                        self.entries
                            .range(cursor..)
                            .map(|(cid, _)| *cid)
                            .find(|cid| *cid != cursor)
                    })
                    .or_else(|| self.entries.keys().next().copied());
                self.cursor = next;
                next
            }
            SelectionPolicy::OldestFirst => self
                .entries
                .values()
                .min_by_key(|entry| entry.seq)
                .map(|entry| entry.structure.cid),
        }
    }

    /// Claims the next configuration slot of `cid`.
    ///
    /// `completed` is the number of results already recorded for the
    /// structure; the configuration index is `completed + running`, which is
    /// unique for as long as the entry exists. The entry is removed when its
    /// remaining budget reaches zero.
    pub fn claim(&mut self, cid: &CandidateId, completed: usize) -> Option<Claim> {
        let entry = self.entries.get_mut(cid)?;
        let config_id = entry
            .structure
            .cid
            .with_config(completed as u32 + entry.running);
        entry.remaining = entry.remaining.saturating_sub(1);
        entry.running += 1;

        let structure = entry.structure.clone();
        let removed = entry.remaining == 0;
        if removed {
            self.entries.remove(cid);
        }
        Some(Claim {
            structure,
            config_id,
            removed,
        })
    }

    /// Marks one running evaluation of `cid` as completed.
    ///
    /// Returns `false` if the entry is gone or had nothing running.
    pub fn release(&mut self, cid: &CandidateId) -> bool {
        match self.entries.get_mut(cid) {
            Some(entry) if entry.running > 0 => {
                entry.running -= 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfigurationSpace;
    use rand::SeedableRng;

    fn structure(iteration: u32, index: u32, budget: u32) -> CandidateStructure {
        CandidateStructure::materialized(
            CandidateId::new(iteration, index),
            "svm",
            vec!["svm".into()],
            ConfigurationSpace::default(),
            budget,
        )
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    #[test]
    fn test_insert_registers_full_budget() {
        let mut table = IncompleteStructures::new();
        assert!(table.insert(structure(0, 0, 3)));

        let entry = table.get(&CandidateId::new(0, 0)).expect("entry");
        assert_eq!(entry.remaining, 3);
        assert_eq!(entry.running, 0);
    }

    #[test]
    fn test_zero_budget_is_not_registered() {
        let mut table = IncompleteStructures::new();
        assert!(!table.insert(structure(0, 0, 0)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_claims_issue_unique_increasing_ids_and_remove_on_last() {
        let mut table = IncompleteStructures::new();
        let cid = CandidateId::new(0, 0);
        table.insert(structure(0, 0, 3));

        let first = table.claim(&cid, 0).expect("claim");
        let second = table.claim(&cid, 0).expect("claim");
        assert_eq!(first.config_id, cid.with_config(0));
        assert_eq!(second.config_id, cid.with_config(1));
        assert!(!second.removed);

        // One completion: a result is recorded and a running slot released.
        assert!(table.release(&cid));
        let third = table.claim(&cid, 1).expect("claim");
        assert_eq!(third.config_id, cid.with_config(2));
        assert!(third.removed);
        assert!(!table.contains(&cid));
        assert!(table.claim(&cid, 2).is_none());
    }

    #[test]
    fn test_outstanding_never_increases() {
        let mut table = IncompleteStructures::new();
        let cid = CandidateId::new(0, 0);
        table.insert(structure(0, 0, 4));

        let mut last = table.get(&cid).map(TableEntry::outstanding).expect("entry");
        let mut completed = 0;
        for step in 0..6 {
            if step % 2 == 0 {
                table.claim(&cid, completed);
            } else if table.release(&cid) {
                completed += 1;
            }
            if let Some(entry) = table.get(&cid) {
                assert!(entry.outstanding() <= last);
                last = entry.outstanding();
            }
        }
    }

    #[test]
    fn test_release_never_goes_below_zero() {
        let mut table = IncompleteStructures::new();
        let cid = CandidateId::new(0, 0);
        table.insert(structure(0, 0, 2));
        table.claim(&cid, 0);

        assert!(table.release(&cid));
        assert!(!table.release(&cid));
        assert_eq!(table.get(&cid).map(|e| e.running), Some(0));
        assert!(!table.release(&CandidateId::new(9, 9)));
    }

    #[test]
    fn test_random_selection_picks_an_entry() {
        let mut table = IncompleteStructures::new();
        let mut rng = rng();
        assert!(table.select(SelectionPolicy::Random, &mut rng).is_none());

        table.insert(structure(0, 0, 1));
        table.insert(structure(0, 1, 1));
        for _ in 0..10 {
            let cid = table.select(SelectionPolicy::Random, &mut rng).expect("pick");
            assert!(table.contains(&cid));
        }
    }

    #[test]
    fn test_round_robin_cycles() {
        let mut table = IncompleteStructures::new();
        let mut rng = rng();
        table.insert(structure(0, 0, 5));
        table.insert(structure(0, 1, 5));
        table.insert(structure(0, 2, 5));

        let picks: Vec<u32> = (0..4)
            .filter_map(|_| table.select(SelectionPolicy::RoundRobin, &mut rng))
            .map(|cid| cid.structure)
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_oldest_first_uses_registration_order() {
        let mut table = IncompleteStructures::new();
        let mut rng = rng();
        table.insert(structure(0, 5, 2));
        table.insert(structure(0, 1, 2));

        let pick = table.select(SelectionPolicy::OldestFirst, &mut rng);
        assert_eq!(pick, Some(CandidateId::new(0, 5)));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("random".parse::<SelectionPolicy>(), Ok(SelectionPolicy::Random));
        assert_eq!(
            "round_robin".parse::<SelectionPolicy>(),
            Ok(SelectionPolicy::RoundRobin)
        );
        assert_eq!(
            "Oldest-First".parse::<SelectionPolicy>(),
            Ok(SelectionPolicy::OldestFirst)
        );
        assert!("fair".parse::<SelectionPolicy>().is_err());
        assert_eq!(SelectionPolicy::RoundRobin.to_string(), "round-robin");
    }
}
