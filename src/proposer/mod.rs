//! Structure proposal.
//!
//! A [`StructureProposer`] produces a lazy, possibly infinite, sequence of
//! candidate structures. Candidates are either proxies, which need a
//! structure job before they can be evaluated, or already materialized
//! structures carrying their evaluation budget.

pub mod catalogue;
pub mod random;

use crate::model::{CandidateStructure, EvaluationResult};

pub use catalogue::{materialize_template, Catalogue, Template};
pub use random::RandomSearchProposer;

/// Answer of [`StructureProposer::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// A new candidate structure.
    Candidate(CandidateStructure),
    /// No candidate can be produced until outstanding work completes.
    NotReadyYet,
    /// The sequence of the current repetition is exhausted.
    Exhausted,
}

/// Source of candidate structures.
///
/// Shared between the control loop and completion callbacks, so every
/// method takes `&self` and implementations synchronize internally.
pub trait StructureProposer: Send + Sync {
    fn next(&self) -> Proposal;

    /// Starts a new repetition whose iteration ids begin at `offset`.
    fn reset(&self, offset: u32);

    /// Feeds back one evaluation of `structure`.
    fn register_result(&self, structure: &CandidateStructure, result: &EvaluationResult);

    /// Number of iterations issued since the last reset.
    fn issued(&self) -> u32;
}
