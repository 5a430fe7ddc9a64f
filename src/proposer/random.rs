//! Random search over a template catalogue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::model::{CandidateId, CandidateStructure, EvaluationResult};
use crate::sampler::random::create_rng;

use super::{Catalogue, Proposal, StructureProposer};

struct ProposerState {
    offset: u32,
    iteration: u32,
    index: u32,
    issued: u32,
    rng: ChaCha8Rng,
    best: HashMap<String, f64>,
}

/// Random search on the maximum budget.
///
/// Every repetition issues `iterations` iterations of
/// `structures_per_iteration` proxies, each drawn uniformly from the
/// catalogue and carrying `budget` configurations.
pub struct RandomSearchProposer {
    catalogue: Arc<Catalogue>,
    structures_per_iteration: u32,
    iterations: u32,
    budget: u32,
    state: Mutex<ProposerState>,
}

impl RandomSearchProposer {
    pub fn new(catalogue: Arc<Catalogue>, structures_per_iteration: u32, budget: u32) -> Self {
        Self {
            catalogue,
            structures_per_iteration,
            iterations: 1,
            budget,
            state: Mutex::new(ProposerState {
                offset: 0,
                iteration: 0,
                index: 0,
                issued: 0,
                rng: create_rng(None),
                best: HashMap::new(),
            }),
        }
    }

    /// Sets the number of iterations per repetition.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Seeds template selection.
    pub fn with_seed(self, seed: Option<u64>) -> Self {
        self.lock().rng = create_rng(seed);
        self
    }

    /// Best loss observed per template.
    pub fn best_losses(&self) -> HashMap<String, f64> {
        self.lock().best.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ProposerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StructureProposer for RandomSearchProposer {
    fn next(&self) -> Proposal {
        let mut state = self.lock();
        if self.structures_per_iteration == 0 || state.iteration >= self.iterations {
            return Proposal::Exhausted;
        }

        let Some(template) = self.catalogue.templates.choose(&mut state.rng) else {
            return Proposal::Exhausted;
        };
        let cid = CandidateId::new(state.offset + state.iteration, state.index);
        let proposal = CandidateStructure::proxy(cid, template.name.clone(), self.budget);
        debug!(cid = %cid, template = %template.name, "Proposing structure");

        if state.index == 0 {
            state.issued += 1;
        }
        state.index += 1;
        if state.index >= self.structures_per_iteration {
            state.index = 0;
            state.iteration += 1;
        }
        Proposal::Candidate(proposal)
    }

    fn reset(&self, offset: u32) {
        let mut state = self.lock();
        state.offset = offset;
        state.iteration = 0;
        state.index = 0;
        state.issued = 0;
    }

    fn register_result(&self, structure: &CandidateStructure, result: &EvaluationResult) {
        let Some(loss) = result.loss else {
            return;
        };
        let mut state = self.lock();
        state
            .best
            .entry(structure.template.clone())
            .and_modify(|best| *best = best.min(loss))
            .or_insert(loss);
    }

    fn issued(&self) -> u32 {
        self.lock().issued
    }
}
