//! In-memory result logger.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StorageError;
use crate::model::{CandidateId, CandidateStructure, EvaluationResult};

use super::{EvaluationRecord, ResultLogger, RunHistory};

#[derive(Debug, Default)]
struct Records {
    structures: Vec<CandidateStructure>,
    evaluations: Vec<EvaluationRecord>,
}

/// Keeps logged results in memory.
#[derive(Debug, Default)]
pub struct InMemoryResultLogger {
    records: Mutex<Records>,
}

impl InMemoryResultLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluations(&self) -> Vec<EvaluationRecord> {
        self.lock().evaluations.clone()
    }

    pub fn structures(&self) -> Vec<CandidateStructure> {
        self.lock().structures.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResultLogger for InMemoryResultLogger {
    fn log_evaluated_config(&self, cid: &CandidateId, result: &EvaluationResult) -> Result<(), StorageError> {
        self.lock().evaluations.push(EvaluationRecord {
            cid: *cid,
            result: result.clone(),
        });
        Ok(())
    }

    fn new_structure(&self, structure: &CandidateStructure) -> Result<(), StorageError> {
        self.lock().structures.push(structure.clone());
        Ok(())
    }

    fn load(&self) -> Result<RunHistory, StorageError> {
        let records = self.lock();
        Ok(RunHistory::from_records(
            records.structures.clone(),
            records.evaluations.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConfigurationSpace;
    use std::time::Duration;

    #[test]
    fn test_records_and_loads() {
        let logger = InMemoryResultLogger::new();
        let structure = CandidateStructure::materialized(
            CandidateId::new(0, 0),
            "svm",
            vec!["svc".into()],
            ConfigurationSpace::new("svm"),
            1,
        );
        logger.new_structure(&structure).expect("log structure");
        logger
            .log_evaluated_config(
                &structure.cid.with_config(0),
                &EvaluationResult::success(0.2, Duration::ZERO),
            )
            .expect("log result");

        let history = logger.load().expect("load");
        assert_eq!(history.structures.len(), 1);
        assert_eq!(history.evaluations.len(), 1);
        assert_eq!(logger.evaluations()[0].cid, structure.cid.with_config(0));
        assert_eq!(history.incumbent().map(|i| i.loss), Some(0.2));
    }
}
