//! Run history and incumbent selection.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::model::{CandidateId, CandidateStructure, Configuration, EvaluationResult};
use crate::scheduler::Termination;

/// One logged evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub cid: CandidateId,
    pub result: EvaluationResult,
}

/// Metadata describing a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(with = "duration_secs")]
    pub wallclock_limit: Duration,
    #[serde(default, with = "option_duration_secs")]
    pub cutoff: Option<Duration>,
    pub pre_sample: bool,
    pub n_workers: usize,
    /// Repetitions started during the run.
    pub repetitions: u32,
    pub termination: Option<Termination>,
}

impl RunMetadata {
    /// Seconds between start and end, if the run ended.
    pub fn elapsed_secs(&self) -> Option<f64> {
        self.end
            .map(|end| (end - self.start).num_milliseconds() as f64 / 1000.0)
    }
}

/// Best successful evaluation of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incumbent {
    pub cid: CandidateId,
    pub loss: f64,
    pub config: Configuration,
    /// Owning structure, if it was logged.
    pub structure: Option<CandidateStructure>,
}

/// Everything a result logger recorded for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunHistory {
    /// Materialized structures, each carrying its logged results.
    pub structures: BTreeMap<CandidateId, CandidateStructure>,
    /// Evaluations in logging order.
    pub evaluations: Vec<EvaluationRecord>,
    pub meta: Option<RunMetadata>,
}

impl RunHistory {
    /// Assembles a history, attaching every evaluation to its structure.
    pub fn from_records(structures: Vec<CandidateStructure>, evaluations: Vec<EvaluationRecord>) -> Self {
        let mut by_id: BTreeMap<CandidateId, CandidateStructure> = structures
            .into_iter()
            .map(|mut structure| {
                structure.results.clear();
                (structure.cid, structure)
            })
            .collect();
        for record in &evaluations {
            if let Some(structure) = by_id.get_mut(&record.cid.structure_id()) {
                structure.add_result(record.result.clone());
            }
        }
        Self {
            structures: by_id,
            evaluations,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: RunMetadata) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn successful(&self) -> usize {
        self.evaluations.iter().filter(|r| r.result.is_success()).count()
    }

    /// Returns the successful evaluation with the lowest loss.
    ///
    /// Ties keep the earliest logged evaluation.
    pub fn incumbent(&self) -> Option<Incumbent> {
        let best = self
            .evaluations
            .iter()
            .filter(|record| record.result.is_success())
            .filter_map(|record| record.result.loss.map(|loss| (OrderedFloat(loss), record)))
            .min_by_key(|(loss, _)| *loss)?;

        let (OrderedFloat(loss), record) = best;
        Some(Incumbent {
            cid: record.cid,
            loss,
            config: record.result.config.clone(),
            structure: self.structures.get(&record.cid.structure_id()).cloned(),
        })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
