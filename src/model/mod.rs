//! Data model shared by the scheduler and its collaborators.
//!
//! - [`CandidateId`]: hierarchical `(iteration, structure, config)` identifier
//! - [`CandidateStructure`]: a pipeline topology plus its configuration space
//! - [`ConfigurationSpace`] / [`Configuration`]: hyperparameter domains and values
//! - [`EvaluationResult`]: outcome of evaluating one configuration
//! - [`Dataset`]: identity and meta-features of the data being searched on

pub mod id;
pub mod space;
pub mod structure;

pub use id::CandidateId;
pub use space::{CacheKey, Configuration, ConfigurationSpace, Hyperparameter, ParamValue};
pub use structure::{CandidateStructure, Dataset, EvaluationResult, StatusType};
