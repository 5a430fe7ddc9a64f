//! JSON-lines result logger.
//!
//! Each evaluation is appended as one JSON object to `results.json` and each
//! materialized structure to `structures.json`, so a crashed run still leaves
//! every line written before the crash readable.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::model::{CandidateId, CandidateStructure, EvaluationResult};

use super::{EvaluationRecord, ResultLogger, RunHistory};

pub const RESULTS_FILE: &str = "results.json";
pub const STRUCTURES_FILE: &str = "structures.json";

struct Files {
    results: File,
    structures: File,
}

/// Result logger writing JSON lines into a working directory.
pub struct JsonResultLogger {
    directory: PathBuf,
    files: Mutex<Files>,
}

impl JsonResultLogger {
    /// Opens the logs in `directory`, creating it if needed.
    ///
    /// With `overwrite` existing logs are truncated; otherwise new records
    /// are appended to them.
    pub fn new(directory: impl Into<PathBuf>, overwrite: bool) -> Result<Self, StorageError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let open = |name: &str| -> Result<File, StorageError> {
            let mut options = OpenOptions::new();
            options.create(true);
            if overwrite {
                options.write(true).truncate(true);
            } else {
                options.append(true);
            }
            Ok(options.open(directory.join(name))?)
        };
        let files = Files {
            results: open(RESULTS_FILE)?,
            structures: open(STRUCTURES_FILE)?,
        };

        debug!(directory = %directory.display(), overwrite, "Opened result logs");
        Ok(Self {
            directory,
            files: Mutex::new(files),
        })
    }

    /// Reads the logs of a previous run without opening them for writing.
    pub fn read(directory: &Path) -> Result<RunHistory, StorageError> {
        let structures = read_lines::<CandidateStructure>(&directory.join(STRUCTURES_FILE))?;
        let evaluations = read_lines::<EvaluationRecord>(&directory.join(RESULTS_FILE))?;
        Ok(RunHistory::from_records(structures, evaluations))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn lock(&self) -> MutexGuard<'_, Files> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn append_line<T: Serialize>(file: &mut File, value: &T) -> Result<(), StorageError> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    if !path.exists() {
        warn!(path = %path.display(), "Result log does not exist");
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line).map_err(|e| StorageError::CorruptedLog {
            file: path.display().to_string(),
            line: index + 1,
            reason: e.to_string(),
        })?;
        out.push(value);
    }
    Ok(out)
}

impl ResultLogger for JsonResultLogger {
    fn log_evaluated_config(&self, cid: &CandidateId, result: &EvaluationResult) -> Result<(), StorageError> {
        let record = EvaluationRecord {
            cid: *cid,
            result: result.clone(),
        };
        append_line(&mut self.lock().results, &record)
    }

    fn new_structure(&self, structure: &CandidateStructure) -> Result<(), StorageError> {
        append_line(&mut self.lock().structures, structure)
    }

    fn load(&self) -> Result<RunHistory, StorageError> {
        // Hold the lock so no line is read half-written.
        let _files = self.lock();
        Self::read(&self.directory)
    }
}
