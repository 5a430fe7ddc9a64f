//! Catalogue of pipeline templates.
//!
//! A template names an ordered list of pipeline steps and the configuration
//! space of their hyperparameters. Catalogues are loaded from YAML:
//!
//! ```yaml
//! templates:
//!   - name: svm
//!     pipeline: [standard_scaler, svc]
//!     configspace:
//!       hyperparameters:
//!         - { type: float, name: C, lower: 0.01, upper: 100.0, log: true }
//!         - { type: categorical, name: kernel, choices: [rbf, linear] }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CatalogueError, WorkerError};
use crate::model::{CandidateStructure, ConfigurationSpace};

/// A named pipeline topology with its configuration space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub pipeline: Vec<String>,
    #[serde(default)]
    pub configspace: ConfigurationSpace,
}

impl Template {
    pub fn new(name: impl Into<String>, pipeline: Vec<String>, configspace: ConfigurationSpace) -> Self {
        Self {
            name: name.into(),
            pipeline,
            configspace,
        }
    }
}

/// The set of templates a proposer draws structures from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalogue {
    pub templates: Vec<Template>,
}

impl Catalogue {
    pub fn new(templates: Vec<Template>) -> Result<Self, CatalogueError> {
        let catalogue = Self { templates };
        catalogue.validate()?;
        Ok(catalogue)
    }

    /// Parses and validates a YAML catalogue.
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogueError> {
        let mut catalogue: Catalogue = serde_yaml::from_str(yaml)?;
        catalogue.fill_space_names();
        catalogue.validate()?;
        Ok(catalogue)
    }

    /// Loads a YAML catalogue from disk.
    pub fn load(path: &Path) -> Result<Self, CatalogueError> {
        let yaml = std::fs::read_to_string(path)?;
        let catalogue = Self::from_yaml(&yaml)?;
        info!(
            path = %path.display(),
            templates = catalogue.len(),
            "Loaded structure catalogue"
        );
        Ok(catalogue)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    // Unnamed spaces take the template name so distinct templates get
    // distinct fingerprints.
    fn fill_space_names(&mut self) {
        for template in &mut self.templates {
            if template.configspace.name.is_empty() {
                template.configspace.name = template.name.clone();
            }
        }
    }

    fn validate(&self) -> Result<(), CatalogueError> {
        if self.templates.is_empty() {
            return Err(CatalogueError::Empty);
        }
        let mut seen = HashSet::new();
        for template in &self.templates {
            if !seen.insert(template.name.as_str()) {
                return Err(CatalogueError::DuplicateTemplate(template.name.clone()));
            }
            template
                .configspace
                .validate()
                .map_err(|source| CatalogueError::InvalidSpace {
                    template: template.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Resolves a proxy structure to the topology of its template.
///
/// Already materialized structures are returned unchanged.
pub fn materialize_template(
    catalogue: &Catalogue,
    structure: &CandidateStructure,
) -> Result<CandidateStructure, WorkerError> {
    if !structure.is_proxy() {
        return Ok(structure.clone());
    }
    let template = catalogue.get(&structure.template).ok_or_else(|| {
        WorkerError::Materialization(
            structure.cid,
            format!("unknown template '{}'", structure.template),
        )
    })?;
    Ok(structure
        .clone()
        .materialize(template.pipeline.clone(), template.configspace.clone()))
}
