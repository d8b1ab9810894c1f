use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};

pub const INITIALIZING: &str = "INITIALIZING";
pub const INSERTING_PERMISSIONS: &str = "INSERTING_PERMISSIONS";
pub const INSERTING_ROLES: &str = "INSERTING_ROLES";
pub const INSERTING_USERS: &str = "INSERTING_USERS";
pub const INSERTING_ASSIGNMENTS: &str = "INSERTING_ASSIGNMENTS";
pub const FINALIZING: &str = "FINALIZING";

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageWeight {
    pub name: String,
    pub weight: f64,
}

impl StageWeight {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Ordered pipeline stages with their share of total work.
///
/// Weights are taken as given: the plan never normalizes them. Keeping the sum
/// at 1.0 is the caller's job unless strict validation is requested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagePlan {
    stages: Vec<StageWeight>,
}

impl Default for StagePlan {
    fn default() -> Self {
        Self::new(vec![
            StageWeight::new(INITIALIZING, 0.05),
            StageWeight::new(INSERTING_PERMISSIONS, 0.30),
            StageWeight::new(INSERTING_ROLES, 0.20),
            StageWeight::new(INSERTING_USERS, 0.25),
            StageWeight::new(INSERTING_ASSIGNMENTS, 0.15),
            StageWeight::new(FINALIZING, 0.05),
        ])
    }
}

impl StagePlan {
    pub fn new(stages: Vec<StageWeight>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[StageWeight] {
        &self.stages
    }

    pub fn initial_stage(&self) -> Option<&str> {
        self.stages.first().map(|stage| stage.name.as_str())
    }

    pub fn terminal_stage(&self) -> Option<&str> {
        self.stages.last().map(|stage| stage.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.name == name)
    }

    pub fn weight(&self, name: &str) -> Option<f64> {
        self.stages
            .iter()
            .find(|stage| stage.name == name)
            .map(|stage| stage.weight)
    }

    /// Sum of the weights of every stage strictly before `name`.
    pub fn completed_weight(&self, name: &str) -> f64 {
        match self.position(name) {
            Some(index) => self.stages[..index].iter().map(|stage| stage.weight).sum(),
            None => 0.0,
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.stages.iter().map(|stage| stage.weight).sum()
    }

    pub fn is_normalized(&self) -> bool {
        (self.total_weight() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }

    pub fn validate(&self, strict: bool) -> Result<(), CoreError> {
        if self.stages.is_empty() {
            return Err(invalid_plan("stage plan must contain at least one stage"));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(invalid_plan("stage names must not be empty"));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(invalid_plan(format!(
                    "stage '{}' appears more than once",
                    stage.name
                )));
            }
            if !stage.weight.is_finite() || !(0.0..=1.0).contains(&stage.weight) {
                return Err(invalid_plan(format!(
                    "stage '{}' has weight {} outside [0, 1]",
                    stage.name, stage.weight
                )));
            }
        }

        if strict && !self.is_normalized() {
            return Err(invalid_plan(format!(
                "stage weights sum to {} but strict mode requires 1.0",
                self.total_weight()
            )));
        }

        Ok(())
    }
}

fn invalid_plan(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidConfig, message)
}
