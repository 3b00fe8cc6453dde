use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Column identifiers and decision thresholds of the classification model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub label_col: String,
    pub features_col: String,
    pub prediction_col: String,
    pub probability_col: String,
    pub raw_prediction_col: String,
    /// One per class, the predicted class maximizes `p_i / t_i`.
    pub thresholds: Option<Vec<f64>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            label_col: "label".into(),
            features_col: "features".into(),
            prediction_col: "prediction".into(),
            probability_col: "probability".into(),
            raw_prediction_col: "rawPrediction".into(),
            thresholds: None,
        }
    }
}

impl ClassifierConfig {
    /// Checks what can be checked before the class count is known.
    pub fn validate(&self) -> Result<()> {
        let Some(thresholds) = &self.thresholds else {
            return Ok(());
        };

        if let Some(t) = thresholds.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(OrchestratorError::Configuration(format!(
                "thresholds must be non-negative and finite, got {t}"
            )));
        }
        if thresholds.iter().filter(|t| **t == 0.0).count() > 1 {
            return Err(OrchestratorError::Configuration(
                "at most one threshold may be zero".into(),
            ));
        }

        Ok(())
    }

    /// Like `validate`, also requiring exactly one threshold per class.
    pub fn validate_for(&self, num_classes: usize) -> Result<()> {
        self.validate()?;

        match &self.thresholds {
            Some(thresholds) if thresholds.len() != num_classes => {
                Err(OrchestratorError::Configuration(format!(
                    "got {} thresholds for a model of {num_classes} classes",
                    thresholds.len()
                )))
            }
            _ => Ok(()),
        }
    }
}
