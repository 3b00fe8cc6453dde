//! The consolidated model, as a probabilistic binary classifier.

use engine::Booster;

use crate::{
    configs::ClassifierConfig,
    error::{OrchestratorError, Result},
};

/// The classes every `ClassificationModel` discriminates.
pub const NUM_CLASSES: usize = 2;

/// A margin or probability vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Vector {
    Dense(Vec<f64>),
    Sparse {
        size: usize,
        indices: Vec<usize>,
        values: Vec<f64>,
    },
}

impl Vector {
    pub fn size(&self) -> usize {
        match self {
            Self::Dense(values) => values.len(),
            Self::Sparse { size, .. } => *size,
        }
    }
}

/// Everything the model outputs for one feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub raw_margin: Vector,
    pub probability: Vector,
    pub predicted_class: usize,
}

/// A trained booster wrapped as a classifier.
///
/// Immutable once built, predictions can run concurrently from any thread.
#[derive(Debug, Clone)]
pub struct ClassificationModel<B> {
    booster: B,
    config: ClassifierConfig,
}

impl<B: Booster> ClassificationModel<B> {
    /// Creates a new `ClassificationModel`.
    ///
    /// # Returns
    /// The model, or `OrchestratorError::Configuration` if the thresholds don't
    /// fit the booster's classes.
    pub fn new(booster: B, config: ClassifierConfig) -> Result<Self> {
        config.validate_for(booster.class_count())?;
        Ok(Self { booster, config })
    }

    pub fn booster(&self) -> &B {
        &self.booster
    }

    /// Column identifiers and thresholds.
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn num_classes(&self) -> usize {
        self.booster.class_count()
    }

    /// `[-m, m]` for the booster's margin `m`.
    pub fn predict_raw(&self, features: &[f64]) -> Vector {
        let m = self.booster.score(features);
        Vector::Dense(vec![-m, m])
    }

    /// Turns a raw margin into class probabilities.
    ///
    /// # Returns
    /// `[p0, 1 - p0]` with `p0 = 1 / (1 + e^(-2 * raw[0]))`, or
    /// `OrchestratorError::InvariantViolation` if `raw` isn't a dense margin
    /// of two classes.
    pub fn calibrate_probability(&self, raw: &Vector) -> Result<Vector> {
        let Vector::Dense(values) = raw else {
            return Err(OrchestratorError::InvariantViolation(
                "raw margins must be dense".into(),
            ));
        };
        let [r0, _] = values.as_slice() else {
            return Err(OrchestratorError::InvariantViolation(format!(
                "raw margins must hold 2 values, got {}",
                values.len()
            )));
        };

        let p0 = 1.0 / (1.0 + (-2.0 * r0).exp());
        Ok(Vector::Dense(vec![p0, 1.0 - p0]))
    }

    /// Computes the raw margin, the probabilities and the predicted class.
    pub fn predict(&self, features: &[f64]) -> Result<Prediction> {
        let raw_margin = self.predict_raw(features);
        let probability = self.calibrate_probability(&raw_margin)?;

        let Vector::Dense(probs) = &probability else {
            return Err(OrchestratorError::InvariantViolation(
                "probabilities must be dense".into(),
            ));
        };
        let predicted_class = predicted_class(probs, self.config.thresholds.as_deref());

        Ok(Prediction {
            raw_margin,
            probability,
            predicted_class,
        })
    }
}

/// The index maximizing `p_i / t_i`, or `p_i` without thresholds. Ties go to
/// the lowest index, a zero threshold wins outright for any positive `p_i`.
fn predicted_class(probs: &[f64], thresholds: Option<&[f64]>) -> usize {
    let scaled = |i: usize| match thresholds {
        None => probs[i],
        Some(t) if t[i] == 0.0 => {
            if probs[i] > 0.0 {
                f64::INFINITY
            } else {
                0.0
            }
        }
        Some(t) => probs[i] / t[i],
    };

    (1..probs.len()).fold(0, |best, i| if scaled(i) > scaled(best) { i } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMargin(f64);

    impl Booster for FixedMargin {
        fn score(&self, _features: &[f64]) -> f64 {
            self.0
        }

        fn class_count(&self) -> usize {
            2
        }
    }

    fn model(margin: f64, thresholds: Option<Vec<f64>>) -> ClassificationModel<FixedMargin> {
        let config = ClassifierConfig {
            thresholds,
            ..Default::default()
        };
        ClassificationModel::new(FixedMargin(margin), config).unwrap()
    }

    fn dense(v: &Vector) -> &[f64] {
        match v {
            Vector::Dense(values) => values,
            other => panic!("expected a dense vector, got {other:?}"),
        }
    }

    #[test]
    fn raw_margin_is_symmetric() {
        assert_eq!(model(0.5, None).predict_raw(&[]), Vector::Dense(vec![-0.5, 0.5]));
    }

    #[test]
    fn calibration_follows_the_scaled_sigmoid() {
        let model = model(0.5, None);
        let prob = model.calibrate_probability(&model.predict_raw(&[])).unwrap();

        let p0 = 1.0 / (1.0 + std::f64::consts::E);
        let probs = dense(&prob);
        assert!((probs[0] - p0).abs() < 1e-12);
        assert!((probs[0] - 0.2689).abs() < 1e-4);
        assert!((probs[1] - 0.7311).abs() < 1e-4);
    }

    #[test]
    fn calibration_is_a_distribution() {
        let model = model(0.0, None);

        for r in [-40.0, -3.0, -0.1, 0.0, 0.7, 12.0, 800.0] {
            let raw = Vector::Dense(vec![r, -r]);
            let first = model.calibrate_probability(&raw).unwrap();
            let probs = dense(&first);

            assert!((0.0..=1.0).contains(&probs[0]) && (0.0..=1.0).contains(&probs[1]));
            assert!((probs[0] + probs[1] - 1.0).abs() < 1e-12);
            assert_eq!(model.calibrate_probability(&raw).unwrap(), first);
        }
    }

    #[test]
    fn repeated_predictions_agree() {
        let model = model(-1.25, Some(vec![0.6, 0.4]));
        let features = [0.3, 7.0];

        assert_eq!(model.predict_raw(&features), model.predict_raw(&features));
        assert_eq!(model.predict(&features).unwrap(), model.predict(&features).unwrap());
    }

    #[test]
    fn calibration_rejects_non_dense_margins() {
        let model = model(0.0, None);
        let sparse = Vector::Sparse {
            size: 2,
            indices: vec![1],
            values: vec![0.3],
        };

        assert!(matches!(
            model.calibrate_probability(&sparse),
            Err(OrchestratorError::InvariantViolation(_))
        ));
        assert!(matches!(
            model.calibrate_probability(&Vector::Dense(vec![0.1, 0.2, 0.3])),
            Err(OrchestratorError::InvariantViolation(_))
        ));
    }

    #[test]
    fn predicts_the_most_likely_class() {
        assert_eq!(model(0.5, None).predict(&[]).unwrap().predicted_class, 1);
        assert_eq!(model(-0.5, None).predict(&[]).unwrap().predicted_class, 0);
        assert_eq!(model(0.0, None).predict(&[]).unwrap().predicted_class, 0);
    }

    #[test]
    fn thresholds_rescale_probabilities() {
        // p = [0.2689, 0.7311], 0.2689 / 0.2 > 0.7311 / 0.8
        let prediction = model(0.5, Some(vec![0.2, 0.8])).predict(&[]).unwrap();
        assert_eq!(prediction.predicted_class, 0);

        let zero = model(-0.5, Some(vec![0.5, 0.0])).predict(&[]).unwrap();
        assert_eq!(zero.predicted_class, 1);
    }

    #[test]
    fn thresholds_must_match_the_class_count() {
        let config = ClassifierConfig {
            thresholds: Some(vec![0.5, 0.3, 0.2]),
            ..Default::default()
        };

        assert!(matches!(
            ClassificationModel::new(FixedMargin(0.0), config),
            Err(OrchestratorError::Configuration(_))
        ));
    }
}
