use crate::tree::Tree;

/// A trained ensemble as seen by its consumers.
pub trait Booster {
    /// The raw margin of one feature vector.
    fn score(&self, features: &[f64]) -> f64;

    /// The amount of classes this booster discriminates.
    fn class_count(&self) -> usize;
}

/// A binary gradient-boosted tree ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct GbdtBooster {
    init_score: f64,
    trees: Vec<Tree>,
}

impl GbdtBooster {
    pub fn new(init_score: f64, trees: Vec<Tree>) -> Self {
        Self { init_score, trees }
    }

    pub fn init_score(&self) -> f64 {
        self.init_score
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }
}

impl Booster for GbdtBooster {
    fn score(&self, features: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.init_score, |acc, tree| acc + tree.predict(features))
    }

    fn class_count(&self) -> usize {
        2
    }
}
