mod classifier;
mod training;

pub use classifier::ClassifierConfig;
pub use training::{ParallelismConfig, TrainingConfig};
