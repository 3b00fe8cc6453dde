mod booster;
mod data;
mod engine;
mod error;
mod histogram;
mod learner;
pub mod net;
mod params;
pub mod runtime;
pub mod tree;

pub use booster::{Booster, GbdtBooster};
pub use data::TrainingRows;
pub use engine::{GbdtEngine, NativeEngine, WorkerSlot};
pub use error::{EngineError, Result};
pub use learner::SIGMOID_SCALE;
pub use params::{MAX_BIN, ParallelismMode, TrainParams};
pub use runtime::RuntimeGuard;
