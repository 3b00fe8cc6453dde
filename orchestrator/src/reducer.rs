use log::debug;

use crate::error::{OrchestratorError, Result};

/// Reduces the boosters of a round to the single authoritative one.
///
/// Every worker of a round builds the same booster, so the first one is kept
/// and all the others are checked against it.
///
/// # Returns
/// The first booster, or `OrchestratorError::Reduction` if there is none or
/// some other booster diverges from it.
pub fn reduce<B: PartialEq>(results: Vec<B>) -> Result<B> {
    let mut results = results.into_iter();

    let Some(canonical) = results.next() else {
        return Err(OrchestratorError::Reduction(
            "the round produced no booster".into(),
        ));
    };

    for (idx, booster) in results.enumerate() {
        if booster != canonical {
            return Err(OrchestratorError::Reduction(format!(
                "the booster of partition {} diverges from partition 0's",
                idx + 1
            )));
        }
    }

    debug!("boosters reduced");
    Ok(canonical)
}
