mod job;

use std::env;

use anyhow::{Context, Result};
use engine::GbdtEngine;
use log::info;
use orchestrator::LocalCluster;

use crate::job::Job;

const PREVIEW_ROWS: usize = 5;

fn main() -> Result<()> {
    env_logger::init();

    let path = env::args().nth(1).context("usage: node <job.json>")?;
    let job = Job::load(&path)?;
    let dataset = job.dataset.build()?;
    info!(
        rows = dataset.num_rows(),
        features = dataset.num_features(),
        partitions = dataset.num_partitions();
        "dataset loaded"
    );

    let env = LocalCluster::new(job.executors);
    let model = orchestrator::train(
        &env,
        &GbdtEngine::new(),
        &dataset,
        &job.training,
        job.classifier,
    )?;

    let mut hits = 0;
    let mut shown = 0;
    for partition in dataset.partitions() {
        for (features, label) in partition.rows().zip(partition.labels()) {
            let prediction = model.predict(features)?;
            hits += usize::from(prediction.predicted_class as f64 == *label);

            if shown < PREVIEW_ROWS {
                println!(
                    "{:?} -> class {} {:?}",
                    features, prediction.predicted_class, prediction.probability
                );
                shown += 1;
            }
        }
    }

    let accuracy = hits as f64 / dataset.num_rows() as f64;
    info!(accuracy = accuracy; "training finished");
    println!("training accuracy: {accuracy:.4}");

    Ok(())
}
