use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use orchestrator::{
    Dataset,
    configs::{ClassifierConfig, TrainingConfig},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;

const DEFAULT_HOST: &str = "127.0.0.1";

/// A training job as read from its JSON description.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// One host per executor.
    #[serde(default = "default_executors")]
    pub executors: Vec<String>,
    pub dataset: DatasetConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetConfig {
    Inline {
        rows: Vec<Vec<f64>>,
        labels: Vec<f64>,
        #[serde(default = "one")]
        partitions: NonZeroUsize,
    },
    /// A headerless csv file, the label is the last column of every line.
    Local {
        path: PathBuf,
        #[serde(default = "one")]
        partitions: NonZeroUsize,
    },
    /// Uniform features, labelled by the sign of `x0 + x1 / 2`.
    Synthetic {
        rows: usize,
        features: usize,
        partitions: NonZeroUsize,
        seed: u64,
    },
}

fn default_executors() -> Vec<String> {
    vec![DEFAULT_HOST.to_string()]
}

fn one() -> NonZeroUsize {
    NonZeroUsize::MIN
}

impl Job {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("cannot read '{path}'"))?;
        serde_json::from_str(&content).with_context(|| format!("invalid job in '{path}'"))
    }
}

impl DatasetConfig {
    pub fn build(&self) -> Result<Dataset> {
        let (rows, partitions): (Vec<(Vec<f64>, f64)>, NonZeroUsize) = match self {
            Self::Inline {
                rows,
                labels,
                partitions,
            } => {
                if rows.len() != labels.len() {
                    bail!("got {} rows and {} labels", rows.len(), labels.len());
                }
                (rows.iter().cloned().zip(labels.iter().copied()).collect(), *partitions)
            }
            Self::Local { path, partitions } => (read_csv(path)?, *partitions),
            Self::Synthetic {
                rows,
                features,
                partitions,
                seed,
            } => (synthetic(*rows, *features, *seed)?, *partitions),
        };

        Ok(Dataset::from_rows(rows, partitions)?)
    }
}

fn read_csv(path: &Path) -> Result<Vec<(Vec<f64>, f64)>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read dataset '{}'", path.display()))?;

    let mut rows = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut values = line
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .with_context(|| format!("dataset line {i}: cannot parse '{v}' as f64"))
            })
            .collect::<Result<Vec<_>>>()?;

        let Some(label) = values.pop() else {
            bail!("dataset line {i} is empty");
        };
        if values.is_empty() {
            bail!("dataset line {i} has a label but no features");
        }
        rows.push((values, label));
    }

    Ok(rows)
}

fn synthetic(rows: usize, features: usize, seed: u64) -> Result<Vec<(Vec<f64>, f64)>> {
    if features == 0 {
        bail!("synthetic datasets need at least one feature");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let rows = (0..rows)
        .map(|_| {
            let x: Vec<f64> = (0..features).map(|_| rng.random_range(-1.0..1.0)).collect();
            let margin = x[0] + x.get(1).copied().unwrap_or_default() / 2.0;
            let label = if margin > 0.0 { 1.0 } else { 0.0 };
            (x, label)
        })
        .collect();

    Ok(rows)
}
