use crate::config::cli::{ExperimentOpt, ParkingLotOpt};
use crate::topology::TopologyKind;
use anyhow::Context;
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct BatchJsonConfig {
    pub experiments: Vec<ExperimentJson>,
}

#[serde_as]
#[derive(Deserialize, Debug)]
pub struct ExperimentJson {
    #[serde_as(as = "DisplayFromStr")]
    pub topology: TopologyKind,
    /// Overrides the seed from the command line
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(flatten)]
    pub experiment: ExperimentOpt,
    /// Ignored for dumbbell entries
    #[serde(flatten)]
    pub parking_lot: ParkingLotOpt,
}

impl BatchJsonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read batch config `{}`", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("invalid batch config `{}`", path.display()))
    }
}
