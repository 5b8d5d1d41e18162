//! On-disk collection of basin series (a single bincode file).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::basin::BasinSeries;
use crate::error::{HydroError, Result};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BasinDataset {
    pub basins: Vec<BasinSeries>,
}

impl BasinDataset {
    pub fn new(basins: Vec<BasinSeries>) -> Self {
        Self { basins }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| HydroError::io(path, e))?;
        let dataset: Self = bincode::deserialize(&bytes)?;
        info!(path = %path.display(), basins = dataset.basins.len(), "loaded basin dataset");
        Ok(dataset)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        fs::write(path, bytes).map_err(|e| HydroError::io(path, e))
    }

    pub fn get(&self, basin_id: &str) -> Option<&BasinSeries> {
        self.basins.iter().find(|b| b.basin_id == basin_id)
    }

    /// The listed basins, in the listed order. Any unknown id is an error.
    pub fn select(&self, basin_ids: &[String]) -> Result<Vec<&BasinSeries>> {
        basin_ids
            .iter()
            .map(|id| {
                self.get(id)
                    .ok_or_else(|| HydroError::Config(format!("basin {} is not in the dataset", id)))
            })
            .collect()
    }
}
