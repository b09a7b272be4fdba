use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use baselinexr_core::{Adjustment, AdjustmentStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct AdjustmentsFile {
    #[serde(default)]
    adjustment: Adjustment,
}

/// Keeps the scene adjustment in a toml file between runs.
pub struct TomlAdjustmentStore {
    path: PathBuf,
}

impl TomlAdjustmentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AdjustmentStore for TomlAdjustmentStore {
    type Error = anyhow::Error;

    fn load(&mut self) -> Result<Option<Adjustment>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file_str = fs::read_to_string(&self.path)?;
        let file: AdjustmentsFile = toml::from_str(&file_str)?;
        Ok(Some(file.adjustment.normalized()))
    }

    fn save(&mut self, adjustment: &Adjustment) -> Result<()> {
        let file_str = toml::to_string_pretty(&AdjustmentsFile {
            adjustment: *adjustment,
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.path, file_str)?;
        Ok(())
    }
}
