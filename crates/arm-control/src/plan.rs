use std::{fs, path::Path};

use anyhow::{Context, Result, bail};

use crate::servo::{ServoAngles, validate_angles};

/// Ordered preset positions visited by the scan worker. The first entry is
/// the centre pose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    positions: Vec<ServoAngles>,
}

impl Default for ScanPlan {
    fn default() -> Self {
        Self {
            positions: vec![
                [90, 90, 90, 90, 90, 90],
                [60, 90, 90, 90, 90, 90],
                [120, 90, 90, 90, 90, 90],
                [90, 60, 90, 90, 90, 90],
                [90, 120, 90, 90, 90, 90],
            ],
        }
    }
}

impl ScanPlan {
    pub fn new(positions: Vec<ServoAngles>) -> Result<Self> {
        if positions.is_empty() {
            bail!("scan plan needs at least one position");
        }
        for (index, position) in positions.iter().enumerate() {
            validate_angles(position).with_context(|| format!("scan position #{}", index + 1))?;
        }
        Ok(Self { positions })
    }

    /// Load a JSON array of six-angle arrays.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read scan positions {}", path.display()))?;
        let positions: Vec<ServoAngles> = serde_json::from_str(&text).with_context(|| {
            format!(
                "scan positions {} must be a JSON array of 6-angle arrays",
                path.display()
            )
        })?;
        Self::new(positions)
    }

    pub fn positions(&self) -> &[ServoAngles] {
        &self.positions
    }

    pub fn center(&self) -> ServoAngles {
        self.positions[0]
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
