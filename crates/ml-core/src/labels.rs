use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result, bail};

/// Maps detector class ids to display names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: BTreeMap<i64, String>,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::from_pairs([
            (0, "adapter"),
            (1, "eraser"),
            (2, "mouse"),
            (3, "pen"),
            (4, "pendrive"),
            (5, "stapler"),
        ])
    }
}

impl LabelTable {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        Self {
            names: pairs
                .into_iter()
                .map(|(id, name)| (id, name.into()))
                .collect(),
        }
    }

    /// Load a table from a JSON object such as `{"0": "adapter", "1": "eraser"}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read label table {}", path.display()))?;
        let raw: BTreeMap<String, String> = serde_json::from_str(&text)
            .with_context(|| format!("label table {} is not a JSON object", path.display()))?;
        let mut names = BTreeMap::new();
        for (key, name) in raw {
            let id = key
                .trim()
                .parse::<i64>()
                .with_context(|| format!("label key {key:?} is not an integer class id"))?;
            names.insert(id, name);
        }
        if names.is_empty() {
            bail!("label table {} is empty", path.display());
        }
        Ok(Self { names })
    }

    pub fn lookup(&self, class_id: i64) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
