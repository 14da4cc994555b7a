//! Demo tree model loaded from TOML
//!
//! ```toml
//! root = "workspace"
//!
//! [children]
//! workspace = ["src", "docs"]
//! src = ["main.rs", "lib.rs"]
//! ```
//!
//! Element names double as identities, so a name may appear only once.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

const SAMPLE: &str = r#"
root = "workspace"

[children]
workspace = ["crates", "docs", "Cargo.toml", "README.md"]
crates = ["core", "viewer"]
core = ["delta.rs", "path.rs", "token.rs"]
viewer = ["cache.rs", "state.rs", "viewer.rs"]
docs = ["guide.md"]
archive = ["old-notes.md", "drafts"]
drafts = ["idea.md"]
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct DemoModel {
    pub root: String,
    #[serde(default)]
    pub children: BTreeMap<String, Vec<String>>,
}

impl DemoModel {
    /// Built-in sample with a second top-level input, `archive`
    pub fn sample() -> Result<Self> {
        Self::from_toml_str(SAMPLE)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model {}", path.display()))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("Invalid model {}", path.display()))
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let model: DemoModel = toml::from_str(source).context("Failed to parse model")?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if !self.children.contains_key(&self.root) {
            bail!("root '{}' has no children entry", self.root);
        }
        let mut seen = HashSet::new();
        for name in self.children.values().flatten() {
            if !seen.insert(name) {
                bail!("element '{}' appears more than once", name);
            }
        }
        Ok(())
    }

    pub fn children(&self, element: &str) -> &[String] {
        self.children.get(element).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, element: &str) -> bool {
        self.children.contains_key(element)
            || self.children.values().flatten().any(|name| name == element)
    }

    /// Parentless elements other than the root
    pub fn other_inputs(&self) -> Vec<&str> {
        let nested: HashSet<&String> = self.children.values().flatten().collect();
        self.children
            .keys()
            .filter(|key| **key != self.root && !nested.contains(key))
            .map(String::as_str)
            .collect()
    }
}
