use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::pkg::cache::url_hash;
use crate::pkg::vcs::VcsType;

/// One pinned package: what was asked for and what was materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntry {
    pub name: String,
    /// Branch, tag or commit that was checked out.
    pub reference: String,
    /// Immutable revision id behind `reference`.
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<VcsType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subpackages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFile {
    /// Hash of the manifest text the lock was produced from.
    pub hash: String,
    #[serde(default)]
    pub imports: Vec<ResolvedEntry>,
    #[serde(default)]
    pub test_imports: Vec<ResolvedEntry>,
}

impl LockFile {
    /// Builds a lock whose content depends only on the entries, never on the
    /// order they were produced in.
    pub fn new(
        manifest_hash: impl Into<String>,
        imports: impl IntoIterator<Item = ResolvedEntry>,
        test_imports: impl IntoIterator<Item = ResolvedEntry>,
    ) -> Self {
        Self {
            hash: manifest_hash.into(),
            imports: sorted(imports),
            test_imports: sorted(test_imports),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
    }

    /// Missing lock files are not an error; there is simply no hint.
    pub fn load_optional(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        let mut copy = self.clone();
        copy.imports = sorted(copy.imports);
        copy.test_imports = sorted(copy.test_imports);
        let mut text = serde_json::to_string_pretty(&copy)?;
        text.push('\n');
        Ok(text)
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, self.to_json()?).with_context(|| format!("write {}", path.display()))
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedEntry> {
        self.imports
            .iter()
            .chain(self.test_imports.iter())
            .find(|e| e.name == name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ResolvedEntry> {
        self.imports.iter().chain(self.test_imports.iter())
    }

    pub fn matches_manifest(&self, manifest_text: &str) -> bool {
        self.hash == manifest_hash(manifest_text)
    }
}

pub fn manifest_hash(manifest_text: &str) -> String {
    url_hash(manifest_text)
}

fn sorted(entries: impl IntoIterator<Item = ResolvedEntry>) -> Vec<ResolvedEntry> {
    let mut v: Vec<ResolvedEntry> = entries
        .into_iter()
        .map(|mut e| {
            e.subpackages.sort();
            e.subpackages.dedup();
            e
        })
        .collect();
    v.sort_by(|a, b| a.name.cmp(&b.name));
    v.dedup_by(|a, b| a.name == b.name);
    v
}
