use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::pkg::constraint::{Constraint, intersect_ranges};
use crate::pkg::error::PkgError;
use crate::pkg::vcs::VcsType;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub package: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_dirs: Vec<String>,
    #[serde(default, rename = "import", skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<Dependency>,
    #[serde(default, rename = "testImport", skip_serializing_if = "Vec::is_empty")]
    pub test_imports: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<VcsType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subpackages: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore: bool,
}

impl Dependency {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn constraint(&self) -> Constraint {
        Constraint::parse(self.version.as_deref())
    }

    /// Folds `other` (same package) into `self`. Subpackages are unioned; an
    /// empty version adopts the other's and two ranges are intersected.
    /// Statically incompatible versions are a `ConstraintConflict` attributed
    /// to the two requesters.
    pub fn merge(
        &mut self,
        other: &Dependency,
        self_requester: &str,
        other_requester: &str,
    ) -> anyhow::Result<()> {
        let mine = self.constraint();
        let theirs = other.constraint();
        if !mine.compatible_with(&theirs) {
            return Err(PkgError::ConstraintConflict {
                package: self.package.clone(),
                first_requester: self_requester.to_string(),
                first_constraint: mine.to_string(),
                second_requester: other_requester.to_string(),
                second_constraint: theirs.to_string(),
            }
            .into());
        }
        match (&mine, &theirs) {
            (Constraint::Any, _) => self.version = other.version.clone(),
            (Constraint::Range { raw: a, req: ra }, Constraint::Range { raw: b, req: rb })
                if a != b =>
            {
                self.version = Some(intersect_ranges(ra, rb));
            }
            _ => {}
        }
        if self.repo.is_none() {
            self.repo = other.repo.clone();
        }
        if self.vcs.is_none() {
            self.vcs = other.vcs;
        }
        for s in &other.subpackages {
            if !self.subpackages.contains(s) {
                self.subpackages.push(s.clone());
            }
        }
        self.subpackages.sort();
        self.ignore |= other.ignore;
        Ok(())
    }
}

impl Manifest {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            ..Default::default()
        }
    }

    pub fn parse(toml_text: &str, origin: &Path) -> anyhow::Result<Self> {
        let mut mf = toml::from_str::<Manifest>(toml_text).map_err(|e| {
            PkgError::ManifestMalformed {
                path: origin.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        mf.validate(origin)?;
        mf.normalize()?;
        Ok(mf)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::parse(&text, path)
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, self.to_toml()?).with_context(|| format!("write {}", path.display()))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        let mut copy = self.clone();
        copy.sort_deterministic();
        Ok(toml::to_string_pretty(&copy)?)
    }

    fn validate(&self, origin: &Path) -> anyhow::Result<()> {
        let malformed = |detail: String| PkgError::ManifestMalformed {
            path: origin.to_path_buf(),
            detail,
        };
        for (list, deps) in [("import", &self.imports), ("testImport", &self.test_imports)] {
            for (i, d) in deps.iter().enumerate() {
                if d.package.trim().is_empty() {
                    return Err(malformed(format!("{}[{}] has an empty `package`", list, i)).into());
                }
                if d.package.contains(char::is_whitespace) {
                    return Err(malformed(format!(
                        "{}[{}]: `{}` is not an import path",
                        list, i, d.package
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Merges duplicate entries within each list and sorts subpackage sets.
    pub fn normalize(&mut self) -> anyhow::Result<()> {
        let requester = self.package.clone();
        self.imports = dedupe(std::mem::take(&mut self.imports), &requester)?;
        self.test_imports = dedupe(std::mem::take(&mut self.test_imports), &requester)?;
        Ok(())
    }

    pub fn has_dependency(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.imports
            .iter()
            .chain(self.test_imports.iter())
            .find(|d| d.package == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Dependency> {
        self.imports
            .iter_mut()
            .chain(self.test_imports.iter_mut())
            .find(|d| d.package == name)
    }

    pub fn add_import(&mut self, dep: Dependency) -> anyhow::Result<()> {
        let requester = self.package.clone();
        merge_into(&mut self.imports, dep, &requester)
    }

    pub fn add_test_import(&mut self, dep: Dependency) -> anyhow::Result<()> {
        let requester = self.package.clone();
        merge_into(&mut self.test_imports, dep, &requester)
    }

    /// Drops every listed name from both import lists. Names that are not
    /// present are ignored. Returns the names that were actually removed.
    pub fn remove(&mut self, names: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        for list in [&mut self.imports, &mut self.test_imports] {
            list.retain(|d| {
                if names.iter().any(|n| *n == d.package) {
                    removed.push(d.package.clone());
                    false
                } else {
                    true
                }
            });
        }
        removed.sort();
        removed.dedup();
        removed
    }

    /// Whether `name` is on the ignore list, either exactly or as a prefix
    /// path.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|i| path_within(name, i))
    }

    /// Whether `name` points into one of the project's excluded directories.
    pub fn is_excluded(&self, name: &str) -> bool {
        let Some(rel) = name
            .strip_prefix(&self.package)
            .and_then(|r| r.strip_prefix('/'))
        else {
            return false;
        };
        self.exclude_dirs
            .iter()
            .map(|d| d.trim_start_matches("./").trim_end_matches('/'))
            .any(|d| !d.is_empty() && path_within(rel, d))
    }

    /// Whether `name` is the project itself or one of its own packages.
    pub fn is_self(&self, name: &str) -> bool {
        !self.package.is_empty() && path_within(name, &self.package)
    }

    pub fn sort_deterministic(&mut self) {
        self.imports.sort_by(|a, b| a.package.cmp(&b.package));
        self.test_imports.sort_by(|a, b| a.package.cmp(&b.package));
        for d in self.imports.iter_mut().chain(self.test_imports.iter_mut()) {
            d.subpackages.sort();
            d.subpackages.dedup();
        }
        self.ignore.sort();
        self.ignore.dedup();
    }
}

/// `path` equals `base` or lies below it.
pub fn path_within(path: &str, base: &str) -> bool {
    path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn merge_into(list: &mut Vec<Dependency>, dep: Dependency, requester: &str) -> anyhow::Result<()> {
    match list.iter_mut().find(|d| d.package == dep.package) {
        Some(existing) => existing.merge(&dep, requester, requester),
        None => {
            let mut dep = dep;
            dep.subpackages.sort();
            dep.subpackages.dedup();
            list.push(dep);
            Ok(())
        }
    }
}

fn dedupe(deps: Vec<Dependency>, requester: &str) -> anyhow::Result<Vec<Dependency>> {
    let mut out: Vec<Dependency> = Vec::with_capacity(deps.len());
    for d in deps {
        merge_into(&mut out, d, requester)?;
    }
    Ok(out)
}
