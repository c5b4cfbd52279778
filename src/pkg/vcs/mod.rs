// Purpose: Uniform clone/update/checkout/revision operations over several VCS tools.
// Inputs/Outputs: Dependencies in, `Location`s and working-copy side effects out.
// Invariants: Side effects stay inside the working copy directory handed in by the caller.
// Gotchas: Detection precedence is hint > URL suffix > hosting convention > git fallback.

pub mod backend;
pub mod detect;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::pkg::error::{PkgError, kind_of};
use crate::pkg::manifest::Dependency;

pub use backend::Backend;
pub use detect::{Detection, Detector, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsType {
    Git,
    Hg,
    Bzr,
    Svn,
}

impl VcsType {
    pub const ALL: [VcsType; 4] = [Self::Git, Self::Hg, Self::Bzr, Self::Svn];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Hg => "hg",
            Self::Bzr => "bzr",
            Self::Svn => "svn",
        }
    }

    pub fn metadata_dir(self) -> &'static str {
        match self {
            Self::Git => ".git",
            Self::Hg => ".hg",
            Self::Bzr => ".bzr",
            Self::Svn => ".svn",
        }
    }
}

impl fmt::Display for VcsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VcsType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(Self::Git),
            "hg" | "mercurial" => Ok(Self::Hg),
            "bzr" | "bazaar" => Ok(Self::Bzr),
            "svn" | "subversion" => Ok(Self::Svn),
            other => anyhow::bail!("unknown vcs `{}`", other),
        }
    }
}

/// Where a package lives: the repository root import path, the remainder of
/// the requested import path below it, the fetch URL and the VCS type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub root: String,
    pub subpath: String,
    pub url: String,
    pub kind: VcsType,
}

/// Normalized (URL, VCS type) pair. One shared working copy per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub url: String,
    pub kind: VcsType,
}

impl Location {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            url: normalize_url(&self.url),
            kind: self.kind,
        }
    }
}

/// Strips scheme, user info, `.git` and trailing slashes; rewrites scp-style
/// `host:path`; lower-cases the host.
pub fn normalize_url(url: &str) -> String {
    let mut s = url.trim().to_string();
    if let Some(idx) = s.find("://") {
        s = s[idx + 3..].to_string();
    }
    if let Some(idx) = s.find('@')
        && !s[..idx].contains('/')
    {
        s = s[idx + 1..].to_string();
    }
    if let Some(idx) = s.find(':')
        && !s[..idx].contains('/')
    {
        let host = &s[..idx];
        let path = s[idx + 1..].trim_start_matches('/');
        s = format!("{}/{}", host, path);
    }
    let mut s = s.trim_end_matches('/').to_string();
    if let Some(rest) = s.strip_suffix(".git") {
        s = rest.to_string();
    }
    match s.find('/') {
        Some(idx) => format!("{}{}", s[..idx].to_ascii_lowercase(), &s[idx..]),
        None => s.to_ascii_lowercase(),
    }
}

/// Detector strategy list plus one back-end per VCS type.
pub struct Vcs {
    detectors: Vec<Box<dyn Detector>>,
    backends: HashMap<VcsType, Arc<dyn Backend>>,
}

impl Vcs {
    /// Default detectors and the command-line back-ends.
    pub fn system() -> anyhow::Result<Self> {
        let mut vcs = Self::with_detectors(detect::default_detectors()?);
        for b in backend::command_backends() {
            vcs = vcs.with_backend(b);
        }
        Ok(vcs)
    }

    pub fn with_detectors(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self {
            detectors,
            backends: HashMap::new(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    /// Runs the detector list in priority order; each field of the result
    /// comes from the first detector that supplies it.
    pub fn locate(&self, dep: &Dependency) -> anyhow::Result<Location> {
        let req = Request {
            import_path: dep.package.trim_end_matches('/'),
            repo: dep.repo.as_deref(),
            hint: dep.vcs,
        };
        let mut found = Detection::default();
        for d in &self.detectors {
            if let Some(det) = d.detect(&req) {
                log::trace!("detector {} matched {}", d.name(), req.import_path);
                found.fill_from(det);
            }
            if found.is_complete() {
                break;
            }
        }

        let root = found
            .root
            .unwrap_or_else(|| detect::fallback_root(req.import_path));
        let subpath = req
            .import_path
            .strip_prefix(&root)
            .map(|r| r.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let url = match req.repo {
            Some(r) => r.to_string(),
            None => found.url.unwrap_or_else(|| format!("https://{}", root)),
        };
        let kind = found.kind.unwrap_or(VcsType::Git);
        Ok(Location {
            root,
            subpath,
            url,
            kind,
        })
    }

    pub fn backend(&self, loc: &Location) -> anyhow::Result<&dyn Backend> {
        self.backends
            .get(&loc.kind)
            .map(|b| b.as_ref())
            .ok_or_else(|| {
                PkgError::UnsupportedVcs {
                    package: loc.root.clone(),
                    vcs: loc.kind.to_string(),
                    detail: "no back-end registered".into(),
                }
                .into()
            })
    }

    /// Clones into `wc` unless a working copy of the right type is there.
    pub fn ensure(&self, loc: &Location, wc: &Path) -> anyhow::Result<PathBuf> {
        let b = self.backend(loc)?;
        if wc.join(b.metadata_dir()).is_dir() {
            return Ok(wc.to_path_buf());
        }
        if wc.exists() {
            log::warn!("discarding unusable working copy {}", wc.display());
            fs::remove_dir_all(wc).with_context(|| format!("remove {}", wc.display()))?;
        }
        if let Some(parent) = wc.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        log::info!("fetching {} from {}", loc.root, loc.url);
        if let Err(e) = b.clone_repo(&loc.url, wc) {
            // A half-written clone would be mistaken for a good one next run.
            let _ = fs::remove_dir_all(wc);
            return Err(unreachable(loc, e));
        }
        Ok(wc.to_path_buf())
    }

    pub fn update(&self, loc: &Location, wc: &Path) -> anyhow::Result<()> {
        log::debug!("updating {}", loc.root);
        self.backend(loc)?
            .update(wc)
            .map_err(|e| unreachable(loc, e))
    }

    /// Moves the working copy to `reference`, fetching once if it is unknown.
    pub fn checkout(&self, loc: &Location, wc: &Path, reference: &str) -> anyhow::Result<()> {
        let b = self.backend(loc)?;
        if !b.is_reference(wc, reference) {
            self.update(loc, wc)?;
            if !b.is_reference(wc, reference) {
                return Err(PkgError::ReferenceNotFound {
                    package: loc.root.clone(),
                    reference: reference.to_string(),
                }
                .into());
            }
        }
        log::debug!("checking out {} at {}", loc.root, reference);
        b.checkout(wc, reference)
            .with_context(|| format!("checkout {} at {}", loc.root, reference))
    }

    pub fn current_revision(&self, loc: &Location, wc: &Path) -> anyhow::Result<String> {
        self.backend(loc)?
            .current_revision(wc)
            .with_context(|| format!("read revision of {}", loc.root))
    }

    pub fn tags(&self, loc: &Location, wc: &Path) -> anyhow::Result<Vec<String>> {
        self.backend(loc)?.tags(wc)
    }

    pub fn branches(&self, loc: &Location, wc: &Path) -> anyhow::Result<Vec<String>> {
        self.backend(loc)?.branches(wc)
    }

    pub fn default_branch(&self, loc: &Location, wc: &Path) -> anyhow::Result<String> {
        self.backend(loc)?.default_branch(wc)
    }

    pub fn is_reference(&self, loc: &Location, wc: &Path, reference: &str) -> bool {
        self.backend(loc)
            .map(|b| b.is_reference(wc, reference))
            .unwrap_or(false)
    }
}

fn unreachable(loc: &Location, err: anyhow::Error) -> anyhow::Error {
    if kind_of(&err).is_some() {
        return err;
    }
    PkgError::VcsUnreachable {
        package: loc.root.clone(),
        url: loc.url.clone(),
        detail: format!("{:#}", err),
    }
    .into()
}
