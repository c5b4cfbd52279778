use anyhow::{Context, bail};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use strsim::jaro_winkler;

use crate::config::{Config, Project};
use crate::pkg::cache::Cache;
use crate::pkg::fsutil;
use crate::pkg::importer::Importers;
use crate::pkg::install::{Installer, vendor_path};
use crate::pkg::lockfile::{LockFile, manifest_hash};
use crate::pkg::manifest::{Dependency, Manifest, path_within};
use crate::pkg::resolve::Resolver;
use crate::pkg::vcs::{Vcs, VcsType, backend, normalize_url};

/// Everything an action needs, built once per run.
pub struct Session {
    pub config: Config,
    pub vcs: Vcs,
    pub cache: Cache,
    pub importers: Importers,
}

impl Session {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Ok(Self::with_vcs(config, Vcs::system()?))
    }

    pub fn with_vcs(config: Config, vcs: Vcs) -> Self {
        Self {
            cache: config.cache(),
            importers: config.importers(),
            vcs,
            config,
        }
    }

    pub fn project(&self, cwd: &Path) -> anyhow::Result<Project> {
        Project::discover(cwd, &self.config)
    }
}

fn read_text(p: &Path) -> anyhow::Result<String> {
    fs::read_to_string(p).with_context(|| format!("read {}", p.display()))
}

fn write_text(p: &Path, s: &str) -> anyhow::Result<()> {
    fs::write(p, s).with_context(|| format!("write {}", p.display()))
}

/// `host/owner/repo` of the `origin` remote of the git checkout at `cwd`.
fn guess_package_from_git(cwd: &Path) -> Option<String> {
    let url = backend::run_tool(VcsType::Git, &["remote", "get-url", "origin"], Some(cwd)).ok()?;
    let s = normalize_url(&url);
    let seg: Vec<&str> = s.split('/').filter(|x| !x.is_empty()).collect();
    if seg.len() >= 3 {
        Some(format!("{}/{}/{}", seg[0], seg[1], seg[2]))
    } else {
        None
    }
}

/// Creates a manifest in `cwd`. Without an explicit name the package is
/// guessed from the git remote, then the directory name. Foreign metadata
/// found in `cwd` seeds the import list.
pub fn init(session: &Session, cwd: &Path, package: Option<String>) -> anyhow::Result<PathBuf> {
    let project = Project::at(cwd, &session.config);
    let path = project.manifest_path();
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let package = package
        .or_else(|| guess_package_from_git(cwd))
        .or_else(|| {
            cwd.file_name()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "example.com/you/project".to_string());

    let mut manifest = Manifest::new(package);
    if let Some((format, deps)) = session.importers.import_foreign(cwd)? {
        log::info!("importing {} dependencies from {}", deps.len(), format);
        for dep in deps {
            if !manifest.is_self(&dep.package) {
                manifest.add_import(dep)?;
            }
        }
    }
    manifest.sort_deterministic();
    write_text(&path, &manifest.to_toml()?)?;
    log::info!("initialized {}", path.display());
    Ok(path)
}

pub fn name(project: &Project) -> anyhow::Result<String> {
    Ok(Manifest::load(&project.manifest_path())?.package)
}

/// Resolves with the existing lock as a hint, vendors and rewrites the lock.
pub fn install(session: &Session, project: &Project) -> anyhow::Result<LockFile> {
    let _lock = session.config.system_lock()?;
    let text = read_text(&project.manifest_path())?;
    let manifest = Manifest::parse(&text, &project.manifest_path())?;
    let previous = LockFile::load_optional(&project.lock_path())?;
    if let Some(prev) = &previous
        && !prev.matches_manifest(&text)
    {
        log::warn!(
            "{} is older than {}; changed constraints will be re-resolved",
            project.lock_path().display(),
            project.manifest_path().display()
        );
    }
    sync(session, project, &manifest, &text, previous.as_ref(), true)
}

/// Like `install`, but ignores the pins of the existing lock.
pub fn update(session: &Session, project: &Project) -> anyhow::Result<LockFile> {
    let _lock = session.config.system_lock()?;
    let text = read_text(&project.manifest_path())?;
    let manifest = Manifest::parse(&text, &project.manifest_path())?;
    let previous = LockFile::load_optional(&project.lock_path())?;
    sync(session, project, &manifest, &text, previous.as_ref(), false)
}

/// Adds `path[#version]` specs to the manifest, then installs. The manifest
/// is only rewritten once resolution and installation succeeded.
pub fn get(
    session: &Session,
    project: &Project,
    specs: &[String],
    test: bool,
) -> anyhow::Result<LockFile> {
    let _lock = session.config.system_lock()?;
    let mut manifest = Manifest::load(&project.manifest_path())?;
    let added = add_packages(&mut manifest, specs, &session.vcs, test)?;
    manifest.sort_deterministic();
    let text = manifest.to_toml()?;
    let previous = LockFile::load_optional(&project.lock_path())?;
    let lock = sync(session, project, &manifest, &text, previous.as_ref(), true)?;
    write_text(&project.manifest_path(), &text)?;
    for name in added {
        log::info!("added {}", name);
    }
    Ok(lock)
}

/// Applies each `path[#version]` spec. A path inside an existing
/// dependency's repository becomes one of its subpackages; anything else is
/// added as a new dependency keyed by its repository root. Returns the
/// dependency names that were touched.
pub fn add_packages(
    manifest: &mut Manifest,
    specs: &[String],
    vcs: &Vcs,
    test: bool,
) -> anyhow::Result<Vec<String>> {
    let mut touched = BTreeSet::new();
    for spec in specs {
        let (path, version) = match spec.split_once('#') {
            Some((p, v)) => (p.trim(), Some(v.trim()).filter(|v| !v.is_empty())),
            None => (spec.trim(), None),
        };
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            bail!("empty package in `{}`", spec);
        }
        if manifest.is_self(path) {
            bail!("{} is part of this project", path);
        }

        let existing = manifest
            .imports
            .iter_mut()
            .chain(manifest.test_imports.iter_mut())
            .find(|d| path_within(path, &d.package));
        if let Some(dep) = existing {
            if path != dep.package {
                let sub = path[dep.package.len()..].trim_start_matches('/').to_string();
                if !dep.subpackages.contains(&sub) {
                    dep.subpackages.push(sub);
                    dep.subpackages.sort();
                }
            }
            if let Some(v) = version
                && dep.version.as_deref() != Some(v)
            {
                log::info!("{}: version {:?} -> {}", dep.package, dep.version, v);
                dep.version = Some(v.to_string());
            }
            touched.insert(dep.package.clone());
            continue;
        }

        let loc = vcs.locate(&Dependency::new(path))?;
        let mut dep = Dependency::new(loc.root.clone());
        dep.version = version.map(str::to_string);
        if !loc.subpath.is_empty() {
            dep.subpackages.push(loc.subpath.clone());
        }
        if test {
            manifest.add_test_import(dep)?;
        } else {
            manifest.add_import(dep)?;
        }
        touched.insert(loc.root);
    }
    Ok(touched.into_iter().collect())
}

/// Drops `names` from the manifest, deletes their vendored trees and
/// re-installs the rest. Unknown names only produce a warning.
pub fn remove(session: &Session, project: &Project, names: &[String]) -> anyhow::Result<LockFile> {
    let _lock = session.config.system_lock()?;
    let mut manifest = Manifest::load(&project.manifest_path())?;
    let removed = manifest.remove(names);
    for n in names.iter().filter(|n| !removed.contains(n)) {
        match suggest(n, &manifest) {
            Some(s) => log::warn!("{} is not a dependency (did you mean {}?)", n, s),
            None => log::warn!("{} is not a dependency", n),
        }
    }

    let vendor = project.vendor_dir();
    for n in &removed {
        let root = session.vcs.locate(&Dependency::new(n.as_str()))?.root;
        let dir = vendor_path(&vendor, &root)?;
        fsutil::remove_tree(&dir)?;
        fsutil::prune_empty_parents(&dir, &vendor);
        log::info!("removed {}", n);
    }

    manifest.sort_deterministic();
    let text = manifest.to_toml()?;
    write_text(&project.manifest_path(), &text)?;
    let previous = LockFile::load_optional(&project.lock_path())?;
    sync(session, project, &manifest, &text, previous.as_ref(), true)
}

fn suggest<'a>(name: &str, manifest: &'a Manifest) -> Option<&'a str> {
    manifest
        .imports
        .iter()
        .chain(manifest.test_imports.iter())
        .map(|d| (jaro_winkler(name, &d.package), d.package.as_str()))
        .filter(|(score, _)| *score >= 0.85)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, s)| s)
}

/// Converts foreign metadata in the project root into manifest imports.
/// With `dest` the merged manifest is written there; otherwise its text is
/// returned for printing.
pub fn import(
    session: &Session,
    project: &Project,
    dest: Option<&Path>,
) -> anyhow::Result<Option<String>> {
    let mut manifest = Manifest::load(&project.manifest_path())?;
    let Some((format, deps)) = session.importers.import_foreign(&project.root)? else {
        bail!("no foreign dependency metadata in {}", project.root.display());
    };
    log::info!("importing {} dependencies from {}", deps.len(), format);
    for dep in deps {
        if !manifest.is_self(&dep.package) {
            manifest.add_import(dep)?;
        }
    }
    manifest.sort_deterministic();
    let text = manifest.to_toml()?;
    match dest {
        Some(p) => {
            let _lock = if p == project.manifest_path() {
                Some(session.config.system_lock()?)
            } else {
                None
            };
            write_text(p, &text)?;
            Ok(None)
        }
        None => Ok(Some(text)),
    }
}

/// One line per locked package: `name reference revision`.
pub fn list(project: &Project) -> anyhow::Result<Vec<String>> {
    let lock = LockFile::load_optional(&project.lock_path())?
        .with_context(|| format!("{} not found (run `vendr install`)", project.lock_path().display()))?;
    let mut out = Vec::new();
    for e in &lock.imports {
        out.push(format!("{} {} {}", e.name, e.reference, e.revision));
    }
    for e in &lock.test_imports {
        out.push(format!("{} {} {} (test)", e.name, e.reference, e.revision));
    }
    Ok(out)
}

pub fn cache_clear(session: &Session) -> anyhow::Result<()> {
    let _lock = session.config.system_lock()?;
    session.cache.clear()?;
    log::info!("cleared {}", session.cache.root().display());
    Ok(())
}

/// Resolve, install, write the lock, then drop vendored trees the new lock
/// no longer mentions.
fn sync(
    session: &Session,
    project: &Project,
    manifest: &Manifest,
    manifest_text: &str,
    previous: Option<&LockFile>,
    use_hint: bool,
) -> anyhow::Result<LockFile> {
    session.cache.setup()?;
    let graph = Resolver::new(&session.vcs, &session.cache, &session.importers)
        .with_hint(previous.filter(|_| use_hint))
        .include_dev(session.config.resolve_dev)
        .resolve(manifest)?;

    let vendor = project.vendor_dir();
    Installer::new(&session.vcs, &session.cache, vendor.clone())
        .workers(session.config.workers)
        .install(&graph)
        .into_result()?;

    let lock = graph.to_lock(&manifest_hash(manifest_text));
    lock.write(&project.lock_path())?;

    if let Some(prev) = previous {
        for old in prev.entries() {
            if lock.get(&old.name).is_some() {
                continue;
            }
            let dir = vendor_path(&vendor, &old.name)?;
            fsutil::remove_tree(&dir)?;
            fsutil::prune_empty_parents(&dir, &vendor);
            log::debug!("dropped stale vendor tree {}", old.name);
        }
    }
    log::info!("locked {} packages", lock.imports.len() + lock.test_imports.len());
    Ok(lock)
}
