// Purpose: Materialize resolved packages into the vendor tree with a bounded worker pool.
// Inputs/Outputs: Install tasks in, one outcome per package (entry or captured error) out.
// Invariants: Same cache key never checked out concurrently; one failure never cancels siblings.
// Gotchas: Results arrive in completion order; only same-key tasks are ordered among themselves.

use anyhow::{anyhow, bail};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, mpsc};
use std::thread;

use crate::pkg::cache::{Cache, hold};
use crate::pkg::fsutil;
use crate::pkg::lockfile::ResolvedEntry;
use crate::pkg::resolve::Graph;
use crate::pkg::vcs::{CacheKey, Location, Vcs};

pub const DEFAULT_WORKERS: usize = 20;

/// One package to copy into the vendor tree at a pinned revision.
#[derive(Debug, Clone)]
pub struct Task {
    pub location: Location,
    pub entry: ResolvedEntry,
}

pub struct InstallReport {
    pub outcomes: BTreeMap<String, anyhow::Result<ResolvedEntry>>,
}

impl InstallReport {
    pub fn installed(&self) -> impl Iterator<Item = &ResolvedEntry> {
        self.outcomes.values().filter_map(|o| o.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &anyhow::Error)> {
        self.outcomes
            .iter()
            .filter_map(|(name, o)| o.as_ref().err().map(|e| (name.as_str(), e)))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Fail-together: every entry on success, otherwise one error listing
    /// each failed package. A single failure is passed through unchanged so
    /// its typed kind stays visible to callers.
    pub fn into_result(self) -> anyhow::Result<Vec<ResolvedEntry>> {
        let mut ok = Vec::new();
        let mut failed: Vec<(String, anyhow::Error)> = Vec::new();
        for (name, outcome) in self.outcomes {
            match outcome {
                Ok(e) => ok.push(e),
                Err(e) => failed.push((name, e)),
            }
        }
        if failed.is_empty() {
            return Ok(ok);
        }
        if failed.len() == 1
            && let Some((name, err)) = failed.pop()
        {
            return Err(err.context(format!("install {} failed", name)));
        }
        let mut msg = format!("{} packages failed to install:", failed.len());
        for (name, err) in &failed {
            msg.push_str(&format!("\n  {}: {:#}", name, err));
        }
        Err(anyhow!(msg))
    }
}

pub struct Installer<'a> {
    vcs: &'a Vcs,
    cache: &'a Cache,
    vendor: PathBuf,
    workers: usize,
}

impl<'a> Installer<'a> {
    pub fn new(vcs: &'a Vcs, cache: &'a Cache, vendor: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            cache,
            vendor: vendor.into(),
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }

    pub fn install(&self, graph: &Graph) -> InstallReport {
        let tasks = graph
            .nodes()
            .map(|n| Task {
                location: n.location.clone(),
                entry: n.entry(),
            })
            .collect();
        self.run(tasks)
    }

    /// Runs every task. Tasks sharing a cache key form one batch that a
    /// single worker runs in the order given, so the last of them wins.
    pub fn run(&self, tasks: Vec<Task>) -> InstallReport {
        let total = tasks.len();
        let batches = batch_by_key(tasks);
        let width = self.workers.min(batches.len()).max(1);
        log::info!("installing {} packages with {} workers", total, width);

        let (batch_tx, batch_rx) = mpsc::channel::<Vec<Task>>();
        for b in batches {
            // The receiver is alive until the end of this function.
            let _ = batch_tx.send(b);
        }
        drop(batch_tx);
        let batch_rx = Mutex::new(batch_rx);
        let (res_tx, res_rx) = mpsc::channel::<(String, anyhow::Result<ResolvedEntry>)>();

        thread::scope(|s| {
            for _ in 0..width {
                let res_tx = res_tx.clone();
                let batch_rx = &batch_rx;
                s.spawn(move || {
                    loop {
                        let next = batch_rx.lock().unwrap_or_else(|e| e.into_inner()).recv();
                        let Ok(batch) = next else {
                            break;
                        };
                        for task in batch {
                            let name = task.entry.name.clone();
                            let outcome =
                                panic::catch_unwind(AssertUnwindSafe(|| self.install_one(&task)))
                                    .unwrap_or_else(|_| Err(anyhow!("installing {} panicked", name)));
                            if let Err(e) = &outcome {
                                log::debug!("{} failed: {:#}", name, e);
                            }
                            if res_tx.send((name, outcome)).is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        drop(res_tx);

        InstallReport {
            outcomes: res_rx.into_iter().collect(),
        }
    }

    fn install_one(&self, task: &Task) -> anyhow::Result<ResolvedEntry> {
        let dst = vendor_path(&self.vendor, &task.entry.name)?;
        let key = task.location.cache_key();
        let key_lock = self.cache.key_lock(&key);
        let _guard = hold(&key_lock);

        let wc = self
            .vcs
            .ensure(&task.location, &self.cache.working_copy(&key))?;
        self.vcs
            .checkout(&task.location, &wc, &task.entry.revision)?;
        let revision = self.vcs.current_revision(&task.location, &wc)?;
        if revision != task.entry.revision {
            bail!(
                "{}: working copy is at {} after checking out {}",
                task.entry.name,
                revision,
                task.entry.revision
            );
        }
        fsutil::replace_tree(&wc, &dst)?;
        log::debug!("vendored {} at {}", task.entry.name, task.entry.reference);
        Ok(task.entry.clone())
    }
}

/// Groups tasks by cache key, keeping first-seen order across groups and
/// dispatch order within each.
fn batch_by_key(tasks: Vec<Task>) -> Vec<Vec<Task>> {
    let mut index: HashMap<CacheKey, usize> = HashMap::new();
    let mut batches: Vec<Vec<Task>> = Vec::new();
    for t in tasks {
        let key = t.location.cache_key();
        match index.get(&key) {
            Some(&i) => batches[i].push(t),
            None => {
                index.insert(key, batches.len());
                batches.push(vec![t]);
            }
        }
    }
    batches
}

/// `vendor/<import path>`, refusing paths that would escape the vendor dir.
pub fn vendor_path(vendor: &Path, import_path: &str) -> anyhow::Result<PathBuf> {
    let rel = Path::new(import_path);
    if import_path.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("refusing to vendor unsafe import path `{}`", import_path);
    }
    Ok(vendor.join(rel))
}
