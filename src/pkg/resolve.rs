// Purpose: Walk the transitive dependency graph and pin one reference/revision per repository root.
// Inputs/Outputs: Root manifest (+ optional lock hint) in, `Graph` of resolved nodes out.
// Invariants: Nodes are inserted before their children are processed, so cycles terminate.
// Gotchas: Greedy and non-backtracking; incompatible requests fail instead of searching alternatives.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::Path;

use crate::pkg::cache::{Cache, hold};
use crate::pkg::constraint::{Constraint, highest_matching};
use crate::pkg::error::PkgError;
use crate::pkg::importer::Importers;
use crate::pkg::lockfile::{LockFile, ResolvedEntry};
use crate::pkg::manifest::{Dependency, Manifest};
use crate::pkg::vcs::{CacheKey, Location, Vcs, VcsType};

/// One requester's demand on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub requester: String,
    pub constraint: Constraint,
}

#[derive(Debug, Clone)]
pub struct Node {
    /// Repository root import path; the graph key.
    pub name: String,
    pub location: Location,
    pub repo: Option<String>,
    pub vcs: Option<VcsType>,
    pub requirements: Vec<Requirement>,
    pub subpackages: BTreeSet<String>,
    pub reference: String,
    pub revision: String,
    /// Roots this node's own metadata depends on.
    pub edges: BTreeSet<String>,
    /// Only reachable through test imports.
    pub dev: bool,
}

impl Node {
    fn new(location: Location, dep: &Dependency) -> Self {
        Self {
            name: location.root.clone(),
            location,
            repo: dep.repo.clone(),
            vcs: dep.vcs,
            requirements: Vec::new(),
            subpackages: BTreeSet::new(),
            reference: String::new(),
            revision: String::new(),
            edges: BTreeSet::new(),
            dev: false,
        }
    }

    fn add_subpackages(&mut self, subpath: &str, extra: &[String]) {
        if !subpath.is_empty() {
            self.subpackages.insert(subpath.to_string());
        }
        for s in extra {
            let s = s.trim_matches('/');
            if !s.is_empty() {
                self.subpackages.insert(s.to_string());
            }
        }
    }

    fn check_compatible(&self, req: &Requirement) -> anyhow::Result<()> {
        for r in &self.requirements {
            if !r.constraint.compatible_with(&req.constraint) {
                return Err(PkgError::ConstraintConflict {
                    package: self.name.clone(),
                    first_requester: r.requester.clone(),
                    first_constraint: r.constraint.to_string(),
                    second_requester: req.requester.clone(),
                    second_constraint: req.constraint.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn selection_satisfies_all(&self) -> bool {
        self.requirements
            .iter()
            .all(|r| r.constraint.accepts(&self.reference))
    }

    pub fn entry(&self) -> ResolvedEntry {
        ResolvedEntry {
            name: self.name.clone(),
            reference: self.reference.clone(),
            revision: self.revision.clone(),
            repo: self.repo.clone(),
            vcs: self.vcs,
            subpackages: self.subpackages.iter().cloned().collect(),
        }
    }
}

/// Result of a resolution: one node per distinct repository root.
#[derive(Debug, Default)]
pub struct Graph {
    pub package: String,
    nodes: BTreeMap<String, Node>,
    roots: BTreeSet<String>,
    dev_roots: BTreeSet<String>,
}

impl Graph {
    fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            ..Self::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Production and dev-only entries, each sorted by name.
    pub fn entries(&self) -> (Vec<ResolvedEntry>, Vec<ResolvedEntry>) {
        let (dev, prod): (Vec<&Node>, Vec<&Node>) = self.nodes.values().partition(|n| n.dev);
        (
            prod.into_iter().map(Node::entry).collect(),
            dev.into_iter().map(Node::entry).collect(),
        )
    }

    pub fn to_lock(&self, manifest_hash: &str) -> LockFile {
        let (imports, test_imports) = self.entries();
        LockFile::new(manifest_hash, imports, test_imports)
    }

    /// Drops nodes no longer reachable from the manifest (left behind when a
    /// node was re-selected and its old dependencies went away) and marks
    /// nodes only reachable from test imports as dev.
    fn prune(&mut self) {
        let prod = self.reachable(&self.roots);
        let dev = self.reachable(&self.dev_roots);
        self.nodes
            .retain(|name, _| prod.contains(name) || dev.contains(name));
        for (name, node) in self.nodes.iter_mut() {
            node.dev = !prod.contains(name);
        }
    }

    fn reachable(&self, from: &BTreeSet<String>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut work: Vec<&String> = from.iter().collect();
        while let Some(name) = work.pop() {
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            work.extend(node.edges.iter());
        }
        seen
    }
}

struct Pending {
    dep: Dependency,
    requester: String,
    /// `Some(dev)` for entries taken directly from the root manifest.
    root: Option<bool>,
}

pub struct Resolver<'a> {
    vcs: &'a Vcs,
    cache: &'a Cache,
    importers: &'a Importers,
    hint: Option<&'a LockFile>,
    include_dev: bool,
    /// Keys fetched during this run; each is updated at most once.
    refreshed: RefCell<HashSet<CacheKey>>,
}

impl<'a> Resolver<'a> {
    pub fn new(vcs: &'a Vcs, cache: &'a Cache, importers: &'a Importers) -> Self {
        Self {
            vcs,
            cache,
            importers,
            hint: None,
            include_dev: true,
            refreshed: RefCell::new(HashSet::new()),
        }
    }

    /// Previous lock whose pins are preferred while they still satisfy the
    /// current constraints.
    pub fn with_hint(mut self, hint: Option<&'a LockFile>) -> Self {
        self.hint = hint;
        self
    }

    pub fn include_dev(mut self, yes: bool) -> Self {
        self.include_dev = yes;
        self
    }

    pub fn resolve(&self, manifest: &Manifest) -> anyhow::Result<Graph> {
        let mut graph = Graph::new(&manifest.package);
        let mut queue: VecDeque<Pending> = VecDeque::new();
        for dep in &manifest.imports {
            queue.push_back(Pending {
                dep: dep.clone(),
                requester: manifest.package.clone(),
                root: Some(false),
            });
        }
        if self.include_dev {
            for dep in &manifest.test_imports {
                queue.push_back(Pending {
                    dep: dep.clone(),
                    requester: manifest.package.clone(),
                    root: Some(true),
                });
            }
        }

        while let Some(p) = queue.pop_front() {
            if skipped(manifest, &p.dep) {
                log::debug!("skipping {} (requested by {})", p.dep.package, p.requester);
                continue;
            }
            let loc = self.vcs.locate(&p.dep)?;
            let name = loc.root.clone();
            if manifest.is_ignored(&name) || manifest.is_self(&name) {
                continue;
            }
            match p.root {
                Some(true) => {
                    graph.dev_roots.insert(name.clone());
                }
                Some(false) => {
                    graph.roots.insert(name.clone());
                }
                None => {}
            }
            let req = Requirement {
                requester: p.requester.clone(),
                constraint: p.dep.constraint(),
            };

            if let Some(node) = graph.nodes.get_mut(&name) {
                node.add_subpackages(&loc.subpath, &p.dep.subpackages);
                if node.requirements.contains(&req) {
                    continue;
                }
                node.check_compatible(&req)?;
                node.requirements.push(req);
                if node.selection_satisfies_all() {
                    continue;
                }
                log::debug!(
                    "{} narrowed by {}; re-selecting from {}",
                    name,
                    p.requester,
                    node.reference
                );
                let children = self.materialize(node)?;
                node.edges = self.child_edges(manifest, &children)?;
                enqueue(&mut queue, &name, children);
                continue;
            }

            let mut node = Node::new(loc.clone(), &p.dep);
            node.add_subpackages(&loc.subpath, &p.dep.subpackages);
            node.requirements.push(req);
            let children = self.materialize(&mut node)?;
            node.edges = self.child_edges(manifest, &children)?;
            log::debug!(
                "resolved {} at {} ({})",
                node.name,
                node.reference,
                node.revision
            );
            graph.nodes.insert(name.clone(), node);
            enqueue(&mut queue, &name, children);
        }

        graph.prune();
        log::info!("resolved {} packages", graph.len());
        Ok(graph)
    }

    /// Checks out the best reference for `node` under its key lock and
    /// returns the dependencies its own metadata declares.
    fn materialize(&self, node: &mut Node) -> anyhow::Result<Vec<Dependency>> {
        let key = node.location.cache_key();
        let key_lock = self.cache.key_lock(&key);
        let _guard = hold(&key_lock);
        let path = self.cache.working_copy(&key);
        let existed = path
            .join(self.vcs.backend(&node.location)?.metadata_dir())
            .is_dir();
        let wc = self.vcs.ensure(&node.location, &path)?;

        let (reference, target) = self.select(node, &wc, existed)?;
        self.vcs.checkout(&node.location, &wc, &target)?;
        node.revision = self.vcs.current_revision(&node.location, &wc)?;
        node.reference = reference;

        Ok(match self.importers.import(&wc)? {
            Some((format, deps)) => {
                log::trace!("{} declares {} deps ({})", node.name, deps.len(), format);
                deps
            }
            None => Vec::new(),
        })
    }

    /// Fetches `loc` unless that already happened in this run.
    fn refresh(&self, loc: &Location, wc: &Path) -> anyhow::Result<bool> {
        if !self.refreshed.borrow_mut().insert(loc.cache_key()) {
            return Ok(false);
        }
        self.vcs.update(loc, wc)?;
        Ok(true)
    }

    /// Returns `(reference, checkout target)`. The target differs from the
    /// reference only when a lock pin supplies the exact revision. A working
    /// copy left by an earlier run is fetched before choosing among its refs.
    fn select(&self, node: &Node, wc: &Path, existed: bool) -> anyhow::Result<(String, String)> {
        let loc = &node.location;
        if let Some(pin) = self.hint.and_then(|l| l.get(&node.name)) {
            let ok = !pin.reference.is_empty()
                && node
                    .requirements
                    .iter()
                    .all(|r| r.constraint.accepts(&pin.reference));
            if ok {
                return Ok((pin.reference.clone(), pin.revision.clone()));
            }
            log::warn!(
                "lock pin {}@{} no longer satisfies the constraints; re-resolving",
                node.name,
                pin.reference
            );
        }
        if existed {
            self.refresh(loc, wc)?;
        }

        let mut ranges = Vec::new();
        let mut raws = BTreeSet::new();
        for r in &node.requirements {
            match &r.constraint {
                Constraint::Any => {}
                Constraint::Literal(s) => return Ok((s.clone(), s.clone())),
                Constraint::Range { raw, req } => {
                    ranges.push(req);
                    raws.insert(raw.as_str());
                }
            }
        }
        if ranges.is_empty() {
            let branch = self.vcs.default_branch(loc, wc)?;
            return Ok((branch.clone(), branch));
        }
        // A single requested label that names a real ref is taken as is.
        if raws.len() == 1
            && let Some(raw) = raws.first()
            && self.vcs.is_reference(loc, wc, raw)
        {
            return Ok((raw.to_string(), raw.to_string()));
        }

        let mut tags = self.vcs.tags(loc, wc)?;
        let mut pick = highest_matching(&ranges, &tags);
        if pick.is_none() && self.refresh(loc, wc)? {
            tags = self.vcs.tags(loc, wc)?;
            pick = highest_matching(&ranges, &tags);
        }
        match pick {
            Some(tag) => Ok((tag.clone(), tag)),
            None if ranges.len() == 1 => Err(PkgError::ReferenceNotFound {
                package: node.name.clone(),
                reference: raws.into_iter().collect::<Vec<_>>().join(", "),
            }
            .into()),
            // Pairwise compatible ranges with no tag in common: name who asked.
            None => Err(PkgError::ReferenceNotFound {
                package: node.name.clone(),
                reference: node
                    .requirements
                    .iter()
                    .filter(|r| matches!(r.constraint, Constraint::Range { .. }))
                    .map(|r| format!("{} from {}", r.constraint, r.requester))
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into()),
        }
    }

    fn child_edges(
        &self,
        manifest: &Manifest,
        children: &[Dependency],
    ) -> anyhow::Result<BTreeSet<String>> {
        let mut edges = BTreeSet::new();
        for dep in children {
            if skipped(manifest, dep) {
                continue;
            }
            let root = self.vcs.locate(dep)?.root;
            if !manifest.is_ignored(&root) && !manifest.is_self(&root) {
                edges.insert(root);
            }
        }
        Ok(edges)
    }
}

fn skipped(manifest: &Manifest, dep: &Dependency) -> bool {
    dep.ignore
        || manifest.is_ignored(&dep.package)
        || manifest.is_excluded(&dep.package)
        || manifest.is_self(&dep.package)
}

fn enqueue(queue: &mut VecDeque<Pending>, requester: &str, children: Vec<Dependency>) {
    for dep in children {
        queue.push_back(Pending {
            dep,
            requester: requester.to_string(),
            root: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::Resolver;
    use crate::pkg::error::{PkgError, kind_of};
    use crate::pkg::lockfile::LockFile;
    use crate::pkg::manifest::{Dependency, Manifest};
    use crate::pkg::testutil::{Fixture, MemoryRepo, manifest_text};
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn manifest(text: &str) -> Manifest {
        Manifest::parse(text, Path::new("vendr.toml")).expect("manifest")
    }

    fn lib_repo() -> MemoryRepo {
        MemoryRepo::new()
            .commit("c100", &[("lib.go", "v1.0.0")])
            .tag("v1.0.0")
            .commit("c120", &[("lib.go", "v1.2.0")])
            .tag("v1.2.0")
            .commit("c200", &[("lib.go", "v2.0.0")])
            .tag("v2.0.0")
            .commit("c300", &[("lib.go", "tip")])
    }

    #[test]
    fn range_resolves_to_highest_satisfying_tag_commit() {
        let fx = Fixture::new();
        fx.backend.publish("https://example.com/a/lib", lib_repo());
        let m = manifest(&manifest_text("proj", &[("example.com/a/lib", "^1.0.0")]));

        let graph = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect("resolve");
        let (prod, dev) = graph.entries();
        assert_eq!(prod.len(), 1);
        assert!(dev.is_empty());
        assert_eq!(prod[0].name, "example.com/a/lib");
        assert_eq!(prod[0].reference, "v1.2.0");
        assert_eq!(prod[0].revision, "c120");
    }

    #[test]
    fn lock_hint_reproduces_the_pinned_revision() {
        let fx = Fixture::new();
        fx.backend.publish("https://example.com/a/lib", lib_repo());
        let m = manifest(&manifest_text("proj", &[("example.com/a/lib", "^1.0.0")]));
        let first = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect("resolve")
            .to_lock("h");

        // A newer matching tag appears upstream; the pin still wins.
        fx.backend.publish(
            "https://example.com/a/lib",
            lib_repo()
                .commit("c150", &[("lib.go", "v1.5.0")])
                .tag("v1.5.0"),
        );
        let again = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .with_hint(Some(&first))
            .resolve(&m)
            .expect("resolve with hint")
            .to_lock("h");
        assert_eq!(again, first);

        let fresh = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect("resolve without hint");
        let node = fresh.get("example.com/a/lib").expect("lib node");
        assert_eq!(node.reference, "v1.5.0");
        assert_eq!(node.revision, "c150");
    }

    #[test]
    fn stale_hint_is_overridden_when_constraints_change() {
        let fx = Fixture::new();
        fx.backend.publish("https://example.com/a/lib", lib_repo());
        let v1 = manifest(&manifest_text("proj", &[("example.com/a/lib", "^1.0.0")]));
        let lock: LockFile = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&v1)
            .expect("resolve")
            .to_lock("h");

        let v2 = manifest(&manifest_text("proj", &[("example.com/a/lib", "^2.0.0")]));
        let graph = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .with_hint(Some(&lock))
            .resolve(&v2)
            .expect("resolve");
        let node = graph.get("example.com/a/lib").expect("lib");
        assert_eq!(node.reference, "v2.0.0");
        assert_eq!(node.revision, "c200");
    }

    #[test]
    fn compatible_requests_merge_into_one_node_with_union_of_subpackages() {
        let fx = Fixture::new();
        fx.backend.publish("https://example.com/a/lib", lib_repo());
        fx.backend.publish(
            "https://example.com/a/app",
            MemoryRepo::new().commit(
                "a1",
                &[(
                    "vendr.toml",
                    "package = \"example.com/a/app\"\n\n[[import]]\npackage = \"example.com/a/lib/codec\"\nversion = \">=1.1.0\"\n",
                )],
            ),
        );
        let mut m = manifest(&manifest_text(
            "proj",
            &[("example.com/a/lib/http", "^1.0.0"), ("example.com/a/app", "")],
        ));
        m.get_mut("example.com/a/lib/http")
            .expect("http import")
            .subpackages = vec!["util".into()];

        let graph = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect("resolve");
        assert_eq!(graph.len(), 2);
        let lib = graph.get("example.com/a/lib").expect("lib");
        let subs: Vec<&str> = lib.subpackages.iter().map(String::as_str).collect();
        assert_eq!(subs, vec!["codec", "http", "util"]);
        assert_eq!(lib.reference, "v1.2.0");
        assert_eq!(lib.requirements.len(), 2);
        let app = graph.get("example.com/a/app").expect("app");
        assert!(app.edges.contains("example.com/a/lib"));
    }

    #[test]
    fn disjoint_ranges_conflict_naming_both_requesters() {
        let fx = Fixture::new();
        fx.backend.publish("https://example.com/a/lib", lib_repo());
        fx.backend.publish(
            "https://example.com/a/app",
            MemoryRepo::new().commit(
                "a1",
                &[(
                    "vendr.toml",
                    "package = \"example.com/a/app\"\n\n[[import]]\npackage = \"example.com/a/lib\"\nversion = \"^2.0.0\"\n",
                )],
            ),
        );
        let m = manifest(&manifest_text(
            "proj",
            &[("example.com/a/lib", "^1.0.0"), ("example.com/a/app", "")],
        ));
        let err = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect_err("conflict");
        match kind_of(&err) {
            Some(PkgError::ConstraintConflict {
                package,
                first_requester,
                first_constraint,
                second_requester,
                second_constraint,
            }) => {
                assert_eq!(package, "example.com/a/lib");
                assert_eq!(first_requester, "proj");
                assert_eq!(first_constraint, "^1.0.0");
                assert_eq!(second_requester, "example.com/a/app");
                assert_eq!(second_constraint, "^2.0.0");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn cycles_terminate_with_one_entry_per_package() {
        let fx = Fixture::new();
        fx.backend.publish(
            "https://example.com/c/one",
            MemoryRepo::new().commit(
                "o1",
                &[(
                    "vendr.toml",
                    "package = \"example.com/c/one\"\n\n[[import]]\npackage = \"example.com/c/two\"\n",
                )],
            ),
        );
        fx.backend.publish(
            "https://example.com/c/two",
            MemoryRepo::new().commit(
                "t1",
                &[(
                    "vendr.toml",
                    "package = \"example.com/c/two\"\n\n[[import]]\npackage = \"example.com/c/one\"\n\n[[import]]\npackage = \"proj/internal\"\n",
                )],
            ),
        );
        let m = manifest(&manifest_text("proj", &[("example.com/c/one", "")]));
        let graph = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect("resolve");
        let names: Vec<&str> = graph.nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["example.com/c/one", "example.com/c/two"]);
        assert_eq!(fx.backend.clones.load(Ordering::SeqCst), 2);
        assert_eq!(graph.get("example.com/c/one").expect("one").reference, "main");
    }

    #[test]
    fn ignored_excluded_and_dev_imports_are_filtered() {
        let fx = Fixture::new();
        fx.backend.publish("https://example.com/a/lib", lib_repo());
        fx.backend.publish(
            "https://example.com/t/assert",
            MemoryRepo::new().commit("t1", &[("assert.go", "")]).tag("v1.0.0"),
        );
        let mut m = manifest(&manifest_text(
            "proj",
            &[
                ("example.com/a/lib", "v1.0.0"),
                ("example.com/skip/me", ""),
                ("proj/tools/gen", ""),
            ],
        ));
        m.ignore = vec!["example.com/skip".into()];
        m.exclude_dirs = vec!["tools".into()];
        let mut flagged = Dependency::new("example.com/also/skipped");
        flagged.ignore = true;
        m.imports.push(flagged);
        m.test_imports.push(Dependency::new("example.com/t/assert"));

        let graph = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect("resolve");
        let (prod, dev) = graph.entries();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].reference, "v1.0.0");
        assert_eq!(prod[0].revision, "c100");
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].name, "example.com/t/assert");

        let without_dev = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .include_dev(false)
            .resolve(&m)
            .expect("resolve");
        assert_eq!(without_dev.len(), 1);
    }

    #[test]
    fn unknown_range_is_reference_not_found_after_one_update() {
        let fx = Fixture::new();
        fx.backend.publish("https://example.com/a/lib", lib_repo());
        let m = manifest(&manifest_text("proj", &[("example.com/a/lib", "^9.0.0")]));
        let err = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect_err("no such tag");
        assert!(matches!(
            kind_of(&err),
            Some(PkgError::ReferenceNotFound { package, .. }) if package == "example.com/a/lib"
        ));
        assert_eq!(fx.backend.updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_manifest_entries_honor_both_ranges() {
        let fx = Fixture::new();
        fx.backend.publish(
            "https://example.com/a/lib",
            MemoryRepo::new()
                .commit("c100", &[("lib.go", "1.0")])
                .tag("v1.0.0")
                .commit("c110", &[("lib.go", "1.1")])
                .tag("v1.1.0")
                .commit("c120", &[("lib.go", "1.2")])
                .tag("v1.2.0"),
        );
        let m = manifest(&manifest_text(
            "proj",
            &[("example.com/a/lib", "^1.0.0"), ("example.com/a/lib", "<1.2.0")],
        ));
        let graph = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect("resolve");
        let (prod, _) = graph.entries();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].reference, "v1.1.0");
        assert_eq!(prod[0].revision, "c110");
    }

    #[test]
    fn ranges_without_a_common_tag_name_every_requester() {
        let fx = Fixture::new();
        fx.backend.publish("https://example.com/a/lib", lib_repo());
        fx.backend.publish(
            "https://example.com/a/app",
            MemoryRepo::new().commit(
                "a1",
                &[(
                    "vendr.toml",
                    "package = \"example.com/a/app\"\n\n[[import]]\npackage = \"example.com/a/lib\"\nversion = \">=1.1.0, <1.2.0\"\n",
                )],
            ),
        );
        let m = manifest(&manifest_text(
            "proj",
            &[("example.com/a/lib", "^1.0.0"), ("example.com/a/app", "")],
        ));
        let err = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect_err("no common tag");
        match kind_of(&err) {
            Some(PkgError::ReferenceNotFound { package, reference }) => {
                assert_eq!(package, "example.com/a/lib");
                assert!(reference.contains("^1.0.0 from proj"), "{}", reference);
                assert!(
                    reference.contains(">=1.1.0, <1.2.0 from example.com/a/app"),
                    "{}",
                    reference
                );
            }
            other => panic!("expected reference not found, got {:?}", other),
        }
    }

    #[test]
    fn unreachable_repository_is_reported_with_its_url() {
        let fx = Fixture::new();
        let m = manifest(&manifest_text("proj", &[("example.com/gone/away", "")]));
        let err = Resolver::new(&fx.vcs, &fx.cache, &fx.importers)
            .resolve(&m)
            .expect_err("missing repo");
        match kind_of(&err) {
            Some(PkgError::VcsUnreachable { package, url, .. }) => {
                assert_eq!(package, "example.com/gone/away");
                assert_eq!(url, "https://example.com/gone/away");
            }
            other => panic!("expected unreachable, got {:?}", other),
        }
    }
}
