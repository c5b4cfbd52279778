use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::pkg::error::PkgError;
use crate::pkg::manifest::{Dependency, Manifest};

/// Reads some tool's dependency metadata from a package root.
pub trait Importer: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, root: &Path) -> bool;
    fn parse(&self, root: &Path) -> anyhow::Result<Vec<Dependency>>;
}

/// Our own manifest format.
pub struct Native {
    file_name: String,
}

impl Native {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

impl Importer for Native {
    fn name(&self) -> &'static str {
        "vendr"
    }

    fn detect(&self, root: &Path) -> bool {
        root.join(&self.file_name).is_file()
    }

    fn parse(&self, root: &Path) -> anyhow::Result<Vec<Dependency>> {
        Ok(Manifest::load(&root.join(&self.file_name))?.imports)
    }
}

/// `Godeps/Godeps.json` as written by godep.
pub struct Godep;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GodepFile {
    #[serde(default)]
    deps: Vec<GodepDep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GodepDep {
    import_path: String,
    #[serde(default)]
    rev: String,
}

impl Importer for Godep {
    fn name(&self) -> &'static str {
        "godep"
    }

    fn detect(&self, root: &Path) -> bool {
        root.join("Godeps").join("Godeps.json").is_file()
    }

    fn parse(&self, root: &Path) -> anyhow::Result<Vec<Dependency>> {
        let path = root.join("Godeps").join("Godeps.json");
        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let file: GodepFile =
            serde_json::from_str(&text).map_err(|e| PkgError::ManifestMalformed {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        let mut manifest = Manifest::default();
        for d in file.deps {
            let mut dep = Dependency::new(d.import_path);
            if !d.rev.is_empty() {
                dep.version = Some(d.rev);
            }
            // Godep lists every package of a repo separately with the same
            // revision; identical entries merge cleanly.
            manifest.add_import(dep)?;
        }
        Ok(manifest.imports)
    }
}

/// GPM's `Godeps` file: one `path [version]` per line, `#` comments.
pub struct Gpm;

impl Importer for Gpm {
    fn name(&self) -> &'static str {
        "gpm"
    }

    fn detect(&self, root: &Path) -> bool {
        root.join("Godeps").is_file()
    }

    fn parse(&self, root: &Path) -> anyhow::Result<Vec<Dependency>> {
        let path = root.join("Godeps");
        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let mut manifest = Manifest::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let mut parts = line.split_whitespace();
            let Some(pkg) = parts.next() else {
                continue;
            };
            let mut dep = Dependency::new(pkg);
            dep.version = parts.next().map(str::to_string);
            manifest.add_import(dep)?;
        }
        Ok(manifest.imports)
    }
}

/// Ordered list of importers; the first one that detects metadata wins.
pub struct Importers {
    chain: Vec<Box<dyn Importer>>,
}

impl Importers {
    pub fn new(chain: Vec<Box<dyn Importer>>) -> Self {
        Self { chain }
    }

    pub fn standard(manifest_name: &str) -> Self {
        Self::new(vec![
            Box::new(Native::new(manifest_name)),
            Box::new(Godep),
            Box::new(Gpm),
        ])
    }

    /// `Ok(None)` when no importer recognizes the directory.
    pub fn import(&self, root: &Path) -> anyhow::Result<Option<(&'static str, Vec<Dependency>)>> {
        for imp in &self.chain {
            if imp.detect(root) {
                let deps = imp
                    .parse(root)
                    .with_context(|| format!("{} metadata in {}", imp.name(), root.display()))?;
                return Ok(Some((imp.name(), deps)));
            }
        }
        Ok(None)
    }

    /// Like `import`, but only foreign formats (skips the native manifest).
    pub fn import_foreign(
        &self,
        root: &Path,
    ) -> anyhow::Result<Option<(&'static str, Vec<Dependency>)>> {
        for imp in self.chain.iter().filter(|i| i.name() != "vendr") {
            if imp.detect(root) {
                let deps = imp
                    .parse(root)
                    .with_context(|| format!("{} metadata in {}", imp.name(), root.display()))?;
                return Ok(Some((imp.name(), deps)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::Importers;
    use crate::pkg::error::{PkgError, kind_of};
    use std::fs;

    #[test]
    fn native_manifest_has_priority_over_foreign_formats() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("vendr.toml"),
            "package = \"p\"\n[[import]]\npackage = \"example.com/a/native\"\n",
        )
        .expect("write manifest");
        fs::write(tmp.path().join("Godeps"), "example.com/a/gpm v1.0.0\n").expect("write gpm");

        let (name, deps) = Importers::standard("vendr.toml")
            .import(tmp.path())
            .expect("import")
            .expect("found");
        assert_eq!(name, "vendr");
        assert_eq!(deps[0].package, "example.com/a/native");

        let (name, deps) = Importers::standard("vendr.toml")
            .import_foreign(tmp.path())
            .expect("import")
            .expect("found");
        assert_eq!(name, "gpm");
        assert_eq!(deps[0].version.as_deref(), Some("v1.0.0"));
    }

    #[test]
    fn godep_entries_for_one_repo_collapse() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("Godeps")).expect("mkdir");
        fs::write(
            tmp.path().join("Godeps/Godeps.json"),
            r#"{"ImportPath":"p","Deps":[
                {"ImportPath":"example.com/a/lib","Rev":"0123456789abcdef"},
                {"ImportPath":"example.com/a/lib","Rev":"0123456789abcdef"},
                {"ImportPath":"example.com/b/other"}
            ]}"#,
        )
        .expect("write godeps");
        let (name, deps) = Importers::standard("vendr.toml")
            .import(tmp.path())
            .expect("import")
            .expect("found");
        assert_eq!(name, "godep");
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1].version, None);
    }

    #[test]
    fn gpm_skips_comments_and_blank_lines() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("Godeps"),
            "# pinned\n\nexample.com/a/x 1.2.0 # trailing\nexample.com/a/y\n",
        )
        .expect("write");
        let (_, deps) = Importers::standard("vendr.toml")
            .import(tmp.path())
            .expect("import")
            .expect("found");
        let names: Vec<&str> = deps.iter().map(|d| d.package.as_str()).collect();
        assert_eq!(names, vec!["example.com/a/x", "example.com/a/y"]);
        assert_eq!(deps[0].version.as_deref(), Some("1.2.0"));
    }

    #[test]
    fn nothing_detected_is_not_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(Importers::standard("vendr.toml")
            .import(tmp.path())
            .expect("import")
            .is_none());
    }

    #[test]
    fn broken_godep_json_is_malformed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("Godeps")).expect("mkdir");
        fs::write(tmp.path().join("Godeps/Godeps.json"), "{").expect("write");
        let err = Importers::standard("vendr.toml")
            .import(tmp.path())
            .expect_err("broken");
        assert!(matches!(
            kind_of(&err),
            Some(PkgError::ManifestMalformed { .. })
        ));
    }
}
