use anyhow::{Context, bail};
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use super::VcsType;
use crate::pkg::error::PkgError;

/// Operations one VCS tool must provide over a working copy. Implementations
/// must be idempotent and leave everything outside `wc` untouched.
pub trait Backend: Send + Sync {
    fn kind(&self) -> VcsType;

    fn metadata_dir(&self) -> &'static str {
        self.kind().metadata_dir()
    }

    fn clone_repo(&self, url: &str, wc: &Path) -> anyhow::Result<()>;
    /// Fetch remote state without moving the checked-out reference.
    fn update(&self, wc: &Path) -> anyhow::Result<()>;
    fn checkout(&self, wc: &Path, reference: &str) -> anyhow::Result<()>;
    fn current_revision(&self, wc: &Path) -> anyhow::Result<String>;
    fn tags(&self, wc: &Path) -> anyhow::Result<Vec<String>>;
    fn branches(&self, wc: &Path) -> anyhow::Result<Vec<String>>;
    fn is_reference(&self, wc: &Path, reference: &str) -> bool;
    fn default_branch(&self, wc: &Path) -> anyhow::Result<String>;
}

pub fn command_backends() -> Vec<Arc<dyn Backend>> {
    vec![Arc::new(Git), Arc::new(Hg), Arc::new(Bzr), Arc::new(Svn)]
}

pub fn run_tool(kind: VcsType, args: &[&str], cwd: Option<&Path>) -> anyhow::Result<String> {
    let program = kind.as_str();
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(c) = cwd {
        cmd.current_dir(c);
    }
    // Never block on a credential prompt inside a worker.
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    log::trace!("{} {:?}", program, args);
    let out = match cmd.output() {
        Ok(out) => out,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(PkgError::UnsupportedVcs {
                package: cwd.map(|c| c.display().to_string()).unwrap_or_default(),
                vcs: program.to_string(),
                detail: format!("`{}` is not installed", program),
            }
            .into());
        }
        Err(e) => return Err(e).with_context(|| format!("failed to execute {}", program)),
    };
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        bail!("{} {:?} failed: {}", program, args, stderr.trim());
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn lines(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn path_arg(p: &Path) -> anyhow::Result<&str> {
    p.to_str()
        .with_context(|| format!("non UTF-8 path {}", p.display()))
}

pub struct Git;

impl Git {
    fn git(wc: &Path, args: &[&str]) -> anyhow::Result<String> {
        run_tool(VcsType::Git, args, Some(wc))
    }

    fn resolve(&self, wc: &Path, reference: &str) -> Option<String> {
        let candidates = [
            format!("refs/tags/{}^{{commit}}", reference),
            format!("refs/remotes/origin/{}^{{commit}}", reference),
            format!("{}^{{commit}}", reference),
        ];
        candidates.iter().find_map(|c| {
            Self::git(wc, &["rev-parse", "--verify", "--quiet", c])
                .ok()
                .filter(|s| !s.is_empty())
        })
    }
}

impl Backend for Git {
    fn kind(&self) -> VcsType {
        VcsType::Git
    }

    fn clone_repo(&self, url: &str, wc: &Path) -> anyhow::Result<()> {
        run_tool(VcsType::Git, &["clone", "--quiet", url, path_arg(wc)?], None)?;
        Ok(())
    }

    fn update(&self, wc: &Path) -> anyhow::Result<()> {
        Self::git(wc, &["fetch", "--quiet", "--tags", "--prune", "--force", "origin"])?;
        Ok(())
    }

    fn checkout(&self, wc: &Path, reference: &str) -> anyhow::Result<()> {
        let Some(commit) = self.resolve(wc, reference) else {
            bail!("unknown git reference `{}`", reference);
        };
        Self::git(wc, &["checkout", "--quiet", "--force", "--detach", &commit])?;
        Self::git(wc, &["clean", "-ffdq"])?;
        Ok(())
    }

    fn current_revision(&self, wc: &Path) -> anyhow::Result<String> {
        Self::git(wc, &["rev-parse", "HEAD"])
    }

    fn tags(&self, wc: &Path) -> anyhow::Result<Vec<String>> {
        Ok(lines(&Self::git(wc, &["tag", "--list"])?))
    }

    fn branches(&self, wc: &Path) -> anyhow::Result<Vec<String>> {
        let out = Self::git(
            wc,
            &[
                "for-each-ref",
                "--format=%(refname:strip=3)",
                "refs/remotes/origin",
            ],
        )?;
        Ok(lines(&out).into_iter().filter(|b| b != "HEAD").collect())
    }

    fn is_reference(&self, wc: &Path, reference: &str) -> bool {
        self.resolve(wc, reference).is_some()
    }

    fn default_branch(&self, wc: &Path) -> anyhow::Result<String> {
        if let Ok(head) = Self::git(
            wc,
            &["symbolic-ref", "--quiet", "--short", "refs/remotes/origin/HEAD"],
        ) && let Some(b) = head.strip_prefix("origin/")
        {
            return Ok(b.to_string());
        }
        let branches = self.branches(wc)?;
        for b in ["main", "master"] {
            if branches.iter().any(|x| x == b) {
                return Ok(b.to_string());
            }
        }
        branches
            .into_iter()
            .next()
            .context("repository has no branches")
    }
}

pub struct Hg;

impl Hg {
    fn hg(wc: &Path, args: &[&str]) -> anyhow::Result<String> {
        run_tool(VcsType::Hg, args, Some(wc))
    }
}

impl Backend for Hg {
    fn kind(&self) -> VcsType {
        VcsType::Hg
    }

    fn clone_repo(&self, url: &str, wc: &Path) -> anyhow::Result<()> {
        run_tool(VcsType::Hg, &["clone", "--quiet", "-U", url, path_arg(wc)?], None)?;
        Ok(())
    }

    fn update(&self, wc: &Path) -> anyhow::Result<()> {
        Self::hg(wc, &["pull", "--quiet"])?;
        Ok(())
    }

    fn checkout(&self, wc: &Path, reference: &str) -> anyhow::Result<()> {
        Self::hg(wc, &["update", "--quiet", "--clean", "-r", reference])?;
        Ok(())
    }

    fn current_revision(&self, wc: &Path) -> anyhow::Result<String> {
        Self::hg(wc, &["log", "-r", ".", "--template", "{node}"])
    }

    fn tags(&self, wc: &Path) -> anyhow::Result<Vec<String>> {
        let out = Self::hg(wc, &["tags", "--quiet"])?;
        Ok(lines(&out).into_iter().filter(|t| t != "tip").collect())
    }

    fn branches(&self, wc: &Path) -> anyhow::Result<Vec<String>> {
        Ok(lines(&Self::hg(wc, &["branches", "--quiet"])?))
    }

    fn is_reference(&self, wc: &Path, reference: &str) -> bool {
        Self::hg(wc, &["log", "-r", reference, "--template", "{node}"])
            .is_ok_and(|s| !s.is_empty())
    }

    fn default_branch(&self, _wc: &Path) -> anyhow::Result<String> {
        Ok("default".to_string())
    }
}

pub struct Bzr;

impl Bzr {
    fn bzr(wc: &Path, args: &[&str]) -> anyhow::Result<String> {
        run_tool(VcsType::Bzr, args, Some(wc))
    }

    /// Tags need the `tag:` prefix; revision numbers and ids do not.
    fn revision_spec(wc: &Path, reference: &str) -> Option<String> {
        [reference.to_string(), format!("tag:{}", reference)]
            .into_iter()
            .find(|spec| Self::bzr(wc, &["revno", "-r", spec.as_str()]).is_ok())
    }
}

impl Backend for Bzr {
    fn kind(&self) -> VcsType {
        VcsType::Bzr
    }

    fn clone_repo(&self, url: &str, wc: &Path) -> anyhow::Result<()> {
        run_tool(VcsType::Bzr, &["branch", "--quiet", url, path_arg(wc)?], None)?;
        Ok(())
    }

    fn update(&self, wc: &Path) -> anyhow::Result<()> {
        Self::bzr(wc, &["pull", "--quiet", "--overwrite"])?;
        Ok(())
    }

    fn checkout(&self, wc: &Path, reference: &str) -> anyhow::Result<()> {
        let spec = Self::revision_spec(wc, reference)
            .with_context(|| format!("unknown bzr revision `{}`", reference))?;
        Self::bzr(wc, &["update", "--quiet", "-r", &spec])?;
        Ok(())
    }

    fn current_revision(&self, wc: &Path) -> anyhow::Result<String> {
        Self::bzr(wc, &["version-info", "--custom", "--template={revision_id}"])
    }

    fn tags(&self, wc: &Path) -> anyhow::Result<Vec<String>> {
        let out = Self::bzr(wc, &["tags"])?;
        Ok(out
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .map(str::to_string)
            .collect())
    }

    fn branches(&self, _wc: &Path) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }

    fn is_reference(&self, wc: &Path, reference: &str) -> bool {
        Self::revision_spec(wc, reference).is_some()
    }

    fn default_branch(&self, _wc: &Path) -> anyhow::Result<String> {
        Ok("-1".to_string())
    }
}

pub struct Svn;

impl Svn {
    fn svn(wc: &Path, args: &[&str]) -> anyhow::Result<String> {
        run_tool(VcsType::Svn, args, Some(wc))
    }
}

impl Backend for Svn {
    fn kind(&self) -> VcsType {
        VcsType::Svn
    }

    fn clone_repo(&self, url: &str, wc: &Path) -> anyhow::Result<()> {
        run_tool(VcsType::Svn, &["checkout", "--quiet", url, path_arg(wc)?], None)?;
        Ok(())
    }

    fn update(&self, wc: &Path) -> anyhow::Result<()> {
        // svn cannot fetch without moving the working copy; probing HEAD
        // still proves the server is reachable.
        Self::svn(wc, &["info", "-r", "HEAD"])?;
        Ok(())
    }

    fn checkout(&self, wc: &Path, reference: &str) -> anyhow::Result<()> {
        Self::svn(wc, &["update", "--quiet", "-r", reference])?;
        Ok(())
    }

    fn current_revision(&self, wc: &Path) -> anyhow::Result<String> {
        Self::svn(wc, &["info", "--show-item", "revision"])
    }

    fn tags(&self, _wc: &Path) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }

    fn branches(&self, _wc: &Path) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }

    fn is_reference(&self, wc: &Path, reference: &str) -> bool {
        Self::svn(wc, &["info", "-r", reference]).is_ok()
    }

    fn default_branch(&self, _wc: &Path) -> anyhow::Result<String> {
        Ok("HEAD".to_string())
    }
}
