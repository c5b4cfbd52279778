use anyhow::Context;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// VCS bookkeeping directories never copied into the vendor tree.
const VCS_DIRS: [&str; 4] = [".git", ".hg", ".bzr", ".svn"];

/// Copies `src` into `dst` like `cp -a src/. dst/`, skipping VCS metadata.
/// Symlinks are recreated, not followed. Walks with an explicit worklist and
/// a visited set, so deep or self-referencing trees cannot blow the stack.
pub fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    let mut work: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];
    let mut seen: HashSet<PathBuf> = HashSet::new();

    while let Some((from, to)) = work.pop() {
        let canon = from
            .canonicalize()
            .with_context(|| format!("resolve {}", from.display()))?;
        if !seen.insert(canon) {
            continue;
        }
        let meta = fs::metadata(&from).with_context(|| format!("stat {}", from.display()))?;
        fs::create_dir_all(&to).with_context(|| format!("create {}", to.display()))?;
        fs::set_permissions(&to, meta.permissions())
            .with_context(|| format!("chmod {}", to.display()))?;

        for ent in fs::read_dir(&from).with_context(|| format!("read_dir {}", from.display()))? {
            let ent = ent?;
            let name = ent.file_name();
            if name.to_str().is_some_and(|n| VCS_DIRS.contains(&n)) {
                continue;
            }
            let sp = ent.path();
            let dp = to.join(&name);
            let ft = ent.file_type()?;
            if ft.is_symlink() {
                copy_symlink(&sp, &dp)?;
            } else if ft.is_dir() {
                work.push((sp, dp));
            } else {
                fs::copy(&sp, &dp)
                    .with_context(|| format!("copy {} -> {}", sp.display(), dp.display()))?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> anyhow::Result<()> {
    let target = fs::read_link(src).with_context(|| format!("readlink {}", src.display()))?;
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst).with_context(|| format!("remove {}", dst.display()))?;
    }
    std::os::unix::fs::symlink(&target, dst)
        .with_context(|| format!("symlink {} -> {}", dst.display(), target.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> anyhow::Result<()> {
    // No portable symlink creation; copy what the link points at.
    if src.is_dir() {
        copy_tree(src, dst)
    } else {
        fs::copy(src, dst)
            .map(|_| ())
            .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))
    }
}

/// Replaces `dst` with a fresh copy of `src`.
pub fn replace_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    remove_tree(dst)?;
    copy_tree(src, dst)
}

/// Removes a file, link or directory; missing paths are fine.
pub fn remove_tree(p: &Path) -> anyhow::Result<()> {
    match p.symlink_metadata() {
        Ok(m) if m.is_dir() => {
            fs::remove_dir_all(p).with_context(|| format!("remove {}", p.display()))
        }
        Ok(_) => fs::remove_file(p).with_context(|| format!("remove {}", p.display())),
        Err(_) => Ok(()),
    }
}

/// Removes now-empty parents of `p` up to (not including) `stop`.
pub fn prune_empty_parents(p: &Path, stop: &Path) {
    let mut cur = p.parent();
    while let Some(dir) = cur {
        if dir == stop || !dir.starts_with(stop) || !is_dir_empty(dir).unwrap_or(false) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        cur = dir.parent();
    }
}

pub fn is_dir_empty(dir: &Path) -> anyhow::Result<bool> {
    let mut it = fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))?;
    Ok(it.next().is_none())
}

/// Follows a chain of symlinks on `p` (at most 255 hops). Dangling or
/// unreadable links stop the walk and return the last good path.
pub fn resolve_links(p: &Path) -> PathBuf {
    let mut cur = p.to_path_buf();
    for _ in 0..255 {
        let Ok(meta) = cur.symlink_metadata() else {
            return cur;
        };
        if !meta.file_type().is_symlink() {
            return cur;
        }
        let Ok(target) = fs::read_link(&cur) else {
            return cur;
        };
        cur = if target.is_absolute() {
            target
        } else {
            cur.parent().map(|d| d.join(&target)).unwrap_or(target)
        };
    }
    cur
}

/// Walks up from `start` to the first directory containing `file_name`.
pub fn find_upwards(start: &Path, file_name: &str) -> Option<PathBuf> {
    let mut p = start.to_path_buf();
    loop {
        if p.join(file_name).is_file() {
            return Some(p);
        }
        if !p.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{copy_tree, find_upwards, is_dir_empty, prune_empty_parents, replace_tree, resolve_links};
    use std::fs;

    #[test]
    fn copy_tree_skips_vcs_metadata_and_keeps_nesting() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join(".git/objects")).expect("mkdir .git");
        fs::create_dir_all(src.join("a/b")).expect("mkdir a/b");
        fs::write(src.join(".git/HEAD"), "ref").expect("write HEAD");
        fs::write(src.join("top.txt"), "top").expect("write top");
        fs::write(src.join("a/b/deep.txt"), "deep").expect("write deep");

        let dst = tmp.path().join("out");
        copy_tree(&src, &dst).expect("copy");
        assert_eq!(fs::read_to_string(dst.join("top.txt")).expect("top"), "top");
        assert_eq!(
            fs::read_to_string(dst.join("a/b/deep.txt")).expect("deep"),
            "deep"
        );
        assert!(!dst.join(".git").exists());
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_recreates_symlinks_and_survives_loops() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("d")).expect("mkdir");
        fs::write(src.join("d/f.txt"), "x").expect("write");
        std::os::unix::fs::symlink("d/f.txt", src.join("link")).expect("symlink file");
        std::os::unix::fs::symlink("..", src.join("d/up")).expect("symlink loop");

        let dst = tmp.path().join("out");
        copy_tree(&src, &dst).expect("copy");
        let link = dst.join("link");
        assert!(link.symlink_metadata().expect("meta").file_type().is_symlink());
        assert_eq!(fs::read_to_string(&link).expect("follow"), "x");
        assert!(
            dst.join("d/up")
                .symlink_metadata()
                .expect("meta")
                .file_type()
                .is_symlink()
        );
    }

    #[test]
    fn replace_tree_drops_stale_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).expect("mkdir src");
        fs::create_dir_all(&dst).expect("mkdir dst");
        fs::write(src.join("new.txt"), "new").expect("write new");
        fs::write(dst.join("stale.txt"), "old").expect("write stale");
        replace_tree(&src, &dst).expect("replace");
        assert!(dst.join("new.txt").exists());
        assert!(!dst.join("stale.txt").exists());
    }

    #[test]
    fn prune_empty_parents_stops_at_boundary() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let vendor = tmp.path().join("vendor");
        let leaf = vendor.join("example.com/a/lib");
        fs::create_dir_all(&leaf).expect("mkdir");
        fs::create_dir_all(vendor.join("example.com/b")).expect("mkdir sibling");
        fs::remove_dir(&leaf).expect("rm leaf");
        prune_empty_parents(&leaf, &vendor);
        assert!(!vendor.join("example.com/a").exists());
        assert!(vendor.join("example.com/b").exists());
        assert!(vendor.is_dir());
        assert!(!is_dir_empty(&vendor).expect("read"));
    }

    #[test]
    fn find_upwards_and_resolve_links() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("proj");
        let deep = root.join("x/y");
        fs::create_dir_all(&deep).expect("mkdir");
        fs::write(root.join("vendr.toml"), "package = \"p\"\n").expect("write");
        assert_eq!(find_upwards(&deep, "vendr.toml").as_deref(), Some(root.as_path()));
        assert_eq!(resolve_links(&deep), deep);

        #[cfg(unix)]
        {
            let real = tmp.path().join("real-vendor");
            fs::create_dir_all(&real).expect("mkdir real");
            let link = root.join("vendor");
            std::os::unix::fs::symlink(&real, &link).expect("symlink");
            assert_eq!(resolve_links(&link), real);
        }
    }
}
