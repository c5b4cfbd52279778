use regex::Regex;

use super::VcsType;

/// What a detector is asked about.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub import_path: &'a str,
    pub repo: Option<&'a str>,
    pub hint: Option<VcsType>,
}

/// Partial answer; unset fields are left for later detectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    pub kind: Option<VcsType>,
    pub root: Option<String>,
    pub url: Option<String>,
}

impl Detection {
    pub fn fill_from(&mut self, other: Detection) {
        if self.kind.is_none() {
            self.kind = other.kind;
        }
        if self.root.is_none() {
            self.root = other.root;
        }
        if self.url.is_none() {
            self.url = other.url;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.kind.is_some() && self.root.is_some() && self.url.is_some()
    }
}

/// One VCS detection heuristic. New back-ends plug in by adding a detector
/// to the list handed to `Vcs::with_detectors`.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, req: &Request<'_>) -> Option<Detection>;
}

pub fn default_detectors() -> anyhow::Result<Vec<Box<dyn Detector>>> {
    Ok(vec![
        Box::new(ExplicitHint),
        Box::new(UrlSuffix::new()?),
        Box::new(Hosting::new()?),
    ])
}

/// The `vcs` field of a dependency always wins.
pub struct ExplicitHint;

impl Detector for ExplicitHint {
    fn name(&self) -> &'static str {
        "hint"
    }

    fn detect(&self, req: &Request<'_>) -> Option<Detection> {
        req.hint.map(|k| Detection {
            kind: Some(k),
            ..Default::default()
        })
    }
}

/// `.git`/`.hg`/`.bzr`/`.svn` suffixes and VCS-specific URL schemes, first on
/// the explicit repository URL, then on the import path itself.
pub struct UrlSuffix {
    path_rule: Regex,
}

impl UrlSuffix {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            path_rule: Regex::new(
                r"^(?P<root>[A-Za-z0-9.\-]+\.[A-Za-z0-9.\-]+(?::[0-9]+)?(?:/~?[A-Za-z0-9_.\-]+)+?\.(?P<vcs>git|hg|bzr|svn))(?:/.*)?$",
            )?,
        })
    }

    fn kind_from_url(url: &str) -> Option<VcsType> {
        let u = url.trim().trim_end_matches('/');
        let schemes = [
            ("git@", VcsType::Git),
            ("git://", VcsType::Git),
            ("git+ssh://", VcsType::Git),
            ("svn://", VcsType::Svn),
            ("svn+ssh://", VcsType::Svn),
            ("bzr://", VcsType::Bzr),
            ("bzr+ssh://", VcsType::Bzr),
        ];
        for (prefix, kind) in schemes {
            if u.starts_with(prefix) {
                return Some(kind);
            }
        }
        VcsType::ALL
            .into_iter()
            .find(|k| u.ends_with(&format!(".{}", k.as_str())))
    }
}

impl Detector for UrlSuffix {
    fn name(&self) -> &'static str {
        "suffix"
    }

    fn detect(&self, req: &Request<'_>) -> Option<Detection> {
        let mut out = Detection::default();
        if let Some(repo) = req.repo {
            out.kind = Self::kind_from_url(repo);
        }
        if let Some(caps) = self.path_rule.captures(req.import_path) {
            let root = caps["root"].to_string();
            if out.kind.is_none() {
                out.kind = caps["vcs"].parse().ok();
            }
            out.url = Some(format!("https://{}", root));
            out.root = Some(root);
        }
        if out == Detection::default() {
            None
        } else {
            Some(out)
        }
    }
}

struct HostRule {
    pattern: Regex,
    root: &'static str,
    url: &'static str,
    kind: Option<VcsType>,
}

/// Well-known hosting providers: import path layout decides the repository
/// root and, where the host only serves one VCS, the type.
pub struct Hosting {
    rules: Vec<HostRule>,
}

impl Hosting {
    pub fn new() -> anyhow::Result<Self> {
        let seg = r"[A-Za-z0-9_.\-]+";
        let table: Vec<(String, &'static str, &'static str, Option<VcsType>)> = vec![
            (
                format!(r"^(?P<root>github\.com/{seg}/{seg})(?:/.*)?$"),
                "$root",
                "https://$root",
                Some(VcsType::Git),
            ),
            (
                format!(r"^(?P<root>gitlab\.com/{seg}/{seg})(?:/.*)?$"),
                "$root",
                "https://$root",
                Some(VcsType::Git),
            ),
            (
                format!(r"^(?P<root>bitbucket\.org/{seg}/{seg})(?:/.*)?$"),
                "$root",
                "https://$root",
                None,
            ),
            (
                format!(
                    r"^(?P<root>launchpad\.net/(?:~{seg}/(?:\+junk|{seg})/{seg}|{seg}(?:/{seg})?))(?:/.*)?$"
                ),
                "$root",
                "https://$root",
                Some(VcsType::Bzr),
            ),
            (
                r"^(?P<root>git\.apache\.org/[a-z0-9_.\-]+\.git)(?:/.*)?$".to_string(),
                "$root",
                "https://$root",
                Some(VcsType::Git),
            ),
            (
                format!(r"^golang\.org/x/(?P<name>{seg})(?:/.*)?$"),
                "golang.org/x/$name",
                "https://go.googlesource.com/$name",
                Some(VcsType::Git),
            ),
            (
                format!(r"^(?P<root>go\.googlesource\.com/{seg})(?:/.*)?$"),
                "$root",
                "https://$root",
                Some(VcsType::Git),
            ),
            (
                format!(r"^(?P<root>hub\.jazz\.net/git/[a-z0-9]+/{seg})(?:/.*)?$"),
                "$root",
                "https://$root",
                Some(VcsType::Git),
            ),
        ];
        let mut rules = Vec::with_capacity(table.len());
        for (pattern, root, url, kind) in table {
            rules.push(HostRule {
                pattern: Regex::new(&pattern)?,
                root,
                url,
                kind,
            });
        }
        Ok(Self { rules })
    }
}

impl Detector for Hosting {
    fn name(&self) -> &'static str {
        "hosting"
    }

    fn detect(&self, req: &Request<'_>) -> Option<Detection> {
        for rule in &self.rules {
            let Some(caps) = rule.pattern.captures(req.import_path) else {
                continue;
            };
            let mut root = String::new();
            caps.expand(rule.root, &mut root);
            let mut url = String::new();
            caps.expand(rule.url, &mut url);
            return Some(Detection {
                kind: rule.kind,
                root: Some(root),
                url: Some(url),
            });
        }
        None
    }
}

/// `host/owner/repo` when the first segment looks like a host, otherwise the
/// whole path.
pub fn fallback_root(import_path: &str) -> String {
    let seg: Vec<&str> = import_path.split('/').filter(|x| !x.is_empty()).collect();
    if seg.len() >= 3 && seg[0].contains('.') {
        return format!("{}/{}/{}", seg[0], seg[1], seg[2]);
    }
    seg.join("/")
}
