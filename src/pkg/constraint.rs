// Purpose: Classify version constraints and decide which reference satisfies them.
// Inputs/Outputs: Raw `version` strings in, `Constraint` values and selected labels out.
// Invariants: Classification is purely textual; repository state is only consulted in `select`.
// Gotchas: Short hex strings parse as semver majors, so sha-looking input is checked first.

use semver::{BuildMetadata, Op, Version, VersionReq};
use std::fmt;

/// How a dependency's `version` field is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// No version given: follow the default branch.
    Any,
    /// A semantic-version range (an exact version is a one-element range).
    Range { raw: String, req: VersionReq },
    /// Branch, tag or commit, used verbatim.
    Literal(String),
}

impl Constraint {
    pub fn parse(raw: Option<&str>) -> Self {
        let t = raw.map(str::trim).unwrap_or("");
        if t.is_empty() {
            return Self::Any;
        }
        if looks_like_commit(t) {
            return Self::Literal(t.to_string());
        }
        match parse_version_req_loose(t) {
            Some(req) => Self::Range {
                raw: t.to_string(),
                req,
            },
            None => Self::Literal(t.to_string()),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Any => "",
            Self::Range { raw, .. } => raw,
            Self::Literal(s) => s,
        }
    }

    /// Whether an already chosen reference label can serve this constraint.
    pub fn accepts(&self, reference: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Literal(s) => s == reference,
            Self::Range { req, .. } => {
                parse_version_loose(reference).is_some_and(|v| req.matches(&v))
            }
        }
    }

    /// Static compatibility check between two constraints, without looking
    /// at any repository. Ranges are compatible when their intervals overlap.
    pub fn compatible_with(&self, other: &Constraint) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Literal(l), r @ Self::Range { .. }) | (r @ Self::Range { .. }, Self::Literal(l)) => {
                // A literal that is not a version (branch, commit) cannot be
                // proven to sit inside a range.
                r.accepts(l)
            }
            (Self::Range { req: a, .. }, Self::Range { req: b, .. }) => ranges_overlap(a, b),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            other => write!(f, "{}", other.raw()),
        }
    }
}

pub fn looks_like_commit(s: &str) -> bool {
    let n = s.len();
    if !(7..=40).contains(&n) || !s.bytes().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    // `1234567` is more likely a version than a commit; require a hex letter
    // or a full-length id before treating digits as a commit.
    n >= 12 || s.bytes().any(|c| c.is_ascii_alphabetic())
}

pub fn parse_version_loose(raw: &str) -> Option<Version> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    let t = t.strip_prefix('v').unwrap_or(t);
    Version::parse(t).ok()
}

fn is_semver_boundary(ch: char) -> bool {
    ch.is_ascii_whitespace() || matches!(ch, ',' | '<' | '>' | '=' | '^' | '~')
}

fn normalize_req_for_semver(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, &ch) in chars.iter().enumerate() {
        if ch == 'v'
            && i + 1 < chars.len()
            && chars[i + 1].is_ascii_digit()
            && (i == 0 || is_semver_boundary(chars[i - 1]))
        {
            continue;
        }
        out.push(ch);
    }
    out
}

pub fn parse_version_req_loose(raw: &str) -> Option<VersionReq> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(v) = parse_version_loose(t) {
        return VersionReq::parse(&format!("={}", v)).ok();
    }
    // Bare words like `master` or `release` are branch names, not `*`.
    if !t.bytes().any(|c| c.is_ascii_digit()) && t != "*" {
        return None;
    }
    VersionReq::parse(&normalize_req_for_semver(t)).ok()
}

fn req_lower_bound(req: &VersionReq) -> Version {
    let mut best = Version::new(0, 0, 0);
    for c in &req.comparators {
        let mut v = Version {
            major: c.major,
            minor: c.minor.unwrap_or(0),
            patch: c.patch.unwrap_or(0),
            pre: c.pre.clone(),
            build: BuildMetadata::EMPTY,
        };
        match c.op {
            Op::Exact | Op::GreaterEq | Op::Caret | Op::Tilde | Op::Wildcard => {}
            Op::Greater => {
                if c.patch.is_some() {
                    v.patch = v.patch.saturating_add(1);
                } else if c.minor.is_some() {
                    v.minor = v.minor.saturating_add(1);
                    v.patch = 0;
                } else {
                    v.major = v.major.saturating_add(1);
                    v.minor = 0;
                    v.patch = 0;
                }
                v.pre = Default::default();
            }
            Op::Less | Op::LessEq => continue,
            _ => {}
        }
        if v > best {
            best = v;
        }
    }
    best
}

/// Two interval-shaped requirements intersect iff the larger of their lower
/// bounds satisfies both. A prerelease bound is also tried as its release,
/// since ranges without a matching prerelease comparator reject it.
pub fn ranges_overlap(a: &VersionReq, b: &VersionReq) -> bool {
    let lo = req_lower_bound(a).max(req_lower_bound(b));
    if a.matches(&lo) && b.matches(&lo) {
        return true;
    }
    if lo.pre.is_empty() {
        return false;
    }
    let release = Version::new(lo.major, lo.minor, lo.patch);
    a.matches(&release) && b.matches(&release)
}

/// Both requirements as one comma-joined requirement text.
pub fn intersect_ranges(a: &VersionReq, b: &VersionReq) -> String {
    let mut parts: Vec<String> = Vec::new();
    for c in a.comparators.iter().chain(&b.comparators) {
        let s = c.to_string();
        if !parts.contains(&s) {
            parts.push(s);
        }
    }
    if parts.is_empty() {
        "*".to_string()
    } else {
        parts.join(", ")
    }
}

/// Picks the highest label (tag) whose version satisfies every range.
pub fn highest_matching<'a, I>(ranges: &[&VersionReq], labels: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut best: Option<(Version, &String)> = None;
    for label in labels {
        let Some(ver) = parse_version_loose(label) else {
            continue;
        };
        if !ranges.iter().all(|r| r.matches(&ver)) {
            continue;
        }
        match &best {
            Some((bver, _)) if ver <= *bver => {}
            _ => best = Some((ver, label)),
        }
    }
    best.map(|(_, s)| s.clone())
}
