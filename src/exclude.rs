//! Exclusion rules for archive packaging.
//!
//! Rules use a small glob syntax evaluated against `/`-separated paths
//! relative to the target's source root. Matching is case-sensitive.
//!
//! | rule          | meaning                                              |
//! |---------------|------------------------------------------------------|
//! | `venv/`       | any directory segment named `venv`                   |
//! | `client/src/` | the directory `client/src` and everything below it   |
//! | `*.pyc`       | final path segment matches the glob                  |
//! | `app.log`     | final path segment equals the name                   |
//! | `client/src`  | anchored: the whole relative path matches (`**` ok) |

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How a rule is matched against a relative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Trailing `/`: matches any directory segment of the path.
    Directory,
    /// Contains `/`: matched against the full relative path.
    Anchored,
    /// Matched against the final path segment only.
    Name,
}

/// A single exclusion rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRule {
    pattern: String,
    kind: MatchKind,
}

impl ExclusionRule {
    /// Parse a rule. Returns `None` for blank lines and `#` comments.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            return None;
        }

        let kind = if let Some(rest) = s.strip_suffix('/') {
            s = rest;
            MatchKind::Directory
        } else if let Some(rest) = s.strip_prefix('/') {
            s = rest;
            MatchKind::Anchored
        } else if s.contains('/') {
            MatchKind::Anchored
        } else {
            MatchKind::Name
        };

        let s = s.trim_start_matches('/');
        if s.is_empty() {
            return None;
        }

        Some(Self {
            pattern: s.to_string(),
            kind,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    /// Test this rule against `relative_path`.
    /// `is_dir` tells whether the final segment is itself a directory.
    #[must_use]
    pub fn matches(&self, relative_path: &str, is_dir: bool) -> bool {
        let path = relative_path.trim_matches('/');
        match self.kind {
            MatchKind::Directory => {
                let mut segments: Vec<&str> = path.split('/').collect();
                if !is_dir {
                    segments.pop();
                }
                if self.pattern.contains('/') {
                    // Nested directory rule: match any directory prefix.
                    (1..=segments.len())
                        .any(|n| glob_match(&self.pattern, &segments[..n].join("/")))
                } else {
                    segments.iter().any(|seg| glob_match(&self.pattern, seg))
                }
            }
            MatchKind::Anchored => glob_match(&self.pattern, path),
            MatchKind::Name => {
                let name = path.rsplit('/').next().unwrap_or(path);
                glob_match(&self.pattern, name)
            }
        }
    }
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MatchKind::Directory => write!(f, "{}/", self.pattern),
            MatchKind::Anchored | MatchKind::Name => f.write_str(&self.pattern),
        }
    }
}

/// Ordered set of exclusion rules for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    rules: Vec<ExclusionRule>,
}

impl ExclusionSet {
    /// Build a set from raw rule strings, skipping blanks and comments.
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .filter_map(|p| ExclusionRule::parse(p.as_ref()))
            .collect();
        Self { rules }
    }

    /// Append rules not already present.
    pub fn extend(&mut self, other: &ExclusionSet) {
        for rule in &other.rules {
            if !self.rules.contains(rule) {
                self.rules.push(rule.clone());
            }
        }
    }

    #[must_use]
    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `relative_path` is excluded by any rule.
    #[must_use]
    pub fn is_excluded(&self, relative_path: &str, is_dir: bool) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.matches(relative_path, is_dir))
    }
}

impl Serialize for ExclusionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rules.iter().map(ToString::to_string))
    }
}

impl<'de> Deserialize<'de> for ExclusionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::from_patterns(raw))
    }
}

/// Match a glob pattern against text.
///
/// - `*` matches any sequence of characters except `/`
/// - `**` matches any sequence of characters including `/`
/// - `?` matches any single character except `/`
fn glob_match(pattern: &str, text: &str) -> bool {
    glob_match_bytes(pattern.as_bytes(), text.as_bytes())
}

fn glob_match_bytes(p: &[u8], t: &[u8]) -> bool {
    match (p.first(), t.first()) {
        (None, None) => true,
        (Some(b'*'), _) if p.starts_with(b"**") => {
            let rest = p[2..].strip_prefix(b"/").unwrap_or(&p[2..]);
            glob_match_bytes(rest, t) || (!t.is_empty() && glob_match_bytes(p, &t[1..]))
        }
        (Some(b'*'), _) => {
            glob_match_bytes(&p[1..], t)
                || (!t.is_empty() && t[0] != b'/' && glob_match_bytes(p, &t[1..]))
        }
        (Some(b'?'), Some(&c)) if c != b'/' => glob_match_bytes(&p[1..], &t[1..]),
        (Some(&pc), Some(&tc)) if pc == tc => glob_match_bytes(&p[1..], &t[1..]),
        _ => false,
    }
}
