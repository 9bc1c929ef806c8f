//! The reference set of one upstream and semantic-version matching over it.

use std::collections::BTreeMap;

use semver::{Version, VersionReq};

use super::reference::{RefKind, Reference, ResolvedVersion};
use crate::protocol::types::ProtocolError;

/// Branch names tried, in order, when the upstream does not say which branch `HEAD` is.
const DEFAULT_BRANCHES: [&str; 2] = ["master", "main"];

/// Highest major version [`Versions::grouped_by_major`] probes.
const MAX_GROUPED_MAJOR: u64 = 99;

/// Branches and tags of one upstream, keyed by short name.
///
/// When several refs share a short name the peeled annotated tag wins over the tag object,
/// and tags win over branches.
#[derive(Debug, Clone, Default)]
pub struct Versions {
    refs: BTreeMap<String, Reference>,
    /// The branch `HEAD` points at, kept apart so a tag with the same short name cannot
    /// shadow it.
    head: Option<Reference>,
}

pub type ReferenceSet = Versions;

fn precedence(kind: RefKind) -> u8 {
    match kind {
        RefKind::AnnotatedTag => 3,
        RefKind::Tag => 2,
        RefKind::Branch => 1,
        RefKind::Symbolic => 0,
    }
}

impl Versions {
    /// Build the set from advertised references. `head` is the full name `HEAD` points at,
    /// when the upstream declared it.
    pub fn new<I>(refs: I, head: Option<&str>) -> Self
    where
        I: IntoIterator<Item = Reference>,
    {
        let mut versions = Versions::default();
        for reference in refs {
            if reference.is_branch() && head == Some(reference.name()) {
                versions.head = Some(reference.clone());
            }
            versions.insert(reference);
        }
        versions
    }

    /// Add a reference. Symbolic refs are not candidates and are ignored.
    pub fn insert(&mut self, reference: Reference) {
        if reference.kind() == RefKind::Symbolic {
            return;
        }
        let key = reference.short_name().to_string();
        match self.refs.get(&key) {
            Some(existing) if precedence(existing.kind()) > precedence(reference.kind()) => {}
            _ => {
                self.refs.insert(key, reference);
            }
        }
    }

    pub fn get(&self, short_name: &str) -> Option<&Reference> {
        self.refs.get(short_name)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.refs.values()
    }

    /// The repository's default branch: `HEAD`'s target, else `master`, else `main`.
    pub fn default_branch(&self) -> Option<&Reference> {
        self.head.as_ref().or_else(|| {
            DEFAULT_BRANCHES
                .iter()
                .filter_map(|name| self.refs.get(*name))
                .find(|r| r.is_branch())
        })
    }

    /// Every reference satisfying `constraint`, highest version first.
    ///
    /// A constraint equal to a short name matches that reference alone, whatever it looks
    /// like. Otherwise the constraint is read as a version prefix (`1`, `v1.2`, `1.2.3`) and
    /// compared against every name that normalizes to a semantic version.
    pub fn matching(&self, constraint: &str) -> Vec<&Reference> {
        if let Some(exact) = self.refs.get(constraint) {
            return vec![exact];
        }

        let Some(req) = parse_constraint(constraint) else {
            return Vec::new();
        };

        let mut matched: Vec<(Version, &Reference)> = self
            .refs
            .values()
            .filter_map(|r| parse_version(r.short_name()).map(|v| (v, r)))
            .filter(|(v, _)| req.matches(v))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name().cmp(b.1.name())));
        matched.into_iter().rev().map(|(_, r)| r).collect()
    }

    /// The highest reference satisfying `constraint`. A `v0` request with no match falls
    /// back to the default branch.
    pub fn best_match(&self, constraint: &str) -> Option<&Reference> {
        if let Some(best) = self.matching(constraint).into_iter().next() {
            return Some(best);
        }
        if strip_v(constraint) == "0" {
            return self.default_branch();
        }
        None
    }

    pub fn resolve(&self, constraint: &str) -> Result<ResolvedVersion, ProtocolError> {
        self.best_match(constraint)
            .cloned()
            .map(ResolvedVersion::new)
            .ok_or_else(|| ProtocolError::version_not_found(constraint))
    }

    /// Best match of every major version from `v0` to `v99`, labelled `vN`, in ascending order.
    pub fn grouped_by_major(&self) -> Vec<(String, &Reference)> {
        (0..=MAX_GROUPED_MAJOR)
            .filter_map(|major| {
                let label = format!("v{major}");
                self.best_match(&label).map(|r| (label, r))
            })
            .collect()
    }
}

/// Drop a leading `v` when it directly precedes a decimal digit.
fn strip_v(s: &str) -> &str {
    match s.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => s,
    }
}

/// Split `1.2.3-rc.1+meta` into numeric components and the pre-release/build tail.
fn split_numeric(s: &str) -> Option<(Vec<u64>, &str)> {
    let s = strip_v(s);
    let split = s.find(['-', '+']).unwrap_or(s.len());
    let (core, rest) = s.split_at(split);
    let parts = core
        .split('.')
        .map(|p| {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                p.parse::<u64>().ok()
            }
        })
        .collect::<Option<Vec<u64>>>()?;
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    Some((parts, rest))
}

/// Normalize a ref name like `v1.2` or `1.2.3-beta` into a full semantic version.
fn parse_version(name: &str) -> Option<Version> {
    let (mut parts, rest) = split_numeric(name)?;
    parts.resize(3, 0);
    Version::parse(&format!("{}.{}.{}{}", parts[0], parts[1], parts[2], rest)).ok()
}

/// Turn a constraint prefix into a requirement: `1` matches `1.x.x`, `1.2` matches `1.2.x`.
fn parse_constraint(constraint: &str) -> Option<VersionReq> {
    let (parts, rest) = split_numeric(constraint)?;
    let core = parts
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".");
    VersionReq::parse(&format!("={core}{rest}")).ok()
}
