//! Typed Git references as advertised by an upstream.

use std::fmt;

use crate::hash::ObjectHash;
use crate::protocol::types::{BRANCH_PREFIX, HEAD, PEELED_SUFFIX, TAG_PREFIX};

/// Reference kind, derived from the namespace of the full ref name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// `refs/heads/<name>`
    Branch,
    /// `refs/tags/<name>`; for an annotated tag this is the tag object itself.
    Tag,
    /// `refs/tags/<name>^{}`, the commit an annotated tag peels to.
    AnnotatedTag,
    /// `HEAD`, pointing at another ref by name.
    Symbolic,
}

impl RefKind {
    pub fn from_name(name: &str) -> Option<RefKind> {
        if name == HEAD {
            Some(RefKind::Symbolic)
        } else if name.starts_with(BRANCH_PREFIX) {
            Some(RefKind::Branch)
        } else if name.starts_with(TAG_PREFIX) {
            if name.ends_with(PEELED_SUFFIX) {
                Some(RefKind::AnnotatedTag)
            } else {
                Some(RefKind::Tag)
            }
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    name: String,
    hash: ObjectHash,
    kind: RefKind,
    target: Option<String>,
}

impl Reference {
    /// Build a branch or tag reference from its full name. Returns `None` for names outside
    /// `refs/heads/` and `refs/tags/` (pull refs, notes, `HEAD`, ...).
    pub fn new(name: impl Into<String>, hash: ObjectHash) -> Option<Reference> {
        let name = name.into();
        match RefKind::from_name(&name)? {
            RefKind::Symbolic => None,
            kind => Some(Reference {
                name,
                hash,
                kind,
                target: None,
            }),
        }
    }

    /// `HEAD` pointing at `target`, carrying the target's hash.
    pub fn symbolic(target: &Reference) -> Reference {
        Reference {
            name: HEAD.to_string(),
            hash: target.hash,
            kind: RefKind::Symbolic,
            target: Some(target.name.clone()),
        }
    }

    /// Full ref name, e.g. `refs/tags/v1.2.0^{}`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name with its namespace and any peel suffix removed, e.g. `v1.2.0`.
    pub fn short_name(&self) -> &str {
        let name = self
            .name
            .strip_prefix(BRANCH_PREFIX)
            .or_else(|| self.name.strip_prefix(TAG_PREFIX))
            .unwrap_or(&self.name);
        name.strip_suffix(PEELED_SUFFIX).unwrap_or(name)
    }

    pub fn hash(&self) -> ObjectHash {
        self.hash
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// Full name of the ref a symbolic reference points at.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn is_branch(&self) -> bool {
        self.kind == RefKind::Branch
    }

    /// The same target under `refs/heads/<short name>`. Branches are returned unchanged.
    pub fn to_branch(&self) -> Reference {
        if self.is_branch() {
            return self.clone();
        }
        Reference {
            name: format!("{BRANCH_PREFIX}{}", self.short_name()),
            hash: self.hash,
            kind: RefKind::Branch,
            target: None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "ref: {} {}", target, self.name),
            None => write!(f, "{} {}", self.hash, self.name),
        }
    }
}

/// The reference a constraint resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    reference: Reference,
    relabeled: bool,
}

impl ResolvedVersion {
    pub fn new(reference: Reference) -> Self {
        let relabeled = !reference.is_branch();
        Self {
            reference,
            relabeled,
        }
    }

    /// The upstream reference as it was matched.
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Whether advertising this version required presenting a tag as a branch.
    pub fn relabeled(&self) -> bool {
        self.relabeled
    }

    /// The branch the client is told exists.
    pub fn branch(&self) -> Reference {
        self.reference.to_branch()
    }
}
