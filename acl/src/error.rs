//! Error taxonomy for ACL storage, collection, and permission compilation
//! (spec.md §7).

/// Failure modes surfaced by [`crate::store`], [`crate::collector`], and
/// [`crate::permissions`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The referenced node has no resolvable path.
    #[error("node not found")]
    NodeNotFound,
    /// A permission check failed; this is a user-visible refusal.
    #[error("access denied")]
    AccessDenied,
    /// An ACE named an unrecognized privilege (spec.md §7 "malformed ACL").
    #[error("malformed access control policy: {0}")]
    PolicyInvalid(String),
    /// A lock-registry lookup failed while servicing an ACL request
    /// (SPEC_FULL.md §2).
    #[error(transparent)]
    Tree(#[from] ward_tree::Error),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
