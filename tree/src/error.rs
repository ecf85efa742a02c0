//! Error taxonomy for the path trie and lock registry (spec.md §7).

/// Failure modes surfaced by [`crate::lock::LockRegistry`] and
/// [`crate::overlay::TransactionalOverlay`].
///
/// `Locked`-family variants are user-visible refusals, not internal
/// failures: callers are expected to match on them rather than treat them
/// as exceptional.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The referenced node has no resolvable path.
    #[error("node not found")]
    NodeNotFound,
    /// The exact path already carries a live lock.
    #[error("node is already locked")]
    AlreadyLocked,
    /// An ancestor carries a live deep lock.
    #[error("an ancestor is deep-locked")]
    ParentDeepLocked,
    /// A descendant carries a live lock, blocking a new deep lock.
    #[error("a descendant is locked")]
    ChildLocked,
    /// No live lock exists where one was expected.
    #[error("node is not locked")]
    NotLocked,
    /// `check_lock` found an applicable lock not held by the calling
    /// session.
    #[error("node is locked by another session")]
    Locked,
    /// The caller's session does not hold the lock it tried to release.
    #[error("session does not hold this lock")]
    NotHolder,
    /// The lock token is currently attached to a different session.
    #[error("lock token is held by another session")]
    OtherHolder,
    /// The lock token failed to parse (bad separator or check digit).
    #[error("malformed lock token: {0}")]
    BadToken(#[from] crate::token::ParseTokenError),
    /// A transactional overlay failed prepare-time revalidation.
    #[error("transaction conflicts with committed state")]
    TransactionConflict,
    /// The journal could not be read or written.
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
