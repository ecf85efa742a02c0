//! Privilege and permission bitsets, and the privilege-name registry
//! (spec.md §4.6, §6).
//!
//! Privileges are what an ACE grants or denies; permissions are what
//! [`crate::permissions`] actually checks against an operation. The two
//! are distinct bitsets because one privilege can imply several
//! permissions depending on context (spec.md §4.8).

use bitflags::bitflags;

bitflags! {
    /// A set of privileges, as named on an ACE (spec.md §6).
    pub struct PrivBits: u32 {
        const READ                  = 0b0000_0000_0001;
        const MODIFY_PROPERTIES     = 0b0000_0000_0010;
        const ADD_CHILD_NODES       = 0b0000_0000_0100;
        const REMOVE_CHILD_NODES    = 0b0000_0000_1000;
        const REMOVE_NODE           = 0b0000_0001_0000;
        const READ_AC               = 0b0000_0010_0000;
        const MODIFY_AC             = 0b0000_0100_0000;
        const LOCK_MANAGEMENT       = 0b0000_1000_0000;
        const VERSION_MANAGEMENT    = 0b0001_0000_0000;
        const NODE_TYPE_MANAGEMENT  = 0b0010_0000_0000;

        /// Aggregate: every privilege that mutates repository content or
        /// structure, excluding access control and read.
        const WRITE = Self::MODIFY_PROPERTIES.bits
            | Self::ADD_CHILD_NODES.bits
            | Self::REMOVE_CHILD_NODES.bits
            | Self::REMOVE_NODE.bits
            | Self::NODE_TYPE_MANAGEMENT.bits;

        /// Aggregate: every known privilege.
        const ALL = Self::READ.bits
            | Self::MODIFY_PROPERTIES.bits
            | Self::ADD_CHILD_NODES.bits
            | Self::REMOVE_CHILD_NODES.bits
            | Self::REMOVE_NODE.bits
            | Self::READ_AC.bits
            | Self::MODIFY_AC.bits
            | Self::LOCK_MANAGEMENT.bits
            | Self::VERSION_MANAGEMENT.bits
            | Self::NODE_TYPE_MANAGEMENT.bits;
    }
}

bitflags! {
    /// A set of permissions: what an operation actually needs, derived
    /// from privileges by [`calculate_permissions`] in
    /// [`crate::permissions`].
    pub struct PermBits: u32 {
        const READ_NODE      = 0b0000_0000_0001;
        const READ_PROPERTY  = 0b0000_0000_0010;
        const ADD_NODE       = 0b0000_0000_0100;
        const REMOVE_NODE    = 0b0000_0000_1000;
        const SET_PROPERTY   = 0b0000_0001_0000;
        const REMOVE_PROPERTY = 0b0000_0010_0000;
        const READ_AC        = 0b0000_0100_0000;
        const MODIFY_AC      = 0b0000_1000_0000;
    }
}

/// The base (non-aggregate) privileges, in the order they're listed in
/// spec.md §6, used to serialize a [`PrivBits`] back to its component
/// privilege names.
const BASE_PRIVILEGES: &[(&str, PrivBits)] = &[
    ("READ", PrivBits::READ),
    ("MODIFY_PROPERTIES", PrivBits::MODIFY_PROPERTIES),
    ("ADD_CHILD_NODES", PrivBits::ADD_CHILD_NODES),
    ("REMOVE_CHILD_NODES", PrivBits::REMOVE_CHILD_NODES),
    ("REMOVE_NODE", PrivBits::REMOVE_NODE),
    ("READ_AC", PrivBits::READ_AC),
    ("MODIFY_AC", PrivBits::MODIFY_AC),
    ("LOCK_MANAGEMENT", PrivBits::LOCK_MANAGEMENT),
    ("VERSION_MANAGEMENT", PrivBits::VERSION_MANAGEMENT),
    ("NODE_TYPE_MANAGEMENT", PrivBits::NODE_TYPE_MANAGEMENT),
];

/// Resolves a single privilege name, including the aggregates `WRITE` and
/// `ALL`, to its bitset. Unknown names return `None`.
pub fn privilege_by_name(name: &str) -> Option<PrivBits> {
    match name {
        "WRITE" => Some(PrivBits::WRITE),
        "ALL" => Some(PrivBits::ALL),
        other => BASE_PRIVILEGES
            .iter()
            .find(|(n, _)| *n == other)
            .map(|(_, bits)| *bits),
    }
}

/// Resolves a set of privilege names to their combined bitset. Fails on
/// the first unrecognized name.
pub fn privileges_from_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<PrivBits, String> {
    let mut bits = PrivBits::empty();
    for name in names {
        bits |= privilege_by_name(name).ok_or_else(|| name.to_string())?;
    }
    Ok(bits)
}

/// Expands `bits` back to its component base privilege names, for
/// persisting a merged entry. Aggregates are never emitted; a `WRITE`
/// grant round-trips as its five component names.
pub fn names_from_privileges(bits: PrivBits) -> Vec<&'static str> {
    BASE_PRIVILEGES
        .iter()
        .filter(|(_, b)| bits.contains(*b))
        .map(|(name, _)| *name)
        .collect()
}
