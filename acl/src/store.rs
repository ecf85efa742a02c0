//! C6 — the ACL store: entries, lists, and the merge/normalize rules for
//! adding an entry to a node's policy (spec.md §4.6).

use crate::error::{Error, Result};
use crate::external::RawAce;
use crate::privilege::{names_from_privileges, privileges_from_names, PrivBits};

/// A single access control entry: a principal, a polarity, a privilege
/// set, and an optional glob restricting which descendants it applies to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub principal_name: String,
    pub allow: bool,
    pub privileges: PrivBits,
    pub glob: Option<Glob>,
}

impl Entry {
    /// Whether `relative_path` (the target's path relative to the
    /// access-controlled node this entry lives on) is covered by this
    /// entry's glob restriction. An entry with no glob covers everything.
    pub fn matches_glob(&self, relative_path: &str) -> bool {
        match &self.glob {
            None => true,
            Some(glob) => glob.matches(relative_path),
        }
    }

    fn to_raw(&self) -> RawAce {
        RawAce {
            principal_name: self.principal_name.clone(),
            allow: self.allow,
            privileges: names_from_privileges(self.privileges)
                .into_iter()
                .map(str::to_string)
                .collect(),
            glob: self.glob.as_ref().map(|g| g.0.clone()),
        }
    }
}

/// A glob path filter: `*` matches any run of path characters, anything
/// else matches literally. Matching is anchored at both ends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Glob(String);

impl Glob {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn matches(&self, path: &str) -> bool {
        glob_match(&self.0, path)
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_rec(&pattern, &text)
}

fn glob_match_rec(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            glob_match_rec(&pattern[1..], text)
                || (!text.is_empty() && glob_match_rec(pattern, &text[1..]))
        }
        Some(c) => text.first() == Some(c) && glob_match_rec(&pattern[1..], &text[1..]),
    }
}

/// Converts a raw, persisted ACE into a validated [`Entry`], rejecting an
/// unrecognized privilege name as [`Error::PolicyInvalid`] (spec.md §7).
pub fn entry_from_raw(raw: &RawAce) -> Result<Entry> {
    let privileges = privileges_from_names(raw.privileges.iter().map(String::as_str))
        .map_err(|bad| Error::PolicyInvalid(format!("unknown privilege `{bad}`")))?;
    Ok(Entry {
        principal_name: raw.principal_name.clone(),
        allow: raw.allow,
        privileges,
        glob: raw.glob.clone().map(Glob::new),
    })
}

/// The ordered sequence of entries at one access-controlled node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessControlList {
    entries: Vec<Entry>,
}

impl AccessControlList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn to_raw(&self) -> Vec<RawAce> {
        self.entries.iter().map(Entry::to_raw).collect()
    }

    /// Adds an entry for `(principal, allow, privileges, glob)` following
    /// the merge rules of spec.md §4.6:
    ///
    /// 1. If an entry for `(principal, allow)` with a matching glob
    ///    already covers `privileges`, this is a no-op.
    /// 2. Otherwise its privileges are OR-merged in, and any bits newly
    ///    covered are subtracted from the opposite-polarity entry for the
    ///    same principal and glob; if that entry becomes empty it is
    ///    removed.
    /// 3. The merged entry keeps the earliest insertion index of the
    ///    entries involved; the complement entry keeps its own position
    ///    unless removed.
    pub fn add_entry(
        &mut self,
        principal_name: impl Into<String>,
        allow: bool,
        privileges: PrivBits,
        glob: Option<Glob>,
    ) {
        let principal_name = principal_name.into();
        let same_index = self.entries.iter().position(|e| {
            e.principal_name == principal_name && e.allow == allow && e.glob == glob
        });
        if let Some(idx) = same_index {
            if self.entries[idx].privileges.contains(privileges) {
                return;
            }
        }

        let mut opposite_index = self.entries.iter().position(|e| {
            e.principal_name == principal_name && e.allow != allow && e.glob == glob
        });

        match same_index {
            Some(idx) => {
                self.entries[idx].privileges |= privileges;
            }
            None => {
                let insert_at = opposite_index.unwrap_or(self.entries.len());
                self.entries.insert(
                    insert_at,
                    Entry {
                        principal_name: principal_name.clone(),
                        allow,
                        privileges,
                        glob: glob.clone(),
                    },
                );
                // Inserting ahead of (or at) the opposite entry's old
                // position shifts it one slot to the right.
                if let Some(idx) = opposite_index.as_mut() {
                    *idx += 1;
                }
            }
        }

        if let Some(idx) = opposite_index {
            if let Some(entry) = self.entries.get_mut(idx) {
                entry.privileges.remove(privileges);
                if entry.privileges.is_empty() {
                    self.entries.remove(idx);
                }
            }
        }
    }

    pub fn remove_entry(&mut self, principal_name: &str, allow: bool, glob: &Option<Glob>) {
        self.entries
            .retain(|e| !(e.principal_name == principal_name && e.allow == allow && &e.glob == glob));
    }
}
