//! C4 — the event consolidator.
//!
//! Hierarchy services often emit a raw ADD+REMOVE pair for what is, from a
//! lock or ACL perspective, a single MOVE. This module merges same-tick
//! events per node identifier so that downstream consumers — the lock
//! registry's `refresh` and the ACL change notifier's cache invalidation —
//! see one semantic event per node, in the order the first of its
//! constituent raw events occurred (spec.md §4.4).

use crate::nid::Nid;
use crate::path::PathBuf;
use std::collections::HashMap;

/// A single raw hierarchy change, as reported by the hierarchy service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RawEvent {
    /// `nid` was added at `path`.
    Add { nid: Nid, path: PathBuf },
    /// `nid`, previously at `path`, was removed.
    Remove { nid: Nid, path: PathBuf },
}

impl RawEvent {
    fn nid(&self) -> Nid {
        match self {
            RawEvent::Add { nid, .. } => *nid,
            RawEvent::Remove { nid, .. } => *nid,
        }
    }
}

/// A consolidated hierarchy change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// `nid` now exists at `path`, and did not exist before this batch.
    Added { nid: Nid, path: PathBuf },
    /// `nid` no longer exists; it was last at `path`.
    Removed { nid: Nid, path: PathBuf },
    /// `nid` existed throughout this batch but moved from `from` to `to`.
    Moved {
        nid: Nid,
        from: PathBuf,
        to: PathBuf,
    },
}

impl Event {
    /// The node this event concerns.
    pub fn nid(&self) -> Nid {
        match self {
            Event::Added { nid, .. } => *nid,
            Event::Removed { nid, .. } => *nid,
            Event::Moved { nid, .. } => *nid,
        }
    }
}

#[derive(Default)]
struct Entry {
    first_seen_order: usize,
    add: Option<PathBuf>,
    remove: Option<PathBuf>,
}

/// Consolidates a batch of [`RawEvent`]s into [`Event`]s.
///
/// A node seen only as `Remove` yields `Removed`; only as `Add` yields
/// `Added`; seen as both yields `Moved` from the remove path to the add
/// path, regardless of which raw event arrived first in the batch.
/// Consolidated events are returned in the order each node was first
/// mentioned in the input.
pub fn consolidate(events: impl IntoIterator<Item = RawEvent>) -> Vec<Event> {
    let mut by_nid: HashMap<Nid, Entry> = HashMap::new();
    for (order, event) in events.into_iter().enumerate() {
        let nid = event.nid();
        let entry = by_nid.entry(nid).or_insert_with(|| Entry {
            first_seen_order: order,
            add: None,
            remove: None,
        });
        match event {
            RawEvent::Add { path, .. } => entry.add = Some(path),
            RawEvent::Remove { path, .. } => entry.remove = Some(path),
        }
    }
    let mut out: Vec<(usize, Event)> = Vec::with_capacity(by_nid.len());
    for (nid, entry) in by_nid {
        let event = match (entry.add, entry.remove) {
            (Some(to), Some(from)) => Event::Moved { nid, from, to },
            (Some(path), None) => Event::Added { nid, path },
            (None, Some(path)) => Event::Removed { nid, path },
            (None, None) => unreachable!("entry is only created alongside an add or remove"),
        };
        out.push((entry.first_seen_order, event));
    }
    out.sort_by_key(|(order, _)| *order);
    out.into_iter().map(|(_, event)| event).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> PathBuf {
        s.parse().unwrap()
    }

    #[test]
    fn add_and_remove_of_same_nid_consolidates_to_move() {
        let nid = Nid::new_random();
        let events = vec![
            RawEvent::Remove {
                nid,
                path: path("/a"),
            },
            RawEvent::Add {
                nid,
                path: path("/b"),
            },
        ];
        let consolidated = consolidate(events);
        assert_eq!(consolidated.len(), 1);
        match &consolidated[0] {
            Event::Moved { from, to, .. } => {
                assert_eq!(from, &path("/a"));
                assert_eq!(to, &path("/b"));
            }
            other => panic!("expected Moved, got {other:?}"),
        }
    }

    #[test]
    fn lone_add_stays_add() {
        let nid = Nid::new_random();
        let consolidated = consolidate(vec![RawEvent::Add {
            nid,
            path: path("/a"),
        }]);
        assert!(matches!(consolidated[0], Event::Added { .. }));
    }

    #[test]
    fn lone_remove_stays_remove() {
        let nid = Nid::new_random();
        let consolidated = consolidate(vec![RawEvent::Remove {
            nid,
            path: path("/a"),
        }]);
        assert!(matches!(consolidated[0], Event::Removed { .. }));
    }

    #[test]
    fn preserves_first_seen_order_across_distinct_nodes() {
        let a = Nid::new_random();
        let b = Nid::new_random();
        let events = vec![
            RawEvent::Add {
                nid: b,
                path: path("/b"),
            },
            RawEvent::Add {
                nid: a,
                path: path("/a"),
            },
        ];
        let consolidated = consolidate(events);
        assert_eq!(consolidated[0].nid(), b);
        assert_eq!(consolidated[1].nid(), a);
    }
}
