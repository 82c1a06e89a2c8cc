//! The hardlink resolver used when writing archives.
//!
//! Formats that store one body per link set (tar, cpio) need somebody to
//! decide which of the entries sharing an inode carries the data. Consumers
//! pass every entry through [LinkResolver::apply]; it rewrites latecomers
//! (or early arrivals, depending on the strategy) into hardlink entries
//! with no body.

use std::collections::HashMap;

use crate::entry::Entry;

/// Which member of a hardlink set carries the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStrategy {
    /// First-seen entry carries the body; later siblings become links
    /// (GNU tar semantics).
    #[default]
    FirstWins,

    /// Last-seen entry carries the body: earlier siblings are held back
    /// and emitted as links once a later one shows up (old cpio semantics).
    LastWins,

    /// Any order works; groups that never completed are flushed at archive
    /// end (newc cpio / pax semantics).
    AnyOrder,
}

/// What the resolver wants the caller to do with an entry.
#[derive(Debug)]
pub enum Resolved {
    /// Write this entry as-is (it carries its body).
    Write(Box<Entry>),

    /// Write this entry as a hardlink to an earlier one; its size has been
    /// zeroed and its hardlink target set.
    WriteLink(Box<Entry>),

    /// The resolver is holding the entry back; write nothing yet.
    Deferred,
}

#[derive(Hash, PartialEq, Eq, Clone, Copy)]
struct InodeKey {
    dev: u64,
    ino: u64,
}

struct InodeGroup {
    /// path of the entry that carries (or will carry) the body
    carrier_path: String,
    /// how many more links we expect to see
    links_remaining: u32,
    /// entries held back by [LinkStrategy::LastWins]
    held: Vec<Box<Entry>>,
}

/// Pairs entries by (dev, ino) and decides who carries the body. Entries
/// with `nlink < 2` pass through untouched.
pub struct LinkResolver {
    strategy: LinkStrategy,
    groups: HashMap<InodeKey, InodeGroup>,
    /// entries released by a LastWins group completing
    ready: Vec<Box<Entry>>,
}

impl LinkResolver {
    /// A resolver with GNU-tar semantics.
    pub fn new() -> Self {
        Self::with_strategy(LinkStrategy::default())
    }

    /// A resolver with explicit semantics.
    pub fn with_strategy(strategy: LinkStrategy) -> Self {
        Self {
            strategy,
            groups: HashMap::new(),
            ready: Vec::new(),
        }
    }

    /// Run one entry through the resolver.
    pub fn apply(&mut self, entry: Box<Entry>) -> Resolved {
        let nlink = entry.nlink.unwrap_or(1);
        if nlink < 2 || !entry.has_data() {
            return Resolved::Write(entry);
        }
        let (Some(ino), Some(dev)) = (entry.ino, entry.dev) else {
            return Resolved::Write(entry);
        };
        let key = InodeKey {
            dev: dev.0 << 8 | dev.1,
            ino,
        };

        match self.strategy {
            LinkStrategy::FirstWins | LinkStrategy::AnyOrder => {
                match self.groups.get_mut(&key) {
                    None => {
                        self.groups.insert(
                            key,
                            InodeGroup {
                                carrier_path: entry.pathname(),
                                links_remaining: nlink - 1,
                                held: Vec::new(),
                            },
                        );
                        Resolved::Write(entry)
                    }
                    Some(group) => {
                        let mut entry = entry;
                        entry.hardlink = Some(group.carrier_path.as_str().into());
                        entry.size = Some(0);
                        entry.sparse.clear();
                        group.links_remaining = group.links_remaining.saturating_sub(1);
                        if group.links_remaining == 0 {
                            self.groups.remove(&key);
                        }
                        Resolved::WriteLink(entry)
                    }
                }
            }
            LinkStrategy::LastWins => {
                let group = self.groups.entry(key).or_insert_with(|| InodeGroup {
                    carrier_path: String::new(),
                    links_remaining: nlink,
                    held: Vec::new(),
                });
                group.links_remaining = group.links_remaining.saturating_sub(1);
                if group.links_remaining == 0 {
                    // this is the last sibling: it carries the body, and the
                    // held ones become links to it
                    let mut group = self.groups.remove(&key).unwrap();
                    group.carrier_path = entry.pathname();
                    // the held entries are returned through flush()
                    for mut held in group.held.drain(..) {
                        held.hardlink = Some(group.carrier_path.as_str().into());
                        held.size = Some(0);
                        self.ready.push(held);
                    }
                    Resolved::Write(entry)
                } else {
                    group.held.push(entry);
                    Resolved::Deferred
                }
            }
        }
    }

    /// Entries made ready by a previous [Self::apply] call (only the
    /// last-wins strategy produces them). Call after each apply.
    pub fn take_ready(&mut self) -> Vec<Box<Entry>> {
        std::mem::take(&mut self.ready)
    }

    /// Flush incomplete groups at archive end. Held entries had their
    /// bodies dropped when they were deferred, so they come out with a
    /// zero size.
    pub fn flush(&mut self) -> Vec<Box<Entry>> {
        let mut out = std::mem::take(&mut self.ready);
        for (_, group) in self.groups.drain() {
            for mut held in group.held {
                held.size = Some(0);
                out.push(held);
            }
        }
        out
    }
}

impl Default for LinkResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked_entry(path: &str, nlink: u32) -> Box<Entry> {
        let mut e = Entry::new();
        e.set_pathname(path);
        e.size = Some(4);
        e.nlink = Some(nlink);
        e.dev = Some((1, 0));
        e.ino = Some(42);
        Box::new(e)
    }

    #[test]
    fn first_wins_rewrites_second_sibling() {
        let mut resolver = LinkResolver::new();

        match resolver.apply(linked_entry("A", 2)) {
            Resolved::Write(e) => assert_eq!(e.size, Some(4)),
            other => panic!("expected Write, got {other:?}"),
        }
        match resolver.apply(linked_entry("B", 2)) {
            Resolved::WriteLink(e) => {
                assert_eq!(e.hardlink.as_ref().unwrap().to_string_lossy(), "A");
                assert_eq!(e.size, Some(0));
            }
            other => panic!("expected WriteLink, got {other:?}"),
        }
        assert!(resolver.flush().is_empty());
    }

    #[test]
    fn last_wins_defers_then_links_back() {
        let mut resolver = LinkResolver::with_strategy(LinkStrategy::LastWins);

        assert!(matches!(
            resolver.apply(linked_entry("A", 2)),
            Resolved::Deferred
        ));
        match resolver.apply(linked_entry("B", 2)) {
            Resolved::Write(e) => assert_eq!(e.pathname(), "B"),
            other => panic!("expected Write, got {other:?}"),
        }
        let ready = resolver.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].hardlink.as_ref().unwrap().to_string_lossy(), "B");
    }

    #[test]
    fn single_link_entries_bypass() {
        let mut resolver = LinkResolver::new();
        let mut e = Entry::new();
        e.set_pathname("plain");
        e.nlink = Some(1);
        assert!(matches!(resolver.apply(Box::new(e)), Resolved::Write(_)));
    }
}
