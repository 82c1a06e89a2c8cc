//! The match engine: include/exclude patterns plus time and owner gates,
//! applied to entries between `next_header` and data processing.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::entry::{Entry, Timespec};

/// Builds a [MatchEngine].
#[derive(Default)]
pub struct MatchBuilder {
    includes: Vec<Glob>,
    excludes: Vec<Glob>,
    newer_mtime: Option<Timespec>,
    older_mtime: Option<Timespec>,
    uids: Vec<i64>,
    gids: Vec<i64>,
    unames: Vec<String>,
    gnames: Vec<String>,
}

impl MatchBuilder {
    /// A builder with no filters: everything matches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only entries matching at least one inclusion pattern pass (when any
    /// inclusion pattern is present).
    pub fn include(mut self, pattern: &str) -> Result<Self, globset::Error> {
        self.includes.push(Glob::new(pattern)?);
        Ok(self)
    }

    /// Entries matching an exclusion pattern are dropped.
    pub fn exclude(mut self, pattern: &str) -> Result<Self, globset::Error> {
        self.excludes.push(Glob::new(pattern)?);
        Ok(self)
    }

    /// Only entries strictly newer than `t` pass.
    pub fn newer_than(mut self, t: Timespec) -> Self {
        self.newer_mtime = Some(t);
        self
    }

    /// Only entries older than or equal to `t` pass.
    pub fn older_than(mut self, t: Timespec) -> Self {
        self.older_mtime = Some(t);
        self
    }

    /// Only entries owned by this uid pass (repeatable, any matches).
    pub fn owned_by_uid(mut self, uid: i64) -> Self {
        self.uids.push(uid);
        self
    }

    /// Only entries owned by this gid pass (repeatable, any matches).
    pub fn owned_by_gid(mut self, gid: i64) -> Self {
        self.gids.push(gid);
        self
    }

    /// Only entries owned by this user name pass (repeatable, any matches).
    pub fn owned_by_uname(mut self, uname: impl Into<String>) -> Self {
        self.unames.push(uname.into());
        self
    }

    /// Only entries owned by this group name pass (repeatable, any matches).
    pub fn owned_by_gname(mut self, gname: impl Into<String>) -> Self {
        self.gnames.push(gname.into());
        self
    }

    /// Finalize into an engine.
    pub fn build(self) -> Result<MatchEngine, globset::Error> {
        let mut inc = GlobSetBuilder::new();
        for g in self.includes {
            inc.add(g);
        }
        let mut exc = GlobSetBuilder::new();
        for g in self.excludes {
            exc.add(g);
        }
        Ok(MatchEngine {
            has_includes: !inc.build()?.is_empty(),
            includes: inc.build()?,
            excludes: exc.build()?,
            newer_mtime: self.newer_mtime,
            older_mtime: self.older_mtime,
            uids: self.uids,
            gids: self.gids,
            unames: self.unames,
            gnames: self.gnames,
        })
    }
}

/// Decides whether an entry is excluded from processing.
pub struct MatchEngine {
    includes: GlobSet,
    has_includes: bool,
    excludes: GlobSet,
    newer_mtime: Option<Timespec>,
    older_mtime: Option<Timespec>,
    uids: Vec<i64>,
    gids: Vec<i64>,
    unames: Vec<String>,
    gnames: Vec<String>,
}

impl MatchEngine {
    /// True when the entry should be skipped.
    pub fn excluded(&self, entry: &Entry) -> bool {
        let path = entry.pathname();

        if self.excludes.is_match(&path) {
            return true;
        }
        if self.has_includes && !self.includes.is_match(&path) {
            return true;
        }

        if let Some(threshold) = self.newer_mtime {
            match entry.mtime {
                Some(mtime) if mtime > threshold => {}
                _ => return true,
            }
        }
        if let Some(threshold) = self.older_mtime {
            match entry.mtime {
                Some(mtime) if mtime <= threshold => {}
                _ => return true,
            }
        }

        if !self.uids.is_empty() {
            match entry.uid {
                Some(uid) if self.uids.contains(&uid) => {}
                _ => return true,
            }
        }
        if !self.gids.is_empty() {
            match entry.gid {
                Some(gid) if self.gids.contains(&gid) => {}
                _ => return true,
            }
        }
        if !self.unames.is_empty() {
            let uname = entry.uname.as_ref().map(|u| u.to_string_lossy());
            match uname {
                Some(u) if self.unames.contains(&u) => {}
                _ => return true,
            }
        }
        if !self.gnames.is_empty() {
            let gname = entry.gname.as_ref().map(|g| g.to_string_lossy());
            match gname {
                Some(g) if self.gnames.contains(&g) => {}
                _ => return true,
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, mtime: i64) -> Entry {
        let mut e = Entry::new();
        e.set_pathname(path);
        e.mtime = Some(Timespec::from_secs(mtime));
        e
    }

    #[test]
    fn excludes_beat_includes() {
        let m = MatchBuilder::new()
            .include("src/**")
            .unwrap()
            .exclude("src/**/*.o")
            .unwrap()
            .build()
            .unwrap();

        assert!(!m.excluded(&entry("src/main.rs", 0)));
        assert!(m.excluded(&entry("src/obj/main.o", 0)));
        assert!(m.excluded(&entry("docs/readme.md", 0)));
    }

    #[test]
    fn newer_than_gate() {
        let m = MatchBuilder::new()
            .newer_than(Timespec::from_secs(1000))
            .build()
            .unwrap();
        assert!(m.excluded(&entry("old", 999)));
        assert!(m.excluded(&entry("same", 1000)));
        assert!(!m.excluded(&entry("new", 1001)));
    }

    #[test]
    fn owner_gate() {
        let m = MatchBuilder::new().owned_by_uid(1000).build().unwrap();
        let mut e = entry("x", 0);
        assert!(m.excluded(&e));
        e.uid = Some(1000);
        assert!(!m.excluded(&e));
    }
}
