//! Access control lists, covering both POSIX.1e and NFSv4 models.

use std::fmt;

/// Which ACL an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclType {
    /// POSIX.1e access ACL
    Access,
    /// POSIX.1e default ACL (directories only)
    Default,
    /// NFSv4 allow entry
    Allow,
    /// NFSv4 deny entry
    Deny,
    /// NFSv4 audit entry
    Audit,
    /// NFSv4 alarm entry
    Alarm,
}

impl AclType {
    /// True for the two POSIX.1e types.
    pub fn is_posix1e(self) -> bool {
        matches!(self, AclType::Access | AclType::Default)
    }
}

/// Who an ACL entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclTag {
    /// The owning user
    UserObj,
    /// A named user (see qualifier)
    User,
    /// The owning group
    GroupObj,
    /// A named group (see qualifier)
    Group,
    /// POSIX.1e mask entry
    Mask,
    /// POSIX.1e other entry
    Other,
    /// NFSv4 everyone@ entry
    Everyone,
}

bitflags::bitflags! {
    /// Permission bits and inheritance flags for one ACL entry.
    ///
    /// The first three are the POSIX.1e set; the rest are the NFSv4
    /// permissions and inheritance flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AclPerms: u32 {
        /// read (POSIX.1e) / read-data
        const READ               = 1 << 0;
        /// write (POSIX.1e) / write-data
        const WRITE              = 1 << 1;
        /// execute
        const EXECUTE            = 1 << 2;
        /// NFSv4 read-data (alias of READ on files)
        const READ_DATA          = 1 << 3;
        /// NFSv4 list-directory
        const LIST_DIRECTORY     = 1 << 4;
        /// NFSv4 write-data / add-file
        const WRITE_DATA         = 1 << 5;
        /// NFSv4 add-file
        const ADD_FILE           = 1 << 6;
        /// NFSv4 append-data
        const APPEND_DATA        = 1 << 7;
        /// NFSv4 add-subdirectory
        const ADD_SUBDIRECTORY   = 1 << 8;
        /// NFSv4 read-named-attrs
        const READ_NAMED_ATTRS   = 1 << 9;
        /// NFSv4 write-named-attrs
        const WRITE_NAMED_ATTRS  = 1 << 10;
        /// NFSv4 delete-child
        const DELETE_CHILD       = 1 << 11;
        /// NFSv4 read-attributes
        const READ_ATTRIBUTES    = 1 << 12;
        /// NFSv4 write-attributes
        const WRITE_ATTRIBUTES   = 1 << 13;
        /// NFSv4 delete
        const DELETE             = 1 << 14;
        /// NFSv4 read-acl
        const READ_ACL           = 1 << 15;
        /// NFSv4 write-acl
        const WRITE_ACL          = 1 << 16;
        /// NFSv4 write-owner
        const WRITE_OWNER        = 1 << 17;
        /// NFSv4 synchronize
        const SYNCHRONIZE        = 1 << 18;

        /// inherit to files
        const FILE_INHERIT       = 1 << 24;
        /// inherit to directories
        const DIRECTORY_INHERIT  = 1 << 25;
        /// do not propagate inherit
        const NO_PROPAGATE       = 1 << 26;
        /// inherit only (does not apply to the object itself)
        const INHERIT_ONLY       = 1 << 27;
        /// audit successful access
        const SUCCESSFUL_ACCESS  = 1 << 28;
        /// audit failed access
        const FAILED_ACCESS      = 1 << 29;
        /// entry was inherited
        const INHERITED          = 1 << 30;
    }
}

/// One ACL entry: (type, permset, tag, qualifier).
///
/// The qualifier (numeric id and/or name) is only meaningful for the
/// [AclTag::User] and [AclTag::Group] tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    /// Which ACL this entry belongs to
    pub kind: AclType,
    /// Permissions and inheritance flags
    pub perms: AclPerms,
    /// Who the entry applies to
    pub tag: AclTag,
    /// Numeric qualifier (uid/gid) for named user/group entries
    pub id: Option<i64>,
    /// Textual qualifier for named user/group entries
    pub name: Option<String>,
}

/// An unordered collection of ACL entries with set semantics: adding an
/// entry equal to an existing one is a no-op. Iteration order is insertion
/// order, which NFSv4 consumers rely on.
#[derive(Debug, Clone, Default)]
pub struct AclSet {
    entries: Vec<AclEntry>,
}

impl AclSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; idempotent on an equal tuple.
    pub fn add(&mut self, entry: AclEntry) {
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &AclEntry> {
        self.entries.iter()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Render the POSIX.1e entries of the given type in `getfacl` syntax,
    /// one entry per line: `user:name:rwx` etc.
    pub fn to_text_posix(&self, kind: AclType) -> String {
        let mut out = String::new();
        for e in self.entries.iter().filter(|e| e.kind == kind) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&e.to_text_posix());
        }
        out
    }

    /// Render the NFSv4 entries in `nfs4_setfacl` flavored syntax.
    pub fn to_text_nfs4(&self) -> String {
        let mut out = String::new();
        for e in self.entries.iter().filter(|e| !e.kind.is_posix1e()) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&e.to_text_nfs4());
        }
        out
    }

    /// Parse newline- or comma-separated POSIX.1e text into entries of the
    /// given type, adding them to the set.
    pub fn parse_posix_text(&mut self, text: &str, kind: AclType) -> Result<(), AclParseError> {
        for line in text.split(|c| c == '\n' || c == ',') {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add(AclEntry::parse_posix(line, kind)?);
        }
        Ok(())
    }

    /// Parse newline-separated NFSv4 text (`who:perms:flags:kind` items),
    /// preserving the entry order.
    pub fn parse_nfs4_text(&mut self, text: &str) -> Result<(), AclParseError> {
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add(AclEntry::parse_nfs4(line)?);
        }
        Ok(())
    }
}

/// An ACL text form didn't parse.
#[derive(Debug, thiserror::Error)]
#[error("malformed acl text: {0}")]
pub struct AclParseError(String);

impl AclEntry {
    const NFS4_PERM_CHARS: &'static [(AclPerms, char)] = &[
        (AclPerms::READ_DATA, 'r'),
        (AclPerms::WRITE_DATA, 'w'),
        (AclPerms::EXECUTE, 'x'),
        (AclPerms::APPEND_DATA, 'p'),
        (AclPerms::DELETE, 'd'),
        (AclPerms::DELETE_CHILD, 'D'),
        (AclPerms::READ_ATTRIBUTES, 'a'),
        (AclPerms::WRITE_ATTRIBUTES, 'A'),
        (AclPerms::READ_NAMED_ATTRS, 'R'),
        (AclPerms::WRITE_NAMED_ATTRS, 'W'),
        (AclPerms::READ_ACL, 'c'),
        (AclPerms::WRITE_ACL, 'C'),
        (AclPerms::WRITE_OWNER, 'o'),
        (AclPerms::SYNCHRONIZE, 's'),
    ];
    const NFS4_FLAG_CHARS: &'static [(AclPerms, char)] = &[
        (AclPerms::FILE_INHERIT, 'f'),
        (AclPerms::DIRECTORY_INHERIT, 'd'),
        (AclPerms::NO_PROPAGATE, 'n'),
        (AclPerms::INHERIT_ONLY, 'i'),
        (AclPerms::SUCCESSFUL_ACCESS, 'S'),
        (AclPerms::FAILED_ACCESS, 'F'),
        (AclPerms::INHERITED, 'I'),
    ];

    fn posix_bits(&self) -> [char; 3] {
        [
            if self.perms.contains(AclPerms::READ) { 'r' } else { '-' },
            if self.perms.contains(AclPerms::WRITE) { 'w' } else { '-' },
            if self.perms.contains(AclPerms::EXECUTE) { 'x' } else { '-' },
        ]
    }

    /// `user:jane:rw-` / `group::r--` / `mask::rwx` / `other::r--`
    pub fn to_text_posix(&self) -> String {
        let bits: String = self.posix_bits().iter().collect();
        let qualifier = self.name.clone().unwrap_or_else(|| {
            self.id.map(|id| id.to_string()).unwrap_or_default()
        });
        let tag = match self.tag {
            AclTag::UserObj => return format!("user::{bits}"),
            AclTag::GroupObj => return format!("group::{bits}"),
            AclTag::User => "user",
            AclTag::Group => "group",
            AclTag::Mask => return format!("mask::{bits}"),
            AclTag::Other => return format!("other::{bits}"),
            AclTag::Everyone => "everyone",
        };
        format!("{tag}:{qualifier}:{bits}")
    }

    /// `owner@:rwxp----------:-------:allow` flavored rendering.
    pub fn to_text_nfs4(&self) -> String {
        let who = match self.tag {
            AclTag::UserObj => "owner@".to_string(),
            AclTag::GroupObj => "group@".to_string(),
            AclTag::Everyone => "everyone@".to_string(),
            _ => self.name.clone().unwrap_or_else(|| {
                self.id.map(|id| id.to_string()).unwrap_or_default()
            }),
        };

        let perms: String = Self::NFS4_PERM_CHARS
            .iter()
            .map(|(p, c)| if self.perms.contains(*p) { *c } else { '-' })
            .collect();
        let flags: String = Self::NFS4_FLAG_CHARS
            .iter()
            .map(|(p, c)| if self.perms.contains(*p) { *c } else { '-' })
            .collect();

        let kind = match self.kind {
            AclType::Allow => "allow",
            AclType::Deny => "deny",
            AclType::Audit => "audit",
            AclType::Alarm => "alarm",
            // callers filter these out; render something sensible anyway
            AclType::Access | AclType::Default => "allow",
        };

        format!("{who}:{perms}:{flags}:{kind}")
    }

    /// Parse one NFSv4 `who:perms:flags:kind` item.
    pub fn parse_nfs4(item: &str) -> Result<Self, AclParseError> {
        let parts: Vec<&str> = item.split(':').collect();
        let [who, perm_s, flag_s, kind_s] = parts[..] else {
            return Err(AclParseError(item.to_string()));
        };

        let (tag, id, name) = match who {
            "owner@" => (AclTag::UserObj, None, None),
            "group@" => (AclTag::GroupObj, None, None),
            "everyone@" => (AclTag::Everyone, None, None),
            q => match q.parse::<i64>() {
                Ok(id) => (AclTag::User, Some(id), None),
                Err(_) => (AclTag::User, None, Some(q.to_string())),
            },
        };

        let mut perms = AclPerms::empty();
        for c in perm_s.chars() {
            if c == '-' {
                continue;
            }
            match Self::NFS4_PERM_CHARS.iter().find(|(_, pc)| *pc == c) {
                Some((p, _)) => perms |= *p,
                None => return Err(AclParseError(item.to_string())),
            }
        }
        for c in flag_s.chars() {
            if c == '-' {
                continue;
            }
            match Self::NFS4_FLAG_CHARS.iter().find(|(_, fc)| *fc == c) {
                Some((p, _)) => perms |= *p,
                None => return Err(AclParseError(item.to_string())),
            }
        }

        let kind = match kind_s {
            "allow" => AclType::Allow,
            "deny" => AclType::Deny,
            "audit" => AclType::Audit,
            "alarm" => AclType::Alarm,
            _ => return Err(AclParseError(item.to_string())),
        };

        Ok(AclEntry {
            kind,
            perms,
            tag,
            id,
            name,
        })
    }

    /// Parse one POSIX.1e `tag:qualifier:perms` item.
    pub fn parse_posix(item: &str, kind: AclType) -> Result<Self, AclParseError> {
        let mut parts = item.splitn(3, ':');
        let tag_s = parts.next().unwrap_or_default();
        let qual = parts.next().unwrap_or_default();
        let bits = parts
            .next()
            .ok_or_else(|| AclParseError(item.to_string()))?;

        let (tag, id, name) = match (tag_s, qual.is_empty()) {
            ("user" | "u", true) => (AclTag::UserObj, None, None),
            ("group" | "g", true) => (AclTag::GroupObj, None, None),
            ("user" | "u", false) => match qual.parse::<i64>() {
                Ok(id) => (AclTag::User, Some(id), None),
                Err(_) => (AclTag::User, None, Some(qual.to_string())),
            },
            ("group" | "g", false) => match qual.parse::<i64>() {
                Ok(id) => (AclTag::Group, Some(id), None),
                Err(_) => (AclTag::Group, None, Some(qual.to_string())),
            },
            ("mask" | "m", _) => (AclTag::Mask, None, None),
            ("other" | "o", _) => (AclTag::Other, None, None),
            _ => return Err(AclParseError(item.to_string())),
        };

        let mut perms = AclPerms::empty();
        for c in bits.chars() {
            match c {
                'r' => perms |= AclPerms::READ,
                'w' => perms |= AclPerms::WRITE,
                'x' => perms |= AclPerms::EXECUTE,
                '-' => {}
                _ => return Err(AclParseError(item.to_string())),
            }
        }

        Ok(AclEntry {
            kind,
            perms,
            tag,
            id,
            name,
        })
    }
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_posix1e() {
            write!(f, "{}", self.to_text_posix())
        } else {
            write!(f, "{}", self.to_text_nfs4())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut set = AclSet::new();
        let e = AclEntry {
            kind: AclType::Access,
            perms: AclPerms::READ | AclPerms::WRITE,
            tag: AclTag::UserObj,
            id: None,
            name: None,
        };
        set.add(e.clone());
        set.add(e);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn posix_text_roundtrip() {
        let mut set = AclSet::new();
        set.parse_posix_text("user::rw-,user:jane:r--,group::r--,mask::rw-,other::---", AclType::Access)
            .unwrap();
        assert_eq!(set.len(), 5);
        let text = set.to_text_posix(AclType::Access);
        assert!(text.contains("user:jane:r--"));
        assert!(text.contains("other::---"));

        let mut again = AclSet::new();
        again.parse_posix_text(&text, AclType::Access).unwrap();
        assert_eq!(again.len(), 5);
    }

    #[test]
    fn nfs4_rendering() {
        let e = AclEntry {
            kind: AclType::Allow,
            perms: AclPerms::READ_DATA
                | AclPerms::WRITE_DATA
                | AclPerms::APPEND_DATA
                | AclPerms::FILE_INHERIT,
            tag: AclTag::UserObj,
            id: None,
            name: None,
        };
        assert_eq!(e.to_text_nfs4(), "owner@:rw-p----------:f------:allow");
    }

    #[test]
    fn nfs4_text_roundtrip() {
        let mut set = AclSet::new();
        set.parse_nfs4_text("owner@:rw-p----------:f------:allow\n1001:r-------------:-------:deny")
            .unwrap();
        assert_eq!(set.len(), 2);
        let text = set.to_text_nfs4();

        let mut again = AclSet::new();
        again.parse_nfs4_text(&text).unwrap();
        assert_eq!(again.len(), 2);
        let entries: Vec<_> = again.iter().collect();
        assert_eq!(entries[0].tag, AclTag::UserObj);
        assert_eq!(entries[1].id, Some(1001));
        assert_eq!(entries[1].kind, AclType::Deny);
    }
}
