use std::collections::BTreeMap;

use polyarc_sync::polyarc::{
    entry::{AclEntry, AclPerms, AclTag, AclType, Entry, FileType, Timespec, Xattr},
    format::FormatCode,
    parse::tar::BLOCK_SIZE,
    write::tar as tarw,
};
use polyarc_sync::{
    write::write_entry_with_data, polyarc::linkify::{LinkResolver, Resolved},
    ReadBuilder, WriteBuilder,
};

fn simple_entry(path: &str, size: u64, mtime: i64) -> Entry {
    let mut e = Entry::new();
    e.set_pathname(path);
    e.filetype = FileType::Regular;
    e.mode = Some(0o644);
    e.size = Some(size);
    e.mtime = Some(Timespec::from_secs(mtime));
    e
}

/// Read every entry of `bytes`, collecting (path, data) pairs.
fn read_all(bytes: &[u8]) -> Vec<(Entry, Vec<u8>)> {
    let mut reader = ReadBuilder::new().open(bytes).unwrap();
    let mut out = Vec::new();
    while let Some(entry) = reader.next_header().unwrap() {
        let entry = entry.clone();
        let mut data = vec![0u8; entry.size.unwrap_or(0) as usize];
        let n = reader.read_data(&mut data).unwrap();
        data.truncate(n);
        reader.read_data_skip().unwrap();
        out.push((entry, data));
    }
    out
}

#[test_log::test]
fn empty_ustar_is_immediate_eof() {
    let input = vec![0u8; 1024];
    let mut reader = ReadBuilder::new().open(&input[..]).unwrap();
    assert!(reader.next_header().unwrap().is_none());
    assert_eq!(reader.format(), Some(FormatCode::Ustar));
    // and it stays that way
    assert!(reader.next_header().unwrap().is_none());
}

#[test_log::test]
fn single_file_pax_roundtrip() {
    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut out).unwrap();
        write_entry_with_data(&mut writer, &simple_entry("file", 5, 123), b"hello").unwrap();
        writer.close().unwrap();
    }

    let entries = read_all(&out);
    assert_eq!(entries.len(), 1);
    let (entry, data) = &entries[0];
    assert_eq!(entry.pathname(), "file");
    assert_eq!(entry.size, Some(5));
    assert_eq!(entry.mtime.unwrap().secs, 123);
    assert_eq!(entry.mode, Some(0o644));
    assert_eq!(data, b"hello");
}

#[test_log::test]
fn nanosecond_mtime_produces_the_exact_pax_record() {
    let mut entry = simple_entry("a", 0, 0);
    entry.mtime = Some(Timespec {
        secs: 1000,
        nanos: 123_456_789,
    });

    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut out).unwrap();
        write_entry_with_data(&mut writer, &entry, b"").unwrap();
        writer.close().unwrap();
    }

    // the extension header's body must contain the strict length-counted
    // record, byte for byte
    let needle = b"24 mtime=1000.123456789\n";
    assert!(
        out.windows(needle.len()).any(|w| w == needle),
        "pax record missing from archive"
    );

    let entries = read_all(&out);
    assert_eq!(entries[0].0.mtime.unwrap().nanos, 123_456_789);
}

#[test_log::test]
fn gnu_sparse_1_0_reports_holes() {
    // hand-built: pax header with the GNU.sparse keys, a data header whose
    // body starts with the ASCII map block, then the two 100-byte extents
    let mut pax_body = Vec::new();
    for (k, v) in [
        ("GNU.sparse.major", "1"),
        ("GNU.sparse.minor", "0"),
        ("GNU.sparse.name", "sparsefile"),
        ("GNU.sparse.realsize", "10000"),
    ] {
        pax_body.extend_from_slice(&polyarc_sync::polyarc::parse::pax::format_record(
            k,
            v.as_bytes(),
        ));
    }

    let mut archive = Vec::new();

    let mut pax_entry = simple_entry("sparsefile", 0, 0);
    pax_entry.set_pathname("sparsefile");
    archive.extend_from_slice(&tarw::pax_pseudo_header(&pax_entry, pax_body.len()));
    archive.extend_from_slice(&pax_body);
    archive.extend_from_slice(&vec![0u8; tarw::padding_for(pax_body.len() as u64)]);

    let map = b"2\n0\n100\n9900\n100\n";
    let mut map_block = [0u8; BLOCK_SIZE];
    map_block[..map.len()].copy_from_slice(map);

    // body: one map block + 200 data bytes
    let body_size = (BLOCK_SIZE + 200) as u64;
    let data_entry = simple_entry("GNUSparseFile.0/sparsefile", body_size, 0);
    archive.extend_from_slice(&tarw::ustar_header(&data_entry));
    archive.extend_from_slice(&map_block);
    archive.extend_from_slice(&[b'A'; 100]);
    archive.extend_from_slice(&[b'B'; 100]);
    archive.extend_from_slice(&vec![0u8; tarw::padding_for(body_size)]);
    archive.extend_from_slice(&tarw::end_of_archive());

    let mut reader = ReadBuilder::new().open(&archive[..]).unwrap();
    let entry = reader.next_header().unwrap().unwrap();
    assert_eq!(entry.pathname(), "sparsefile");
    assert_eq!(entry.size, Some(10000));
    assert_eq!(entry.sparse.len(), 2);

    // collect data chunks by offset; the holes never surface
    let mut chunks: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
    let mut pos = 0u64;
    let mut current_start = None;
    while let Some((chunk, offset)) = reader.read_data_block().unwrap() {
        if current_start.is_none() || offset != pos {
            current_start = Some(offset);
            pos = offset;
        }
        chunks
            .entry(current_start.unwrap())
            .or_default()
            .extend_from_slice(chunk);
        pos += chunk.len() as u64;
    }

    // merge adjacency bookkeeping: regions must be exactly (0,100) A's and
    // (9900,100) B's
    let first = chunks.get(&0).expect("data at offset 0");
    assert_eq!(first.len(), 100);
    assert!(first.iter().all(|&b| b == b'A'));
    let second = chunks.get(&9900).expect("data at offset 9900");
    assert_eq!(second.len(), 100);
    assert!(second.iter().all(|&b| b == b'B'));

    assert!(reader.next_header().unwrap().is_none());
}

#[test_log::test]
fn hardlink_resolver_gnu_strategy_roundtrip() {
    let mut resolver = LinkResolver::new();

    let mk = |path: &str| {
        let mut e = simple_entry(path, 4, 0);
        e.nlink = Some(2);
        e.dev = Some((1, 0));
        e.ino = Some(42);
        Box::new(e)
    };

    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut out).unwrap();
        for path in ["A", "B"] {
            match resolver.apply(mk(path)) {
                Resolved::Write(e) => write_entry_with_data(&mut writer, &e, b"data").unwrap(),
                Resolved::WriteLink(e) => write_entry_with_data(&mut writer, &e, b"").unwrap(),
                Resolved::Deferred => unreachable!("first-wins never defers"),
            }
        }
        writer.close().unwrap();
    }

    let entries = read_all(&out);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0.pathname(), "A");
    assert_eq!(entries[0].1, b"data");
    assert!(entries[0].0.hardlink.is_none());

    assert_eq!(entries[1].0.pathname(), "B");
    assert_eq!(
        entries[1].0.hardlink.as_ref().unwrap().to_string_lossy(),
        "A"
    );
    assert_eq!(entries[1].0.size, Some(0));
}

#[test_log::test]
fn long_names_split_or_use_pax() {
    let deep = format!("{}/file.txt", "d".repeat(120));
    let unsplittable = "x".repeat(150);

    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut out).unwrap();
        write_entry_with_data(&mut writer, &simple_entry(&deep, 2, 1), b"ok").unwrap();
        write_entry_with_data(&mut writer, &simple_entry(&unsplittable, 2, 1), b"ok").unwrap();
        writer.close().unwrap();
    }

    let entries = read_all(&out);
    assert_eq!(entries[0].0.pathname(), deep);
    assert_eq!(entries[1].0.pathname(), unsplittable);
}

#[test_log::test]
fn xattrs_and_owners_roundtrip() {
    let mut entry = simple_entry("attrs", 3, 55);
    entry.uid = Some(1000);
    entry.gid = Some(1000);
    entry.uname = Some("jane".into());
    entry.gname = Some("users".into());
    entry.xattrs.push(Xattr {
        name: "user.test".to_string(),
        value: vec![1, 2, 3, 0, 255],
    });

    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut out).unwrap();
        write_entry_with_data(&mut writer, &entry, b"abc").unwrap();
        writer.close().unwrap();
    }

    let entries = read_all(&out);
    let back = &entries[0].0;
    assert_eq!(back.uid, Some(1000));
    assert_eq!(back.uname.as_ref().unwrap().to_string_lossy(), "jane");
    // both the SCHILY and LIBARCHIVE spellings decode to the same attr
    assert!(back
        .xattrs
        .iter()
        .any(|x| x.name == "user.test" && x.value == vec![1, 2, 3, 0, 255]));
}

#[test_log::test]
fn acls_roundtrip_through_pax_records() {
    let mut entry = simple_entry("acled", 3, 55);
    entry
        .acl
        .parse_posix_text(
            "user::rw-,user:jane:r--,group::r--,mask::rw-,other::---",
            AclType::Access,
        )
        .unwrap();
    entry.acl.add(AclEntry {
        kind: AclType::Default,
        perms: AclPerms::READ | AclPerms::WRITE | AclPerms::EXECUTE,
        tag: AclTag::UserObj,
        id: None,
        name: None,
    });

    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut out).unwrap();
        write_entry_with_data(&mut writer, &entry, b"abc").unwrap();
        writer.close().unwrap();
    }

    let entries = read_all(&out);
    let back = &entries[0].0;
    assert_eq!(back.acl.len(), 6);

    // the named-user access entry keeps its qualifier and permset
    assert!(back.acl.iter().any(|e| e.kind == AclType::Access
        && e.tag == AclTag::User
        && e.name.as_deref() == Some("jane")
        && e.perms.contains(AclPerms::READ)
        && !e.perms.contains(AclPerms::WRITE)));

    // the default ACL came back on its own record
    assert!(back
        .acl
        .iter()
        .any(|e| e.kind == AclType::Default
            && e.tag == AclTag::UserObj
            && e.perms.contains(AclPerms::EXECUTE)));
}

#[test_log::test]
fn symlinks_roundtrip() {
    let mut entry = simple_entry("link", 0, 9);
    entry.filetype = FileType::Symlink;
    entry.symlink = Some("target/elsewhere".into());

    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut out).unwrap();
        write_entry_with_data(&mut writer, &entry, b"").unwrap();
        writer.close().unwrap();
    }

    let entries = read_all(&out);
    assert_eq!(entries[0].0.filetype, FileType::Symlink);
    assert_eq!(
        entries[0].0.symlink.as_ref().unwrap().to_string_lossy(),
        "target/elsewhere"
    );
}

#[test_log::test]
fn data_sums_match_declared_sizes() {
    // the sum of delivered bytes equals the sum of declared sizes
    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut out).unwrap();
        write_entry_with_data(&mut writer, &simple_entry("one", 3, 0), b"abc").unwrap();
        write_entry_with_data(&mut writer, &simple_entry("two", 600, 0), &[7u8; 600]).unwrap();
        writer.close().unwrap();
    }

    let mut reader = ReadBuilder::new().open(&out[..]).unwrap();
    let mut declared = 0u64;
    let mut delivered = 0u64;
    while let Some(entry) = reader.next_header().unwrap() {
        declared += entry.size.unwrap_or(0);
        while let Some((chunk, _)) = reader.read_data_block().unwrap() {
            delivered += chunk.len() as u64;
        }
    }
    assert_eq!(declared, 603);
    assert_eq!(delivered, declared);
}

#[test_log::test]
fn concatenated_archives_option() {
    let mut first = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut first).unwrap();
        write_entry_with_data(&mut writer, &simple_entry("one", 1, 0), b"1").unwrap();
        writer.close().unwrap();
    }
    let mut second = Vec::new();
    {
        let mut writer = WriteBuilder::new().open(&mut second).unwrap();
        write_entry_with_data(&mut writer, &simple_entry("two", 1, 0), b"2").unwrap();
        writer.close().unwrap();
    }
    let joined: Vec<u8> = [first.clone(), second].concat();

    // without the option, reading stops at the first end-of-archive
    let entries = read_all(&joined);
    assert_eq!(entries.len(), 1);

    let mut builder = ReadBuilder::new();
    assert!(builder.set_option("read", "read_concatenated_archives", "1"));
    let mut reader = builder.open(&joined[..]).unwrap();
    let mut names = Vec::new();
    while let Some(entry) = reader.next_header().unwrap() {
        names.push(entry.pathname());
        reader.read_data_skip().unwrap();
    }
    assert_eq!(names, vec!["one", "two"]);
}
