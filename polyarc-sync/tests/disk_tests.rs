#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;

use polyarc_sync::polyarc::{
    entry::{Entry, FileType, Timespec},
    write::tar as tarw,
    Severity,
};
use polyarc_sync::{write::write_entry_with_data, DiskWriter, ExtractFlags, ReadBuilder, WriteBuilder};

fn entry(path: &str, filetype: FileType) -> Entry {
    let mut e = Entry::new();
    e.set_pathname(path);
    e.filetype = filetype;
    e.mode = Some(match filetype {
        FileType::Directory => 0o755,
        _ => 0o644,
    });
    e.mtime = Some(Timespec::from_secs(1_000_000));
    e
}

fn archive(entries: &[(Entry, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = WriteBuilder::new().open(&mut out).unwrap();
    for (e, data) in entries {
        write_entry_with_data(&mut writer, e, data).unwrap();
    }
    writer.close().unwrap();
    drop(writer);
    out
}

fn extract_all(bytes: &[u8], dest: &std::path::Path, flags: ExtractFlags) -> Vec<String> {
    let mut reader = ReadBuilder::new().open(bytes).unwrap();
    let mut disk = DiskWriter::with_flags(dest, flags);
    let mut failures = Vec::new();
    while let Some(_) = reader.next_header().unwrap() {
        match disk.extract_entry(&mut reader) {
            Ok(()) => {}
            Err(e) if e.severity() < Severity::Fatal => failures.push(e.to_string()),
            Err(e) => panic!("fatal extraction error: {e}"),
        }
    }
    disk.finish().unwrap();
    failures
}

#[test_log::test]
fn extracts_files_dirs_and_symlinks() {
    let dir = tempfile::tempdir().unwrap();

    let mut sym = entry("work/link", FileType::Symlink);
    sym.symlink = Some("file.txt".into());

    let mut file = entry("work/file.txt", FileType::Regular);
    file.size = Some(5);

    let bytes = archive(&[
        (entry("work", FileType::Directory), b""),
        (file, b"hello"),
        (sym, b""),
    ]);

    let failures = extract_all(&bytes, dir.path(), ExtractFlags::default());
    assert!(failures.is_empty(), "{failures:?}");

    let file_path = dir.path().join("work/file.txt");
    assert_eq!(fs::read(&file_path).unwrap(), b"hello");
    assert_eq!(
        fs::metadata(&file_path).unwrap().permissions().mode() & 0o7777,
        0o644
    );

    let link_path = dir.path().join("work/link");
    let target = fs::read_link(&link_path).unwrap();
    assert_eq!(target.to_str().unwrap(), "file.txt");

    // directory fixup applied its mtime at finish
    let meta = fs::metadata(dir.path().join("work")).unwrap();
    use std::os::unix::fs::MetadataExt;
    assert_eq!(meta.mtime(), 1_000_000);
}

#[test_log::test]
fn dotdot_entries_never_escape() {
    let dir = tempfile::tempdir().unwrap();
    let outside = dir.path().join("outside");
    let inside = dir.path().join("inside");
    fs::create_dir_all(&inside).unwrap();

    let mut evil = entry("../outside/evil.txt", FileType::Regular);
    evil.size = Some(4);
    let bytes = archive(&[(evil, b"evil")]);

    let failures = extract_all(&bytes, &inside, ExtractFlags::default());
    assert_eq!(failures.len(), 1, "the traversal entry must fail");

    // nothing was written outside the destination
    assert!(!outside.exists());
    assert!(fs::read_dir(&inside).unwrap().next().is_none());
}

#[test_log::test]
fn symlinked_intermediate_directories_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("dest");
    fs::create_dir_all(&dest).unwrap();

    // first entry plants a symlink, second tries to write through it
    let mut link = entry("leg", FileType::Symlink);
    link.symlink = Some("/tmp".into());
    let mut through = entry("leg/owned.txt", FileType::Regular);
    through.size = Some(2);
    let bytes = archive(&[(link, b""), (through, b"hi")]);

    let failures = extract_all(&bytes, &dest, ExtractFlags::default());
    assert_eq!(failures.len(), 1);
    assert!(!std::path::Path::new("/tmp/owned.txt").exists());
}

#[test_log::test]
fn sparse_files_extract_with_holes() {
    let dir = tempfile::tempdir().unwrap();

    // craft a GNU 1.0 sparse entry: 100 data bytes at 0 and at 9900 of a
    // 10000-byte file
    let mut pax_body = Vec::new();
    for (k, v) in [
        ("GNU.sparse.major", "1"),
        ("GNU.sparse.minor", "0"),
        ("GNU.sparse.name", "sparse.bin"),
        ("GNU.sparse.realsize", "10000"),
    ] {
        pax_body.extend_from_slice(&polyarc_sync::polyarc::parse::pax::format_record(
            k,
            v.as_bytes(),
        ));
    }

    let mut bytes = Vec::new();
    let pax_entry = entry("sparse.bin", FileType::Regular);
    bytes.extend_from_slice(&tarw::pax_pseudo_header(&pax_entry, pax_body.len()));
    bytes.extend_from_slice(&pax_body);
    bytes.extend_from_slice(&vec![0u8; tarw::padding_for(pax_body.len() as u64)]);

    let map = b"2\n0\n100\n9900\n100\n";
    let mut map_block = [0u8; 512];
    map_block[..map.len()].copy_from_slice(map);

    let body_size = (512 + 200) as u64;
    let mut data_entry = entry("GNUSparseFile.0/sparse.bin", FileType::Regular);
    data_entry.size = Some(body_size);
    bytes.extend_from_slice(&tarw::ustar_header(&data_entry));
    bytes.extend_from_slice(&map_block);
    bytes.extend_from_slice(&[b'A'; 100]);
    bytes.extend_from_slice(&[b'B'; 100]);
    bytes.extend_from_slice(&vec![0u8; tarw::padding_for(body_size)]);
    bytes.extend_from_slice(&tarw::end_of_archive());

    let failures = extract_all(&bytes, dir.path(), ExtractFlags::default());
    assert!(failures.is_empty(), "{failures:?}");

    let content = fs::read(dir.path().join("sparse.bin")).unwrap();
    assert_eq!(content.len(), 10000);
    assert!(content[..100].iter().all(|&b| b == b'A'));
    assert!(content[100..9900].iter().all(|&b| b == 0));
    assert!(content[9900..].iter().all(|&b| b == b'B'));
}

#[test_log::test]
fn forward_referenced_hardlinks_are_deferred() {
    let dir = tempfile::tempdir().unwrap();

    // the link entry arrives before its target exists on disk
    let mut link = entry("late-link", FileType::Regular);
    link.hardlink = Some("target.txt".into());
    link.size = Some(0);
    let mut target = entry("target.txt", FileType::Regular);
    target.size = Some(4);

    let bytes = archive(&[(link, b""), (target, b"body")]);
    let failures = extract_all(&bytes, dir.path(), ExtractFlags::default());
    assert!(failures.is_empty(), "{failures:?}");

    let a = fs::read(dir.path().join("target.txt")).unwrap();
    let b = fs::read(dir.path().join("late-link")).unwrap();
    assert_eq!(a, b"body");
    assert_eq!(a, b);

    use std::os::unix::fs::MetadataExt;
    assert_eq!(
        fs::metadata(dir.path().join("late-link")).unwrap().ino(),
        fs::metadata(dir.path().join("target.txt")).unwrap().ino()
    );
}

#[test_log::test]
fn no_overwrite_refuses_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("keep.txt"), b"original").unwrap();

    let mut e = entry("keep.txt", FileType::Regular);
    e.size = Some(3);
    let bytes = archive(&[(e, b"new")]);

    let flags = ExtractFlags::default() | ExtractFlags::NO_OVERWRITE;
    let failures = extract_all(&bytes, dir.path(), flags);
    assert_eq!(failures.len(), 1);
    assert_eq!(fs::read(dir.path().join("keep.txt")).unwrap(), b"original");
}

#[test_log::test]
fn restrictive_directory_modes_do_not_block_children() {
    let dir = tempfile::tempdir().unwrap();

    let mut ro_dir = entry("ro", FileType::Directory);
    ro_dir.mode = Some(0o500);
    let mut child = entry("ro/child.txt", FileType::Regular);
    child.size = Some(2);

    let bytes = archive(&[(ro_dir, b""), (child, b"ok")]);
    let failures = extract_all(&bytes, dir.path(), ExtractFlags::default());
    assert!(failures.is_empty(), "{failures:?}");

    assert_eq!(fs::read(dir.path().join("ro/child.txt")).unwrap(), b"ok");
    let mode = fs::metadata(dir.path().join("ro"))
        .unwrap()
        .permissions()
        .mode()
        & 0o7777;
    assert_eq!(mode, 0o500);

    // restore permissions so the tempdir can clean up
    fs::set_permissions(
        dir.path().join("ro"),
        fs::Permissions::from_mode(0o755),
    )
    .unwrap();
}
