use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use polyarc_sync::polyarc::{
    entry::{Entry, FileType, Timespec},
    filter::FilterCode,
    format::FormatCode,
};
use polyarc_sync::{write::write_entry_with_data, ReadBuilder, WriteBuilder};

fn sample_tar() -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = WriteBuilder::new().open(&mut out).unwrap();
    let mut entry = Entry::new();
    entry.set_pathname("payload.txt");
    entry.filetype = FileType::Regular;
    entry.mode = Some(0o644);
    entry.size = Some(11);
    entry.mtime = Some(Timespec::from_secs(7));
    write_entry_with_data(&mut writer, &entry, b"hello world").unwrap();
    writer.close().unwrap();
    drop(writer);
    out
}

fn assert_reads_payload(bytes: &[u8], expected_filters: &[FilterCode]) {
    let mut reader = ReadBuilder::new().open(bytes).unwrap();
    let entry = reader.next_header().unwrap().unwrap();
    assert_eq!(entry.pathname(), "payload.txt");

    let mut data = Vec::new();
    while let Some((chunk, _)) = reader.read_data_block().unwrap() {
        data.extend_from_slice(chunk);
    }
    assert_eq!(data, b"hello world");
    assert_eq!(reader.filters(), expected_filters);

    assert!(reader.next_header().unwrap().is_none());
    // a finished stream stays finished
    assert!(reader.read_data_block().unwrap().is_none());
}

#[test_log::test]
fn plain_tar_uses_the_identity_filter() {
    assert_reads_payload(&sample_tar(), &[FilterCode::None]);
}

#[test_log::test]
fn tar_gz_roundtrip() {
    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new()
            .add_filter(FilterCode::Gzip)
            .open(&mut out)
            .unwrap();
        let mut entry = Entry::new();
        entry.set_pathname("payload.txt");
        entry.filetype = FileType::Regular;
        entry.size = Some(11);
        write_entry_with_data(&mut writer, &entry, b"hello world").unwrap();
        writer.close().unwrap();
    }
    assert_reads_payload(&out, &[FilterCode::Gzip]);
}

#[test_log::test]
fn write_filters_roundtrip() {
    for code in [
        FilterCode::Gzip,
        FilterCode::Bzip2,
        FilterCode::Zstd,
        FilterCode::Lz4,
    ] {
        let mut out = Vec::new();
        {
            let mut writer = WriteBuilder::new()
                .add_filter(code)
                .open(&mut out)
                .unwrap();
            let mut entry = Entry::new();
            entry.set_pathname("payload.txt");
            entry.filetype = FileType::Regular;
            entry.size = Some(11);
            write_entry_with_data(&mut writer, &entry, b"hello world").unwrap();
            writer.close().unwrap();
        }
        assert_reads_payload(&out, &[code]);
    }
}

#[test_log::test]
fn compression_name_reports_the_head_filter() {
    let mut out = Vec::new();
    {
        let mut writer = WriteBuilder::new()
            .add_filter(FilterCode::Zstd)
            .open(&mut out)
            .unwrap();
        let mut entry = Entry::new();
        entry.set_pathname("x");
        entry.filetype = FileType::Regular;
        entry.size = Some(1);
        write_entry_with_data(&mut writer, &entry, b"x").unwrap();
        writer.close().unwrap();
    }
    let reader = ReadBuilder::new().open(&out[..]).unwrap();
    assert_eq!(reader.compression_name(), "zstd");
}

#[test_log::test]
fn rpm_envelope_is_stripped_and_indexed() {
    // lead + empty signature header + minimal main header, then a tar
    let mut rpm = Vec::new();
    let mut lead = vec![0u8; 96];
    lead[..4].copy_from_slice(&[0xED, 0xAB, 0xEE, 0xDB]);
    lead[4] = 3;
    rpm.extend_from_slice(&lead);

    let header_magic: [u8; 8] = [0x8E, 0xAD, 0xE8, 0x01, 0x00, 0x00, 0x00, 0x00];

    // signature header: no entries, no data
    rpm.extend_from_slice(&header_magic);
    rpm.write_u32::<BigEndian>(0).unwrap();
    rpm.write_u32::<BigEndian>(0).unwrap();
    rpm.extend_from_slice(&[0, 0, 0, 0]);

    // main header: one old-style filename
    let data = b"/usr/bin/payload\0";
    rpm.extend_from_slice(&header_magic);
    rpm.write_u32::<BigEndian>(1).unwrap();
    rpm.write_u32::<BigEndian>(data.len() as u32).unwrap();
    rpm.write_u32::<BigEndian>(1027).unwrap(); // oldfilenames
    rpm.write_u32::<BigEndian>(8).unwrap(); // string array
    rpm.write_u32::<BigEndian>(0).unwrap();
    rpm.write_u32::<BigEndian>(1).unwrap();
    rpm.extend_from_slice(data);

    rpm.extend_from_slice(&sample_tar());

    let mut reader = ReadBuilder::new().open(&rpm[..]).unwrap();
    assert_eq!(reader.filters(), &[FilterCode::Rpm]);

    let entry = reader.next_header().unwrap().unwrap();
    assert_eq!(entry.pathname(), "payload.txt");
    assert_eq!(reader.format(), Some(FormatCode::Ustar));

    let index = reader.rpm_index().expect("rpm index published");
    assert_eq!(index.files.len(), 1);
    assert_eq!(index.files[0].path, "/usr/bin/payload");
}

#[test_log::test]
fn android_backup_wrapper() {
    let mut stream = Vec::new();
    stream.extend_from_slice(b"ANDROID BACKUP\n1\n1\nnone\n");
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(&sample_tar()).unwrap();
    stream.extend_from_slice(&enc.finish().unwrap());

    assert_reads_payload(&stream, &[FilterCode::AndroidBackup]);
}

#[test_log::test]
fn pbzx_wrapper() {
    let tar = sample_tar();
    let mut stream = Vec::new();
    stream.extend_from_slice(b"pbzx");
    stream.write_u64::<BigEndian>(1 << 24).unwrap();
    // single stored chunk holding the whole tar
    stream.write_u64::<BigEndian>(tar.len() as u64).unwrap();
    stream.write_u64::<BigEndian>(tar.len() as u64).unwrap();
    stream.extend_from_slice(&tar);

    assert_reads_payload(&stream, &[FilterCode::Pbzx]);
}

#[test_log::test]
fn uuencoded_gzip_tar_unwraps_twice() {
    let mut gz = Vec::new();
    {
        let mut enc = flate2::write::GzEncoder::new(&mut gz, flate2::Compression::default());
        enc.write_all(&sample_tar()).unwrap();
        enc.finish().unwrap();
    }

    let mut text = Vec::new();
    text.extend_from_slice(b"begin 644 payload.tar.gz\n");
    for chunk in gz.chunks(45) {
        text.push(b' ' + chunk.len() as u8);
        let mut padded = chunk.to_vec();
        while padded.len() % 3 != 0 {
            padded.push(0);
        }
        for triple in padded.chunks(3) {
            let v = (triple[0] as u32) << 16 | (triple[1] as u32) << 8 | triple[2] as u32;
            for shift in [18, 12, 6, 0] {
                let c = ((v >> shift) & 0x3F) as u8;
                text.push(if c == 0 { b'`' } else { b' ' + c });
            }
        }
        text.push(b'\n');
    }
    text.extend_from_slice(b"`\nend\n");

    assert_reads_payload(&text, &[FilterCode::Uu, FilterCode::Gzip]);
}

#[test_log::test]
fn noise_is_not_an_archive() {
    let noise = b"this is just some text, definitely not an archive";
    let mut reader = ReadBuilder::new().open(&noise[..]).unwrap();
    assert!(reader.next_header().is_err());
}
