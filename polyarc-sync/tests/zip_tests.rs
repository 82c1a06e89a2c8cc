use std::io::Cursor;

use byteorder::{LittleEndian, WriteBytesExt};
use polyarc_sync::polyarc::{
    entry::{Entry, FileType, Timespec},
    error::FormatError,
    format::FormatCode,
    parse::zip::{LocalFileHeaderRecord, Method},
    Error, Severity,
};
use polyarc_sync::{write::write_entry_with_data, ArchiveReader, ReadBuilder, ReadZip, WriteBuilder};
use winnow::{Parser, Partial};

fn file_entry(path: &str, size: u64) -> Entry {
    let mut e = Entry::new();
    e.set_pathname(path);
    e.filetype = FileType::Regular;
    e.mode = Some(0o644);
    e.size = Some(size);
    e.mtime = Some(Timespec::from_secs(1_344_609_212));
    e
}

fn write_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = WriteBuilder::new()
        .format(FormatCode::Zip)
        .open(&mut out)
        .unwrap();
    for (path, data) in entries {
        write_entry_with_data(&mut writer, &file_entry(path, data.len() as u64), data).unwrap();
    }
    writer.close().unwrap();
    drop(writer);
    out
}

#[test_log::test]
fn streaming_roundtrip_with_deflate() {
    let body = b"Oh no, you found me\n".repeat(500);
    let bytes = write_zip(&[("found-me.txt", &body), ("empty", b"")]);

    let mut reader = ReadBuilder::new().open(&bytes[..]).unwrap();

    let entry = reader.next_header().unwrap().unwrap();
    assert_eq!(entry.pathname(), "found-me.txt");
    // length-at-end: the size is unknown until the data has been read
    assert_eq!(entry.size, None);

    let mut data = Vec::new();
    while let Some((chunk, _)) = reader.read_data_block().unwrap() {
        data.extend_from_slice(chunk);
    }
    assert_eq!(data, body);

    // after the descriptor, the resolved size is visible
    assert_eq!(reader.entry().unwrap().size, Some(body.len() as u64));

    let entry = reader.next_header().unwrap().unwrap();
    assert_eq!(entry.pathname(), "empty");
    reader.read_data_skip().unwrap();

    assert!(reader.next_header().unwrap().is_none());
    assert_eq!(reader.format(), Some(FormatCode::Zip));
}

#[test_log::test]
fn seekable_read_uses_the_central_directory() {
    let body = b"central directory authority".to_vec();
    let bytes = write_zip(&[("a.txt", &body), ("b.txt", b"second")]);

    let mut cursor = Cursor::new(&bytes);
    let archive = cursor.read_zip().unwrap();
    assert_eq!(archive.entries().count(), 2);

    let entry = archive.by_name("a.txt").unwrap();
    assert_eq!(entry.entry.size, Some(body.len() as u64));
    let data = cursor.read_zip_entry(entry).unwrap();
    assert_eq!(data, body);

    let entry = archive.by_name("b.txt").unwrap();
    assert_eq!(cursor.read_zip_entry(entry).unwrap(), b"second");
}

#[test_log::test]
fn stored_entries_with_known_sizes_write_real_lfh_fields() {
    let mut out = Vec::new();
    let mut writer = WriteBuilder::new()
        .format(FormatCode::Zip)
        .zip_method(Method::Store)
        .open(&mut out)
        .unwrap();
    write_entry_with_data(&mut writer, &file_entry("f", 6), b"abcdef").unwrap();
    writer.close().unwrap();
    drop(writer);

    let mut input = Partial::new(&out[..]);
    let lfh = LocalFileHeaderRecord::parser.parse_next(&mut input).unwrap();
    assert_eq!(lfh.method, Method::Store);
    assert!(!lfh.has_data_descriptor());
    assert_eq!(lfh.compressed_size, 6);
    assert_eq!(lfh.compressed_size, lfh.uncompressed_size);
    assert_eq!(lfh.crc32, crc32fast::hash(b"abcdef"));
}

#[test_log::test]
fn directories_survive_the_roundtrip() {
    let mut out = Vec::new();
    let mut writer = WriteBuilder::new()
        .format(FormatCode::Zip)
        .open(&mut out)
        .unwrap();
    let mut dir = Entry::new();
    dir.set_pathname("some/dir");
    dir.filetype = FileType::Directory;
    dir.mode = Some(0o755);
    write_entry_with_data(&mut writer, &dir, b"").unwrap();
    write_entry_with_data(&mut writer, &file_entry("some/dir/file", 2), b"hi").unwrap();
    writer.close().unwrap();
    drop(writer);

    let mut cursor = Cursor::new(&out);
    let archive = cursor.read_zip().unwrap();
    let dir = archive.by_name("some/dir/").unwrap();
    assert_eq!(dir.entry.filetype, FileType::Directory);
    assert_eq!(dir.entry.mode, Some(0o755));
}

#[test_log::test]
fn non_ascii_names_get_the_utf8_flag_and_unicode_extra() {
    let bytes = write_zip(&[("世界.txt", b"hello")]);

    let mut input = Partial::new(&bytes[..]);
    let lfh = LocalFileHeaderRecord::parser.parse_next(&mut input).unwrap();
    assert_ne!(lfh.flags & LocalFileHeaderRecord::FLAG_UTF8, 0);

    let entries = {
        let mut reader = ReadBuilder::new().open(&bytes[..]).unwrap();
        let entry = reader.next_header().unwrap().unwrap().clone();
        reader.read_data_skip().unwrap();
        entry
    };
    assert_eq!(entries.pathname(), "世界.txt");
}

#[test_log::test]
fn empty_zip_has_no_entries() {
    let bytes = write_zip(&[]);
    let mut reader = ReadBuilder::new().open(&bytes[..]).unwrap();
    assert!(reader.next_header().unwrap().is_none());

    let mut cursor = Cursor::new(&bytes);
    let archive = cursor.read_zip().unwrap();
    assert_eq!(archive.entries().count(), 0);
}

#[test_log::test]
fn mtime_survives_through_the_extended_timestamp() {
    let bytes = write_zip(&[("t", b"x")]);
    let mut cursor = Cursor::new(&bytes);
    let archive = cursor.read_zip().unwrap();
    let entry = archive.by_name("t").unwrap();
    assert_eq!(entry.entry.mtime.unwrap().secs, 1_344_609_212);
}

// ---- encrypted entries ----
//
// The writer has no encryption support, so these fixtures are built by
// hand from the wire format: a raw local file header, then the encryption
// prelude and ciphertext.

fn raw_local_header(
    name: &[u8],
    method: u16,
    flags: u16,
    crc32: u32,
    compressed: u32,
    uncompressed: u32,
    extra: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"PK\x03\x04");
    out.write_u16::<LittleEndian>(20).unwrap(); // version needed
    out.write_u16::<LittleEndian>(flags).unwrap();
    out.write_u16::<LittleEndian>(method).unwrap();
    out.write_u16::<LittleEndian>(0x6000).unwrap(); // dos time
    out.write_u16::<LittleEndian>(0x2921).unwrap(); // dos date
    out.write_u32::<LittleEndian>(crc32).unwrap();
    out.write_u32::<LittleEndian>(compressed).unwrap();
    out.write_u32::<LittleEndian>(uncompressed).unwrap();
    out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
    out.write_u16::<LittleEndian>(extra.len() as u16).unwrap();
    out.extend_from_slice(name);
    out.extend_from_slice(extra);
    out
}

/// Encrypt-side mirror of the traditional PKWARE cipher.
struct ZipCryptoEnc {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl ZipCryptoEnc {
    fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            k0: 0x1234_5678,
            k1: 0x2345_6789,
            k2: 0x3456_7890,
        };
        for &b in password {
            keys.update(b);
        }
        keys
    }

    fn crc32_byte(crc: u32, b: u8) -> u32 {
        let mut c = (crc ^ b as u32) & 0xff;
        for _ in 0..8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
        }
        c ^ (crc >> 8)
    }

    fn update(&mut self, b: u8) {
        self.k0 = Self::crc32_byte(self.k0, b);
        self.k1 = self
            .k1
            .wrapping_add(self.k0 & 0xff)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.k2 = Self::crc32_byte(self.k2, (self.k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.k2 | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    fn encrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            let cipher = *b ^ self.stream_byte();
            self.update(*b);
            *b = cipher;
        }
    }
}

fn read_until_error(reader: &mut ArchiveReader<'_>) -> Error {
    loop {
        match reader.read_data_block() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("expected an error before entry end"),
            Err(e) => return e,
        }
    }
}

#[test_log::test]
fn zipcrypto_entry_decrypts_with_the_right_password() {
    let plain = b"attack at noon, bring snacks";
    let crc = crc32fast::hash(plain);

    // 12-byte encryption header; sizes are in the header here, so the
    // check byte is the CRC's high byte
    let mut body = Vec::new();
    let mut prelude = *b"\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x00";
    prelude[11] = (crc >> 24) as u8;
    body.extend_from_slice(&prelude);
    body.extend_from_slice(plain);
    ZipCryptoEnc::new(b"s3same").encrypt(&mut body);

    let mut bytes = raw_local_header(
        b"noon.txt",
        0, // stored
        LocalFileHeaderRecord::FLAG_ENCRYPTED,
        crc,
        body.len() as u32,
        plain.len() as u32,
        &[],
    );
    bytes.extend_from_slice(&body);

    // right password: the plaintext comes out and the CRC checks
    let mut reader = ReadBuilder::new()
        .passphrase("s3same")
        .open(&bytes[..])
        .unwrap();
    let entry = reader.next_header().unwrap().unwrap();
    assert!(entry.data_encrypted);
    let mut data = Vec::new();
    while let Some((chunk, _)) = reader.read_data_block().unwrap() {
        data.extend_from_slice(chunk);
    }
    assert_eq!(data, plain);
    assert!(reader.next_header().unwrap().is_none());

    // wrong password: a warning-grade error, not a poisoned handle
    let mut reader = ReadBuilder::new()
        .passphrase("guess")
        .open(&bytes[..])
        .unwrap();
    reader.next_header().unwrap().unwrap();
    let err = read_until_error(&mut reader);
    assert!(matches!(err, Error::Password), "{err}");
    assert_eq!(err.severity(), Severity::Warn);
}

fn aes_entry_fixture(password: &[u8], plain: &[u8]) -> Vec<u8> {
    use ctr::cipher::{KeyIvInit, StreamCipher};
    use hmac::{Hmac, Mac};
    use sha1::Sha1;

    let salt = [0x5Au8; 16];
    let mut derived = [0u8; 66];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, &salt, 1000, &mut derived);

    let mut ciphertext = plain.to_vec();
    let mut iv = [0u8; 16];
    iv[0] = 1;
    ctr::Ctr128LE::<aes::Aes256>::new_from_slices(&derived[..32], &iv)
        .unwrap()
        .apply_keystream(&mut ciphertext);

    let mut mac = Hmac::<Sha1>::new_from_slice(&derived[32..64]).unwrap();
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut body = Vec::new();
    body.extend_from_slice(&salt);
    body.extend_from_slice(&derived[64..66]);
    body.extend_from_slice(&ciphertext);
    body.extend_from_slice(&tag[..10]);

    // 0x9901: AE-2, vendor "AE", AES-256, real method stored
    let mut extra = Vec::new();
    extra.write_u16::<LittleEndian>(0x9901).unwrap();
    extra.write_u16::<LittleEndian>(7).unwrap();
    extra.write_u16::<LittleEndian>(2).unwrap();
    extra.extend_from_slice(b"AE");
    extra.push(3);
    extra.write_u16::<LittleEndian>(0).unwrap();

    let mut bytes = raw_local_header(
        b"vault.bin",
        99, // AES wrapper
        LocalFileHeaderRecord::FLAG_ENCRYPTED,
        0, // AE-2 zeroes the CRC; the HMAC vouches for the data
        body.len() as u32,
        plain.len() as u32,
        &extra,
    );
    bytes.extend_from_slice(&body);
    bytes
}

#[test_log::test]
fn aes_entry_decrypts_and_authenticates() {
    let plain = b"sixteen candles and then some";
    let bytes = aes_entry_fixture(b"hunter2", plain);

    let mut reader = ReadBuilder::new()
        .passphrase("hunter2")
        .open(&bytes[..])
        .unwrap();
    let entry = reader.next_header().unwrap().unwrap();
    assert!(entry.data_encrypted);
    assert_eq!(entry.size, Some(plain.len() as u64));
    let mut data = Vec::new();
    while let Some((chunk, _)) = reader.read_data_block().unwrap() {
        data.extend_from_slice(chunk);
    }
    assert_eq!(data, plain);
    assert!(reader.next_header().unwrap().is_none());

    // the verification pair rejects a wrong password before any data flows
    let mut reader = ReadBuilder::new()
        .passphrase("hunter3")
        .open(&bytes[..])
        .unwrap();
    reader.next_header().unwrap().unwrap();
    let err = read_until_error(&mut reader);
    assert!(matches!(err, Error::Password), "{err}");
}

#[test_log::test]
fn stray_descriptor_signatures_exhaust_retries() {
    // a stored length-at-end body that is nothing but lying descriptor
    // candidates: every signature's size field disagrees with the byte
    // count, so each is rejected until the reader gives up
    let mut body = Vec::new();
    for _ in 0..4 {
        body.extend_from_slice(b"PK\x07\x08");
        body.extend_from_slice(b"ZZZZZZZZZZZZ");
    }

    let mut bytes = raw_local_header(
        b"liar",
        0,
        LocalFileHeaderRecord::FLAG_LENGTH_AT_END,
        0,
        0,
        0,
        &[],
    );
    bytes.extend_from_slice(&body);

    let mut reader = ReadBuilder::new().open(&bytes[..]).unwrap();
    reader.next_header().unwrap().unwrap();
    let err = read_until_error(&mut reader);
    assert!(matches!(
        err,
        Error::Format(FormatError::DescriptorRetriesExhausted)
    ));
    assert_eq!(err.severity(), Severity::Retry);
}
