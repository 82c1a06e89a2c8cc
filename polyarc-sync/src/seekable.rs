//! Seekable zip reading: locate the end-of-central-directory, parse the
//! whole central directory, then read entries by their recorded offsets.
//! Authoritative when it is available; the streaming path in
//! [crate::read] is for pipes.

use std::io::{Read, Seek, SeekFrom};

use polyarc::{
    fsm::{
        zip::{ArchiveFsm, EntryFsm},
        FsmResult,
    },
    parse::zip::{ZipArchive, ZipEntry},
    Error,
};

/// Extension trait: any `Read + Seek` can be opened as a zip archive.
pub trait ReadZip: Read + Seek {
    /// Parse the central directory into a [ZipArchive].
    fn read_zip(&mut self) -> Result<ZipArchive, Error> {
        let size = self.seek(SeekFrom::End(0))?;
        let mut fsm = ArchiveFsm::new(size);

        loop {
            if let Some(offset) = fsm.wants_read() {
                self.seek(SeekFrom::Start(offset))?;
                let space = fsm.space();
                let n = self.read(space)?;
                if n == 0 {
                    return Err(Error::IO(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "truncated zip file",
                    )));
                }
                fsm.fill(n);
            }

            match fsm.process()? {
                FsmResult::Continue(next) => fsm = next,
                FsmResult::Done(archive) => return Ok(archive),
            }
        }
    }

    /// Read one entry's decompressed data by seeking to its local header.
    fn read_zip_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>, Error> {
        self.read_zip_entry_with(entry, None)
    }

    /// Like [Self::read_zip_entry], with a password for encrypted entries.
    fn read_zip_entry_with(
        &mut self,
        entry: &ZipEntry,
        password: Option<&[u8]>,
    ) -> Result<Vec<u8>, Error> {
        self.seek(SeekFrom::Start(entry.header_offset))?;

        let mut fsm = EntryFsm::new(password.map(|p| p.to_vec()), None);
        let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
        let mut chunk = vec![0u8; 64 * 1024];

        loop {
            if fsm.wants_read() {
                let space = fsm.space();
                let n = self.read(space)?;
                fsm.fill(n);
            }
            match fsm.process(&mut chunk)? {
                FsmResult::Continue((next, outcome)) => {
                    out.extend_from_slice(&chunk[..outcome.bytes_written]);
                    fsm = next;
                }
                FsmResult::Done((_, _, verdict)) => {
                    if let Some(err) = verdict {
                        return Err(err);
                    }
                    return Ok(out);
                }
            }
        }
    }
}

impl<R: Read + Seek> ReadZip for R {}
