//! Decoder for ancient unix `compress` (.Z) streams: LZW with 9 to 16 bit
//! codes, LSB-first bit packing, and the block-mode clear code.
//!
//! Two historical quirks matter for compatibility, both inherited from the
//! reference implementation: the decoder's table lags the encoder's by one
//! entry (hence the code-equal-to-next-free case), and the encoder flushed
//! output in groups of eight codes, so at every code-width change or
//! dictionary clear the input position must be resynced to a multiple of
//! `width * 8` bits before the next code.

use std::io::{self, Read};

const CLEAR: u16 = 256;
const FIRST_FREE: u16 = 257;
const MAX_MAX_BITS: u32 = 16;
const INIT_BITS: u32 = 9;

pub struct LzwReader<R> {
    inner: R,

    max_bits: u32,
    block_mode: bool,

    bits: u32,
    /// highest code readable at the current width; at the maximum width
    /// this is one past, so growth never re-triggers
    maxcode: u32,

    /// bit accumulator, LSB-first
    bit_buf: u32,
    bit_count: u32,
    /// absolute bit position in the code stream (after the 3-byte header)
    posbits: u64,

    /// code -> (prefix code, suffix byte); codes below 256 are implicit
    prefixes: Vec<u16>,
    suffixes: Vec<u8>,
    free_ent: u16,

    prev_code: Option<u16>,
    /// first byte of the previously emitted string
    prev_first: u8,

    /// decoded bytes waiting to be served (stored reversed)
    pending: Vec<u8>,

    eof: bool,
}

impl<R: Read> LzwReader<R> {
    /// Consumes and validates the three header bytes.
    pub(crate) fn new(mut inner: R) -> io::Result<Self> {
        let mut header = [0u8; 3];
        inner.read_exact(&mut header)?;
        if header[0] != 0x1F || header[1] != 0x9D {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a compress (.Z) stream",
            ));
        }
        let max_bits = (header[2] & 0x1F) as u32;
        if !(INIT_BITS..=MAX_MAX_BITS).contains(&max_bits) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported compress code width",
            ));
        }
        let block_mode = header[2] & 0x80 != 0;

        let table_size = 1usize << MAX_MAX_BITS;
        Ok(Self {
            inner,
            max_bits,
            block_mode,
            bits: INIT_BITS,
            maxcode: (1 << INIT_BITS) - 1,
            bit_buf: 0,
            bit_count: 0,
            posbits: 0,
            prefixes: vec![0; table_size],
            suffixes: vec![0; table_size],
            free_ent: if block_mode { FIRST_FREE } else { CLEAR },
            prev_code: None,
            prev_first: 0,
            pending: Vec::new(),
            eof: false,
        })
    }

    /// Read the next `self.bits`-wide code, LSB first. `None` at clean EOF.
    fn next_code(&mut self) -> io::Result<Option<u16>> {
        while self.bit_count < self.bits {
            let mut byte = [0u8; 1];
            match self.inner.read(&mut byte)? {
                0 => {
                    // a partial code at the end of the stream is padding
                    return Ok(None);
                }
                _ => {
                    self.bit_buf |= (byte[0] as u32) << self.bit_count;
                    self.bit_count += 8;
                }
            }
        }
        let code = (self.bit_buf & ((1 << self.bits) - 1)) as u16;
        self.bit_buf >>= self.bits;
        self.bit_count -= self.bits;
        self.posbits += self.bits as u64;
        Ok(Some(code))
    }

    /// Advance the input position to the next multiple of `bits * 8` bits,
    /// discarding the encoder's group padding.
    fn resync(&mut self) -> io::Result<()> {
        let group = (self.bits * 8) as u64;
        let target = self.posbits.div_ceil(group) * group;
        let mut skip = target - self.posbits;
        while skip > 0 {
            if self.bit_count == 0 {
                let mut byte = [0u8; 1];
                if self.inner.read(&mut byte)? == 0 {
                    break;
                }
                self.bit_buf = byte[0] as u32;
                self.bit_count = 8;
            }
            let n = skip.min(self.bit_count as u64) as u32;
            self.bit_buf >>= n;
            self.bit_count -= n;
            self.posbits += n as u64;
            skip -= n as u64;
        }
        Ok(())
    }

    /// Expand one code into [Self::pending] (stored reversed).
    fn expand(&mut self, code: u16) -> io::Result<()> {
        let mut c = code;

        if c == self.free_ent && self.prev_code.is_some() {
            // the entry about to be defined: prev + first(prev)
            self.pending.push(self.prev_first);
            c = self.prev_code.unwrap();
        } else if c > self.free_ent {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "compress code out of range",
            ));
        }

        while c >= 256 {
            self.pending.push(self.suffixes[c as usize]);
            c = self.prefixes[c as usize];
        }
        self.pending.push(c as u8);
        self.prev_first = c as u8;
        Ok(())
    }

    fn step(&mut self) -> io::Result<()> {
        if self.free_ent as u32 > self.maxcode {
            self.resync()?;
            self.bits += 1;
            self.maxcode = if self.bits == self.max_bits {
                1 << self.bits
            } else {
                (1 << self.bits) - 1
            };
        }

        let Some(code) = self.next_code()? else {
            self.eof = true;
            return Ok(());
        };

        if self.block_mode && code == CLEAR {
            self.resync()?;
            self.bits = INIT_BITS;
            self.maxcode = (1 << INIT_BITS) - 1;
            self.free_ent = FIRST_FREE;
            self.prev_code = None;
            return Ok(());
        }

        let incode = code;
        self.expand(code)?;

        if let Some(prev) = self.prev_code {
            if (self.free_ent as usize) < 1 << self.max_bits {
                self.prefixes[self.free_ent as usize] = prev;
                self.suffixes[self.free_ent as usize] = self.prev_first;
                self.free_ent = self.free_ent.wrapping_add(1);
            }
        }
        self.prev_code = Some(incode);
        Ok(())
    }
}

impl<R: Read> Read for LzwReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() && !self.eof {
            self.step()?;
        }
        let n = buf.len().min(self.pending.len());
        for slot in buf[..n].iter_mut() {
            // pending holds the string reversed
            *slot = self.pending.pop().expect("length checked");
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Reference encoder mirroring the decoder's table evolution: the
    /// table index counter advances once per emitted code (skipping the
    /// first of each stream), and the width grows under the same check,
    /// padding the output to a group boundary first.
    struct LzwWriter {
        out: Vec<u8>,
        bits: u32,
        max_bits: u32,
        maxcode: u32,
        bit_buf: u64,
        bit_count: u32,
        posbits: u64,
        dict: HashMap<(u16, u8), u16>,
        first_byte: HashMap<u16, u8>,
        free_ent: u16,
        prev_emitted: Option<u16>,
    }

    impl LzwWriter {
        fn new(max_bits: u32) -> Self {
            Self {
                out: vec![0x1F, 0x9D, 0x80 | max_bits as u8],
                bits: INIT_BITS,
                max_bits,
                maxcode: (1 << INIT_BITS) - 1,
                bit_buf: 0,
                bit_count: 0,
                posbits: 0,
                dict: Default::default(),
                first_byte: Default::default(),
                free_ent: FIRST_FREE,
                prev_emitted: None,
            }
        }

        fn put_bits(&mut self, code: u16) {
            self.bit_buf |= (code as u64) << self.bit_count;
            self.bit_count += self.bits;
            self.posbits += self.bits as u64;
            while self.bit_count >= 8 {
                self.out.push((self.bit_buf & 0xFF) as u8);
                self.bit_buf >>= 8;
                self.bit_count -= 8;
            }
        }

        fn pad_to_group(&mut self) {
            let group = (self.bits * 8) as u64;
            let target = self.posbits.div_ceil(group) * group;
            while self.posbits < target {
                self.bit_count += 1;
                self.posbits += 1;
                if self.bit_count == 8 {
                    self.out.push((self.bit_buf & 0xFF) as u8);
                    self.bit_buf >>= 8;
                    self.bit_count = 0;
                }
            }
        }

        fn first_of(&self, code: u16) -> u8 {
            if code < 256 {
                code as u8
            } else {
                self.first_byte[&code]
            }
        }

        fn emit(&mut self, code: u16) {
            if self.free_ent as u32 > self.maxcode {
                self.pad_to_group();
                self.bits += 1;
                self.maxcode = if self.bits == self.max_bits {
                    1 << self.bits
                } else {
                    (1 << self.bits) - 1
                };
            }
            self.put_bits(code);
            if let Some(prev) = self.prev_emitted {
                if (self.free_ent as usize) < 1 << self.max_bits {
                    let fb = self.first_of(code);
                    self.dict.insert((prev, fb), self.free_ent);
                    let pf = self.first_of(prev);
                    self.first_byte.insert(self.free_ent, pf);
                    self.free_ent += 1;
                }
            }
            self.prev_emitted = Some(code);
        }

        fn encode(mut self, data: &[u8]) -> Vec<u8> {
            let mut ent: Option<u16> = None;
            for &b in data {
                ent = match ent {
                    None => Some(b as u16),
                    Some(e) => match self.dict.get(&(e, b)) {
                        Some(&code) => Some(code),
                        None => {
                            self.emit(e);
                            Some(b as u16)
                        }
                    },
                };
            }
            if let Some(e) = ent {
                self.emit(e);
            }
            if self.bit_count > 0 {
                self.out.push((self.bit_buf & 0xFF) as u8);
            }
            self.out
        }
    }

    #[test]
    fn decodes_reference_encoder_output() {
        let plain = b"TOBEORNOTTOBEORTOBEORNOT tobeornottobeortobeornot".repeat(20);
        let compressed = LzwWriter::new(16).encode(&plain);

        let mut reader = LzwReader::new(&compressed[..]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn survives_width_growth() {
        // enough distinct pairs to push past 512 table entries and trigger
        // the 9-to-10-bit transition with its group resync
        let mut plain = Vec::new();
        for i in 0u32..2000 {
            plain.extend_from_slice(&i.to_le_bytes());
        }
        let compressed = LzwWriter::new(12).encode(&plain);

        let mut reader = LzwReader::new(&compressed[..]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(LzwReader::new(&b"\x1f\x8bxx"[..]).is_err());
    }
}
