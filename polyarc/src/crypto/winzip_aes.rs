//! WinZip AES entry encryption (AE-1/AE-2).
//!
//! The entry data is laid out as: salt, a 2-byte password verification
//! value, the AES-CTR ciphertext, and a 10-byte truncated HMAC-SHA1 of the
//! ciphertext. Keys come from PBKDF2-HMAC-SHA1 over the password and salt,
//! 1000 iterations, yielding AES key ‖ HMAC key ‖ verification pair.

use aes::{Aes128, Aes192, Aes256};
use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Error, UnsupportedError};

type Ctr128LE<T> = ctr::Ctr128LE<T>;
type HmacSha1 = Hmac<Sha1>;

/// Length of the authentication trailer after the ciphertext.
pub const AUTH_CODE_LEN: usize = 10;

const PBKDF2_ROUNDS: u32 = 1000;

/// Key strength from the 0x9901 extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesStrength {
    /// AES-128: 8-byte salt
    Aes128,
    /// AES-192: 12-byte salt
    Aes192,
    /// AES-256: 16-byte salt
    Aes256,
}

impl AesStrength {
    /// Decode the strength byte of the extra field.
    pub fn from_code(code: u8) -> Result<Self, Error> {
        match code {
            1 => Ok(Self::Aes128),
            2 => Ok(Self::Aes192),
            3 => Ok(Self::Aes256),
            other => Err(Error::Unsupported(UnsupportedError::AesStrengthUnknown(
                other,
            ))),
        }
    }

    /// Salt bytes at the start of the entry data.
    pub fn salt_len(self) -> usize {
        match self {
            Self::Aes128 => 8,
            Self::Aes192 => 12,
            Self::Aes256 => 16,
        }
    }

    /// AES key length.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }
}

enum AnyCtr {
    Aes128(Ctr128LE<Aes128>),
    Aes192(Ctr128LE<Aes192>),
    Aes256(Ctr128LE<Aes256>),
}

/// A decryptor for one entry's data stream, plus the running HMAC over the
/// ciphertext.
pub struct AesDecryptor {
    ctr: AnyCtr,
    hmac: HmacSha1,
}

impl AesDecryptor {
    /// Derive keys and check the password verification pair. Returns `None`
    /// when the password doesn't verify.
    pub fn new(
        strength: AesStrength,
        password: &[u8],
        salt: &[u8],
        verification: [u8; 2],
    ) -> Option<Self> {
        let key_len = strength.key_len();
        let mut derived = vec![0u8; key_len * 2 + 2];
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ROUNDS, &mut derived);

        if derived[key_len * 2..] != verification {
            return None;
        }

        // CTR mode with a little-endian 128-bit block counter starting at 1
        let mut iv = [0u8; 16];
        iv[0] = 1;

        let aes_key = &derived[..key_len];
        let ctr = match strength {
            AesStrength::Aes128 => AnyCtr::Aes128(
                Ctr128LE::<Aes128>::new_from_slices(aes_key, &iv)
                    .expect("key and iv lengths are fixed per strength"),
            ),
            AesStrength::Aes192 => AnyCtr::Aes192(
                Ctr128LE::<Aes192>::new_from_slices(aes_key, &iv)
                    .expect("key and iv lengths are fixed per strength"),
            ),
            AesStrength::Aes256 => AnyCtr::Aes256(
                Ctr128LE::<Aes256>::new_from_slices(aes_key, &iv)
                    .expect("key and iv lengths are fixed per strength"),
            ),
        };

        let hmac = HmacSha1::new_from_slice(&derived[key_len..key_len * 2])
            .expect("hmac accepts any key length");

        Some(Self { ctr, hmac })
    }

    /// Feed ciphertext: updates the HMAC, then decrypts in place.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.hmac.update(buf);
        match &mut self.ctr {
            AnyCtr::Aes128(c) => c.apply_keystream(buf),
            AnyCtr::Aes192(c) => c.apply_keystream(buf),
            AnyCtr::Aes256(c) => c.apply_keystream(buf),
        }
    }

    /// Compare the accumulated HMAC against the entry's 10-byte trailer.
    pub fn verify(self, auth_code: &[u8]) -> bool {
        let tag = self.hmac.finalize().into_bytes();
        auth_code.len() == AUTH_CODE_LEN && tag[..AUTH_CODE_LEN] == auth_code[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_fixture(
        strength: AesStrength,
        password: &[u8],
        salt: &[u8],
        plain: &[u8],
    ) -> (Vec<u8>, [u8; 2], Vec<u8>) {
        let key_len = strength.key_len();
        let mut derived = vec![0u8; key_len * 2 + 2];
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ROUNDS, &mut derived);
        let verification = [derived[key_len * 2], derived[key_len * 2 + 1]];

        let mut iv = [0u8; 16];
        iv[0] = 1;
        let mut cipher = plain.to_vec();
        match strength {
            AesStrength::Aes128 => Ctr128LE::<Aes128>::new_from_slices(&derived[..key_len], &iv)
                .unwrap()
                .apply_keystream(&mut cipher),
            AesStrength::Aes192 => Ctr128LE::<Aes192>::new_from_slices(&derived[..key_len], &iv)
                .unwrap()
                .apply_keystream(&mut cipher),
            AesStrength::Aes256 => Ctr128LE::<Aes256>::new_from_slices(&derived[..key_len], &iv)
                .unwrap()
                .apply_keystream(&mut cipher),
        }

        let mut hmac = HmacSha1::new_from_slice(&derived[key_len..key_len * 2]).unwrap();
        hmac.update(&cipher);
        let tag = hmac.finalize().into_bytes()[..AUTH_CODE_LEN].to_vec();

        (cipher, verification, tag)
    }

    #[test]
    fn roundtrip_and_authenticate() {
        let salt = [7u8; 16];
        let plain = b"attack at dawn, or maybe brunch";
        let (cipher, verification, tag) =
            encrypt_fixture(AesStrength::Aes256, b"s3cret", &salt, plain);

        let mut dec = AesDecryptor::new(AesStrength::Aes256, b"s3cret", &salt, verification)
            .expect("password should verify");
        let mut buf = cipher.clone();
        dec.decrypt(&mut buf);
        assert_eq!(&buf[..], &plain[..]);
        assert!(dec.verify(&tag));
    }

    #[test]
    fn wrong_password_rejected_by_verification_pair() {
        let salt = [7u8; 8];
        let (_, verification, _) = encrypt_fixture(AesStrength::Aes128, b"right", &salt, b"x");
        assert!(AesDecryptor::new(AesStrength::Aes128, b"wrong", &salt, verification).is_none());
    }

    #[test]
    fn tampered_ciphertext_fails_hmac() {
        let salt = [9u8; 16];
        let (mut cipher, verification, tag) =
            encrypt_fixture(AesStrength::Aes256, b"pw", &salt, b"payload bytes");
        cipher[0] ^= 0x80;

        let mut dec =
            AesDecryptor::new(AesStrength::Aes256, b"pw", &salt, verification).unwrap();
        dec.decrypt(&mut cipher);
        assert!(!dec.verify(&tag));
    }
}
