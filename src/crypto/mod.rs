//! Block ciphers selected by the header's `bCryptMethod`.
//!
//! Both ciphers are byte substitutions applied in place:
//!
//! - **Permute**: one table lookup per byte, `R` to encrypt and `I` to decrypt.
//! - **Cyclic**: a 16-bit rolling key derived from the low 32 bits of the
//!   block id feeds three lookups per byte.  The transform is its own inverse.
//!
//! Data-tree and subnode blocks (internal BIDs) are never encrypted; that rule
//! lives in the block store, not here.

mod tables;

use serde::Serialize;
use std::fmt;

use crate::error::{PstError, Result};
use tables::{DECRYPT_I, ENCRYPT_R, SCRAMBLE_S};

pub const CRYPT_NONE: u8 = 0x00;
pub const CRYPT_PERMUTE: u8 = 0x01;
pub const CRYPT_CYCLIC: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Encryption {
    None,
    Permute,
    Cyclic,
}

impl Encryption {
    pub fn from_method(method: u8) -> Result<Self> {
        match method {
            CRYPT_NONE => Ok(Encryption::None),
            CRYPT_PERMUTE => Ok(Encryption::Permute),
            CRYPT_CYCLIC => Ok(Encryption::Cyclic),
            other => Err(PstError::UnknownEncryption(other)),
        }
    }

    pub fn method(self) -> u8 {
        match self {
            Encryption::None => CRYPT_NONE,
            Encryption::Permute => CRYPT_PERMUTE,
            Encryption::Cyclic => CRYPT_CYCLIC,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encryption::None => "none",
            Encryption::Permute => "permute",
            Encryption::Cyclic => "cyclic",
        }
    }

    /// Decrypt `data` in place.  `key` is the low 32 bits of the block id.
    pub fn decrypt(self, data: &mut [u8], key: u32) {
        match self {
            Encryption::None => {}
            Encryption::Permute => substitute(data, &DECRYPT_I),
            Encryption::Cyclic => cyclic(data, key),
        }
    }

    /// Encrypt `data` in place.
    pub fn encrypt(self, data: &mut [u8], key: u32) {
        match self {
            Encryption::None => {}
            Encryption::Permute => substitute(data, &ENCRYPT_R),
            Encryption::Cyclic => cyclic(data, key),
        }
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn substitute(data: &mut [u8], table: &[u8; 256]) {
    for b in data.iter_mut() {
        *b = table[usize::from(*b)];
    }
}

fn cyclic(data: &mut [u8], key: u32) {
    let mut w = (key ^ (key >> 16)) as u16;
    for b in data.iter_mut() {
        let lo = w as u8;
        let hi = (w >> 8) as u8;
        let mut x = b.wrapping_add(lo);
        x = ENCRYPT_R[usize::from(x)];
        x = x.wrapping_add(hi);
        x = SCRAMBLE_S[usize::from(x)];
        x = x.wrapping_sub(hi);
        x = DECRYPT_I[usize::from(x)];
        *b = x.wrapping_sub(lo);
        w = w.wrapping_add(1);
    }
}
