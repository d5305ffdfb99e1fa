//! Portable binary encoding of a [`Module`].
//!
//! Layout: the 4-byte magic `IRBC`, a little-endian `u32` format version, then the
//! module serialized with `postcard`.

use super::Module;
use thiserror::Error;

/// Bitcode file magic number.
pub const BITCODE_MAGIC: &[u8; 4] = b"IRBC";

/// Current bitcode format version.
pub const BITCODE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BitcodeError {
    #[error("bitcode serialization failed: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("not a bitcode file (bad magic)")]
    InvalidMagic,

    #[error("unsupported bitcode version {0}")]
    UnsupportedVersion(u32),
}

pub fn write_bitcode(module: &Module) -> Result<Vec<u8>, BitcodeError> {
    let payload = postcard::to_allocvec(module)?;
    let mut bytes = Vec::with_capacity(payload.len() + 8);
    bytes.extend_from_slice(BITCODE_MAGIC);
    bytes.extend_from_slice(&BITCODE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

pub fn read_bitcode(bytes: &[u8]) -> Result<Module, BitcodeError> {
    if bytes.len() < 8 || &bytes[..4] != BITCODE_MAGIC {
        return Err(BitcodeError::InvalidMagic);
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != BITCODE_VERSION {
        return Err(BitcodeError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(&bytes[8..])?)
}
