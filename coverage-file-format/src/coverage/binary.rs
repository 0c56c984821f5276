// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Persisted form of a coverage run.
//!
//! A file is a fixed header followed by the `bincode` encoding of a versioned record:
//!
//! | bytes | field |
//! |---|---|
//! | 8 | magic, `LINECOV\0` |
//! | 4 | format version, little endian |
//! | 8 | payload length, little endian |
//! | 8 | FNV-1a checksum of the payload, little endian |
//! | * | payload |

use std::hash::Hasher;
use std::path::Path;

use anyhow::{Context, Result};
use coverage::source::RunCoverage;
use fnv::FnvHasher;
use thiserror::Error;

pub mod v1;

pub const MAGIC: [u8; 8] = *b"LINECOV\0";

/// Version written by `serialize()`.
pub const CURRENT_VERSION: u32 = 1;

const HEADER_LEN: usize = 28;

/// The data is not a well-formed coverage file.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not a coverage file")]
    BadMagic,

    #[error("unknown coverage file version {0}")]
    UnknownVersion(u32),

    #[error("truncated coverage file: expected {expected} bytes, found {found}")]
    Truncated { expected: u64, found: u64 },

    #[error("{0} trailing bytes after coverage data")]
    TrailingBytes(u64),

    #[error("checksum mismatch: expected {expected:016x}, computed {computed:016x}")]
    Checksum { expected: u64, computed: u64 },

    #[error("undecodable coverage data: {0}")]
    Payload(String),

    #[error("invalid coverage data: {0}")]
    Invalid(String),
}

/// The coverage file was written by a newer version of this tool.
#[derive(Debug, Error)]
#[error("coverage file version {found} is newer than supported version {supported}")]
pub struct VersionError {
    pub found: u32,
    pub supported: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Header {
    version: u32,
    length: u64,
    checksum: u64,
}

impl Header {
    fn write(&self, data: &mut Vec<u8>) {
        data.extend_from_slice(&MAGIC);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&self.length.to_le_bytes());
        data.extend_from_slice(&self.checksum.to_le_bytes());
    }

    fn read(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < HEADER_LEN {
            if !MAGIC.starts_with(&data[..data.len().min(MAGIC.len())]) {
                return Err(FormatError::BadMagic);
            }

            return Err(FormatError::Truncated {
                expected: HEADER_LEN as u64,
                found: data.len() as u64,
            });
        }

        if data[..8] != MAGIC {
            return Err(FormatError::BadMagic);
        }

        Ok(Self {
            version: u32::from_le_bytes(le_bytes(&data[8..12])),
            length: u64::from_le_bytes(le_bytes(&data[12..20])),
            checksum: u64::from_le_bytes(le_bytes(&data[20..28])),
        })
    }
}

// Callers slice exactly `N` bytes.
fn le_bytes<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut bytes = [0; N];
    bytes.copy_from_slice(data);
    bytes
}

fn checksum(payload: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(payload);
    hasher.finish()
}

pub fn serialize(run: &RunCoverage) -> Result<Vec<u8>> {
    let record = v1::RunCoverageRecord::from(run);
    let payload = bincode::serialize(&record)?;

    let header = Header {
        version: CURRENT_VERSION,
        length: payload.len() as u64,
        checksum: checksum(&payload),
    };

    let mut data = Vec::with_capacity(HEADER_LEN + payload.len());
    header.write(&mut data);
    data.extend_from_slice(&payload);

    Ok(data)
}

/// Decode a coverage file.
///
/// Errors are a `FormatError` or a `VersionError`. Partially valid data is never
/// returned. Exit codes are not persisted, so a decoded run has none.
pub fn deserialize(data: &[u8]) -> Result<RunCoverage> {
    let header = Header::read(data)?;

    if header.version > CURRENT_VERSION {
        return Err(VersionError {
            found: header.version,
            supported: CURRENT_VERSION,
        }
        .into());
    }

    let payload = &data[HEADER_LEN..];
    let found = payload.len() as u64;

    if found < header.length {
        return Err(FormatError::Truncated {
            expected: HEADER_LEN as u64 + header.length,
            found: data.len() as u64,
        }
        .into());
    }

    if found > header.length {
        return Err(FormatError::TrailingBytes(found - header.length).into());
    }

    let computed = checksum(payload);
    if computed != header.checksum {
        return Err(FormatError::Checksum {
            expected: header.checksum,
            computed,
        }
        .into());
    }

    let run = match header.version {
        1 => {
            let record: v1::RunCoverageRecord = bincode::deserialize(payload)
                .map_err(|err| FormatError::Payload(err.to_string()))?;
            RunCoverage::try_from(record)?
        }
        version => return Err(FormatError::UnknownVersion(version).into()),
    };

    Ok(run)
}

pub fn save(path: impl AsRef<Path>, run: &RunCoverage) -> Result<()> {
    let path = path.as_ref();
    let data = serialize(run)?;

    std::fs::write(path, data)
        .with_context(|| format!("unable to write coverage file `{}`", path.display()))?;

    debug!("saved coverage to `{}`", path.display());

    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<RunCoverage> {
    let path = path.as_ref();

    let data = std::fs::read(path)
        .with_context(|| format!("unable to read coverage file `{}`", path.display()))?;

    let run = deserialize(&data)
        .with_context(|| format!("invalid coverage file `{}`", path.display()))?;

    info!("loaded coverage file `{}`", path.display());

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Header {
            version: 1,
            length: 0x0102,
            checksum: 0xaabb,
        };

        let mut data = vec![];
        header.write(&mut data);

        assert_eq!(data.len(), HEADER_LEN);
        assert_eq!(&data[..8], b"LINECOV\0");
        assert_eq!(&data[8..12], &[1, 0, 0, 0]);
        assert_eq!(&data[12..20], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&data[20..28], &[0xbb, 0xaa, 0, 0, 0, 0, 0, 0]);

        assert_eq!(Header::read(&data).unwrap(), header);
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(
            Header::read(b"LINE"),
            Err(FormatError::Truncated {
                expected: 28,
                found: 4
            })
        ));
        assert!(matches!(
            Header::read(b"{\"version\""),
            Err(FormatError::BadMagic)
        ));
    }

    #[test]
    fn test_checksum_is_fnv1a() {
        // Offset basis for the empty input.
        assert_eq!(checksum(b""), 0xcbf29ce484222325);
        assert_eq!(checksum(b"a"), 0xaf63dc4c8601ec8c);
    }
}
