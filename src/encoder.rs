//! Label to visual code encoding
//!
//! The code is read straight out of a SHA-256 digest of the label:
//! the border color from the low 3 bits of byte 0, then nine 3-bit cell
//! colors from the bit-stream starting at bit 8. Bits are numbered least
//! significant first inside each byte, so a window may span two bytes.

use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::constants::glyph::CELL_COUNT;
use crate::error::{MarkerError, Result};

pub const DIGEST_LEN: usize = 32;

pub type Digest = [u8; DIGEST_LEN];

/// Bit offset of the first cell code in the digest bit-stream
const CELL_BIT_OFFSET: usize = 8;

const CODE_BITS: usize = 3;

const CODE_MASK: u16 = 0b111;

/// 256-bit digest primitive
pub trait DigestProvider: Send + Sync {
    fn digest(&self, data: &[u8]) -> Result<Digest>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Digest;

impl DigestProvider for Sha256Digest {
    fn digest(&self, data: &[u8]) -> Result<Digest> {
        let hash = Sha256::digest(data);
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&hash);
        Ok(out)
    }
}

/// Border color plus nine cell colors, each a palette index in 0..8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualCode {
    pub border_code: u8,
    pub cell_codes: [u8; CELL_COUNT],
}

impl VisualCode {
    pub fn from_digest(digest: &Digest) -> Self {
        let mut cell_codes = [0u8; CELL_COUNT];
        for (i, cell) in cell_codes.iter_mut().enumerate() {
            *cell = read_bits(digest, CELL_BIT_OFFSET + CODE_BITS * i);
        }
        Self {
            border_code: digest[0] & CODE_MASK as u8,
            cell_codes,
        }
    }
}

impl fmt::Display for VisualCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.border_code)?;
        for code in self.cell_codes {
            write!(f, "{code}")?;
        }
        Ok(())
    }
}

/// 3-bit window at `offset`, carrying into the next byte when needed
fn read_bits(bytes: &[u8], offset: usize) -> u8 {
    let index = offset / 8;
    let shift = offset % 8;
    let low = bytes[index] as u16;
    let high = bytes.get(index + 1).copied().unwrap_or(0) as u16;
    (((high << 8 | low) >> shift) & CODE_MASK) as u8
}

#[derive(Clone)]
pub struct Encoder {
    digest: Arc<dyn DigestProvider>,
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder").finish_non_exhaustive()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(Arc::new(Sha256Digest))
    }
}

impl Encoder {
    pub fn new(digest: Arc<dyn DigestProvider>) -> Self {
        Self { digest }
    }

    pub fn encode(&self, label: &str) -> Result<VisualCode> {
        if label.is_empty() {
            return Err(MarkerError::EncodingUnavailable("empty label".to_string()));
        }
        let digest = self.digest.digest(label.as_bytes())?;
        Ok(VisualCode::from_digest(&digest))
    }
}
