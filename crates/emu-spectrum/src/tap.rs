//! TAP byte streams.
//!
//! A TAP stream is a sequence of blocks, each a little-endian length word
//! followed by that many bytes: a flag byte, the data and an XOR checksum
//! over flag and data. Flag `$00` marks a header, `$FF` a data block.

use serde::{Deserialize, Serialize};

use crate::error::TapError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapBlock {
    pub flag: u8,
    /// Data bytes without flag and checksum.
    pub data: Vec<u8>,
}

impl TapBlock {
    #[must_use]
    pub fn new(flag: u8, data: Vec<u8>) -> Self {
        Self { flag, data }
    }

    /// Headers get the long pilot tone.
    #[must_use]
    pub fn is_header(&self) -> bool {
        self.flag < 0x80
    }

    #[must_use]
    pub fn checksum(&self) -> u8 {
        self.data.iter().fold(self.flag, |sum, byte| sum ^ byte)
    }

    /// The bytes as recorded on tape: flag, data, checksum.
    #[must_use]
    pub fn tape_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + 2);
        bytes.push(self.flag);
        bytes.extend_from_slice(&self.data);
        bytes.push(self.checksum());
        bytes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapFile {
    pub blocks: Vec<TapBlock>,
}

impl TapFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, TapError> {
        let mut blocks = Vec::new();
        let mut rest = bytes;
        let mut offset = 0;

        while !rest.is_empty() {
            let [lo, hi, body @ ..] = rest else {
                return Err(TapError::TruncatedLength { offset });
            };
            let len = usize::from(u16::from_le_bytes([*lo, *hi]));
            if len < 2 {
                return Err(TapError::ShortBlock { offset, len });
            }
            if body.len() < len {
                return Err(TapError::TruncatedBlock {
                    offset,
                    len,
                    remaining: body.len(),
                });
            }

            let (block, tail) = body.split_at(len);
            let block = TapBlock::new(block[0], block[1..len - 1].to_vec());
            let found = body[len - 1];
            let expected = block.checksum();
            if found != expected {
                return Err(TapError::Checksum {
                    offset,
                    expected,
                    found,
                });
            }
            blocks.push(block);
            offset += 2 + len;
            rest = tail;
        }

        Ok(Self { blocks })
    }

    /// Serialise back to a TAP byte stream.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for block in &self.blocks {
            let body = block.tape_bytes();
            bytes.extend_from_slice(&(body.len() as u16).to_le_bytes());
            bytes.extend_from_slice(&body);
        }
        bytes
    }
}
