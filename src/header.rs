//! B000FF container header and block framing
//!
//! A container is laid out as:
//!
//! ```text
//! +---------------------------+
//! | "B000FF\n" | start | len  |  ContainerHeader (15 bytes)
//! +---------------------------+
//! | addr | length | checksum  |  BlockFrame (12 bytes)
//! | body (length bytes)       |
//! +---------------------------+
//! | ...                       |
//! +---------------------------+
//! | 0    | exec   | 0         |  execution record, no body
//! +---------------------------+
//! ```
//!
//! All integers are little-endian.

use crate::error::{NkBinError, Result};
use std::io::{Read, Write};

pub const MAGIC: [u8; 7] = *b"B000FF\n";

/// Encoded size of [`ContainerHeader`]
pub const HEADER_SIZE: usize = 7 + 4 + 4;

/// Encoded size of [`BlockFrame`]
pub const FRAME_SIZE: usize = 4 + 4 + 4;

/// Container header, written once at offset 0 after all blocks are known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Magic signature: "B000FF\n"
    pub magic: [u8; 7],

    /// Lowest address touched by any block
    pub start_address: u32,

    /// Highest block end address minus `start_address`
    pub total_length: u32,
}

impl ContainerHeader {
    pub fn new(start_address: u32, total_length: u32) -> Self {
        ContainerHeader {
            magic: MAGIC,
            start_address,
            total_length,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(NkBinError::InvalidMagic);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..7].copy_from_slice(&self.magic);
        bytes[7..11].copy_from_slice(&self.start_address.to_le_bytes());
        bytes[11..15].copy_from_slice(&self.total_length.to_le_bytes());
        bytes
    }

    /// Decode and validate a header
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut magic = [0u8; 7];
        magic.copy_from_slice(&bytes[0..7]);

        let header = ContainerHeader {
            magic,
            start_address: read_u32(&bytes[7..11]),
            total_length: read_u32(&bytes[11..15]),
        };
        header.validate()?;

        Ok(header)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buffer = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buffer)?;
        Self::from_bytes(&buffer)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Per-block framing preceding each body
///
/// The execution record reuses this layout with `address == 0` and the
/// entry point stored in `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFrame {
    pub address: u32,
    pub length: u32,
    pub checksum: u32,
}

impl BlockFrame {
    /// Frame for `data` placed at `address`
    pub fn for_data(address: u32, data: &[u8]) -> Result<Self> {
        let length = u32::try_from(data.len()).map_err(|_| NkBinError::BlockTooLarge(data.len()))?;
        Ok(BlockFrame {
            address,
            length,
            checksum: checksum(data),
        })
    }

    /// Terminal record carrying the execution entry point
    pub fn exec_record(exec_address: u32) -> Self {
        BlockFrame {
            address: 0,
            length: exec_address,
            checksum: 0,
        }
    }

    pub fn is_exec_record(&self) -> bool {
        self.address == 0
    }

    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0..4].copy_from_slice(&self.address.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.length.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; FRAME_SIZE]) -> Self {
        BlockFrame {
            address: read_u32(&bytes[0..4]),
            length: read_u32(&bytes[4..8]),
            checksum: read_u32(&bytes[8..12]),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Sum of all bytes, wrapping at 2^32
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32))
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = ContainerHeader::new(0x88200000, 0x00C7B1E4);
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..7], b"B000FF\n");
        assert_eq!(&bytes[7..11], &[0x00, 0x00, 0x20, 0x88]);
        assert_eq!(&bytes[11..15], &[0xE4, 0xB1, 0xC7, 0x00]);

        let decoded = ContainerHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = ContainerHeader::new(0, 0).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes),
            Err(NkBinError::InvalidMagic)
        ));
    }

    #[test]
    fn test_frame_layout() {
        let frame = BlockFrame::for_data(0x88200040, b"ECEC\x30\xB1\xE7\x88").unwrap();
        assert_eq!(frame.length, 8);

        let bytes = frame.to_bytes();
        assert_eq!(&bytes[0..4], &0x88200040u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &8u32.to_le_bytes());
        assert_eq!(BlockFrame::from_bytes(&bytes), frame);
    }

    #[test]
    fn test_exec_record() {
        let frame = BlockFrame::exec_record(0x88201000);
        assert!(frame.is_exec_record());
        assert_eq!(frame.length, 0x88201000);
        assert_eq!(frame.checksum, 0);
    }

    #[test]
    fn test_checksum_is_byte_sum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xDE, 0xAD, 0xBE, 0xEF]), 0xDE + 0xAD + 0xBE + 0xEF);
        assert_eq!(checksum(&[0xFE, 0x03, 0x00, 0xEA]), 0x1EB);
    }
}
