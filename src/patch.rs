//! In-place block replacement
//!
//! Blocks cannot grow: every later frame sits at a fixed file offset, so a
//! replacement must fit inside the body that is already there. Bytes of the
//! old body outside the replaced span are kept.

use crate::config::DEFAULT_EXE_ADDRESS;
use crate::error::{NkBinError, Result};
use crate::header::{checksum, BlockFrame};
use crate::reader::{Block, ContainerReader};
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, info};

/// Which block to patch and where inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchOptions {
    /// Target address of the block to patch
    pub address: u32,

    /// Byte offset inside the block body where the replacement starts
    pub offset: usize,
}

impl Default for PatchOptions {
    fn default() -> Self {
        PatchOptions {
            address: DEFAULT_EXE_ADDRESS,
            offset: 0,
        }
    }
}

/// What a patch changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReport {
    /// The patched block, with its frame as it is now on disk
    pub block: Block,
    pub old_checksum: u32,
}

impl PatchReport {
    pub fn new_checksum(&self) -> u32 {
        self.block.frame.checksum
    }
}

/// Overwrite part of an existing block's body and fix its checksum
///
/// The block's address and length, and the file size, never change.
///
/// # Errors
///
/// - `InvalidMagic` if `stream` is not a B000FF container
/// - `BlockNotFound` if no block sits at `options.address`
/// - `ReplacementTooLarge` if the replacement does not fit at `options.offset`
///
/// All three are detected before anything is written.
pub fn patch_block<S>(stream: &mut S, replacement: &[u8], options: &PatchOptions) -> Result<PatchReport>
where
    S: Read + Write + Seek,
{
    let mut reader = ContainerReader::open(&mut *stream)?;
    let block = reader.find_block(options.address)?;
    debug!(
        "Found block {:#010x} at offset {} ({} bytes)",
        block.address(),
        block.offset,
        block.len()
    );

    let end = options
        .offset
        .checked_add(replacement.len())
        .filter(|&end| end <= block.len())
        .ok_or(NkBinError::ReplacementTooLarge {
            replacement: options.offset.saturating_add(replacement.len()),
            available: block.len(),
        })?;

    let mut body = reader.read_body(&block)?;
    body[options.offset..end].copy_from_slice(replacement);

    let frame = BlockFrame {
        checksum: checksum(&body),
        ..block.frame
    };

    stream.seek(SeekFrom::Start(block.offset))?;
    frame.write_to(stream)?;
    stream.write_all(&body)?;
    stream.flush()?;

    info!(
        "Patched {} bytes at {:#010x}+{:#x}, checksum {:#x} -> {:#x}",
        replacement.len(),
        block.address(),
        options.offset,
        block.frame.checksum,
        frame.checksum
    );

    Ok(PatchReport {
        block: Block { frame, ..block },
        old_checksum: block.frame.checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{FRAME_SIZE, HEADER_SIZE};
    use crate::writer::ContainerWriter;
    use std::io::Cursor;

    fn sample() -> Vec<u8> {
        let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_entry(0x1000, &[0x11; 8]).unwrap();
        writer.add_entry(0x2000, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        writer.add_entry(0x3000, &[0x22; 8]).unwrap();
        writer.set_exec_address(0x2000);
        writer.finalize().unwrap().into_inner()
    }

    fn at(address: u32) -> PatchOptions {
        PatchOptions { address, offset: 0 }
    }

    #[test]
    fn test_partial_overwrite() {
        let mut cursor = Cursor::new(sample());
        let report = patch_block(&mut cursor, &[0x01, 0x02], &at(0x2000)).unwrap();

        assert_eq!(report.old_checksum, 0xDE + 0xAD + 0xBE + 0xEF);
        assert_eq!(report.new_checksum(), 0x01 + 0x02 + 0xBE + 0xEF);

        let bytes = cursor.into_inner();
        let body = report.block.body_offset() as usize;
        assert_eq!(&bytes[body..body + 4], &[0x01, 0x02, 0xBE, 0xEF]);
        assert_eq!(
            &bytes[body - 4..body],
            &(0x01u32 + 0x02 + 0xBE + 0xEF).to_le_bytes()
        );
    }

    #[test]
    fn test_identical_replacement_is_noop() {
        let original = sample();
        let mut cursor = Cursor::new(original.clone());
        patch_block(&mut cursor, &[0xDE, 0xAD, 0xBE, 0xEF], &at(0x2000)).unwrap();
        assert_eq!(cursor.into_inner(), original);
    }

    #[test]
    fn test_offset_patch() {
        let mut cursor = Cursor::new(sample());
        let options = PatchOptions {
            address: 0x1000,
            offset: 6,
        };
        patch_block(&mut cursor, &[0x33, 0x44], &options).unwrap();

        let bytes = cursor.into_inner();
        let body = HEADER_SIZE + FRAME_SIZE;
        assert_eq!(
            &bytes[body..body + 8],
            &[0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x33, 0x44]
        );
    }

    #[test]
    fn test_too_large_leaves_file_untouched() {
        let original = sample();
        let mut cursor = Cursor::new(original.clone());

        let result = patch_block(&mut cursor, &[0; 5], &at(0x2000));
        assert!(matches!(
            result,
            Err(NkBinError::ReplacementTooLarge {
                replacement: 5,
                available: 4
            })
        ));

        let options = PatchOptions {
            address: 0x2000,
            offset: 3,
        };
        assert!(patch_block(&mut cursor, &[0; 2], &options).is_err());
        assert_eq!(cursor.into_inner(), original);
    }

    #[test]
    fn test_missing_target() {
        let mut cursor = Cursor::new(sample());
        assert!(matches!(
            patch_block(&mut cursor, &[0], &at(0x4000)),
            Err(NkBinError::BlockNotFound(0x4000))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample();
        bytes[..7].copy_from_slice(b"NOTB000");
        let mut cursor = Cursor::new(bytes.clone());
        assert!(matches!(
            patch_block(&mut cursor, &[0], &at(0x2000)),
            Err(NkBinError::InvalidMagic)
        ));
        assert_eq!(cursor.into_inner(), bytes);
    }
}
