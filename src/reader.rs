//! Sequential container reader
//!
//! B000FF has no index: locating a block means walking every frame from
//! the header onward, skipping bodies, until the execution record or EOF.

use crate::error::{NkBinError, Result};
use crate::header::{checksum, BlockFrame, ContainerHeader, FRAME_SIZE, HEADER_SIZE};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use tracing::trace;

/// A block frame together with where it lives in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// File offset of the frame
    pub offset: u64,
    pub frame: BlockFrame,
}

impl Block {
    /// File offset of the first body byte
    pub fn body_offset(&self) -> u64 {
        self.offset + FRAME_SIZE as u64
    }

    pub fn address(&self) -> u32 {
        self.frame.address
    }

    pub fn len(&self) -> usize {
        self.frame.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.frame.length == 0
    }

    /// Target end address (exclusive), widened so corrupt frames cannot overflow
    pub fn end_address(&self) -> u64 {
        self.frame.address as u64 + self.frame.length as u64
    }
}

/// Result of checking one block body against its stored checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCheck {
    pub block: Block,
    pub actual: u32,
}

impl BlockCheck {
    pub fn is_valid(&self) -> bool {
        self.block.frame.checksum == self.actual
    }
}

/// Everything the frames of a container say about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub header: ContainerHeader,
    pub blocks: Vec<Block>,
    /// Entry point from the execution record, `None` if the file ends without one
    pub exec_address: Option<u32>,
}

pub struct ContainerReader<R: Read + Seek> {
    stream: R,
    header: ContainerHeader,
    exec_address: Option<u32>,
}

impl<R: Read + Seek> ContainerReader<R> {
    /// Read and validate the header, leaving the stream at the first frame
    pub fn open(mut stream: R) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;
        let header = ContainerHeader::read_from(&mut stream)?;

        Ok(ContainerReader {
            stream,
            header,
            exec_address: None,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Entry point, known once the scan has reached the execution record
    pub fn exec_address(&self) -> Option<u32> {
        self.exec_address
    }

    /// Go back to the first frame
    pub fn rewind(&mut self) -> Result<()> {
        self.stream.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        self.exec_address = None;
        Ok(())
    }

    /// Read the frame at the current position
    ///
    /// Leaves the stream at the block body. Returns `None` at end of file
    /// or on the execution record. A frame cut short by EOF is an I/O error.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let offset = self.stream.stream_position()?;

        let mut buffer = [0u8; FRAME_SIZE];
        let filled = read_full(&mut self.stream, &mut buffer)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < FRAME_SIZE {
            return Err(NkBinError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("truncated block frame at offset {}", offset),
            )));
        }

        let frame = BlockFrame::from_bytes(&buffer);
        if frame.is_exec_record() {
            self.exec_address = Some(frame.length);
            return Ok(None);
        }

        trace!(
            "Frame at offset {}: address {:#010x}, length {}",
            offset,
            frame.address,
            frame.length
        );
        Ok(Some(Block { offset, frame }))
    }

    /// Move past the body of a block returned by [`next_block`](Self::next_block)
    pub fn skip_body(&mut self, block: &Block) -> Result<()> {
        self.stream
            .seek(SeekFrom::Start(block.body_offset() + block.frame.length as u64))?;
        Ok(())
    }

    /// Read a block's full body, leaving the stream just after it
    pub fn read_body(&mut self, block: &Block) -> Result<Vec<u8>> {
        self.stream.seek(SeekFrom::Start(block.body_offset()))?;

        let mut body = Vec::with_capacity(block.len());
        (&mut self.stream)
            .take(block.frame.length as u64)
            .read_to_end(&mut body)?;
        if body.len() != block.len() {
            return Err(NkBinError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "block at {:#010x} truncated: expected {} bytes, got {}",
                    block.address(),
                    block.len(),
                    body.len()
                ),
            )));
        }

        Ok(body)
    }

    /// Scan forward from the current position for the block at `address`
    ///
    /// # Errors
    ///
    /// `BlockNotFound` if the execution record or end of file comes first.
    pub fn find_block(&mut self, address: u32) -> Result<Block> {
        while let Some(block) = self.next_block()? {
            if block.address() == address {
                return Ok(block);
            }
            self.skip_body(&block)?;
        }
        Err(NkBinError::BlockNotFound(address))
    }

    /// All block frames, in file order
    pub fn blocks(&mut self) -> Result<Vec<Block>> {
        self.rewind()?;

        let mut blocks = Vec::new();
        while let Some(block) = self.next_block()? {
            self.skip_body(&block)?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    pub fn summary(&mut self) -> Result<ContainerSummary> {
        let blocks = self.blocks()?;
        Ok(ContainerSummary {
            header: self.header,
            blocks,
            exec_address: self.exec_address,
        })
    }

    /// Recompute every block checksum
    pub fn verify(&mut self) -> Result<Vec<BlockCheck>> {
        self.rewind()?;

        let mut checks = Vec::new();
        while let Some(block) = self.next_block()? {
            let body = self.read_body(&block)?;
            checks.push(BlockCheck {
                block,
                actual: checksum(&body),
            });
        }
        Ok(checks)
    }

    pub fn into_inner(self) -> R {
        self.stream
    }
}

/// Like `read_exact`, but reports how much was read instead of failing at EOF
fn read_full<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ContainerWriter;
    use std::io::Cursor;

    fn sample() -> Vec<u8> {
        let mut writer = ContainerWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add_entry(0x1000, &[1, 2, 3, 4]).unwrap();
        writer.add_entry(0x1040, b"ECEC").unwrap();
        writer.add_entry(0x2000, &[0xAA; 16]).unwrap();
        writer.set_exec_address(0x2000);
        writer.finalize().unwrap().into_inner()
    }

    #[test]
    fn test_summary() {
        let mut reader = ContainerReader::open(Cursor::new(sample())).unwrap();
        let summary = reader.summary().unwrap();

        assert_eq!(summary.header.start_address, 0x1000);
        assert_eq!(summary.header.total_length, 0x1010);
        assert_eq!(summary.exec_address, Some(0x2000));

        let addresses: Vec<u32> = summary.blocks.iter().map(|b| b.address()).collect();
        assert_eq!(addresses, vec![0x1000, 0x1040, 0x2000]);
        assert_eq!(summary.blocks[0].offset, HEADER_SIZE as u64);
        assert_eq!(
            summary.blocks[1].offset,
            (HEADER_SIZE + FRAME_SIZE + 4) as u64
        );
    }

    #[test]
    fn test_find_and_read_block() {
        let mut reader = ContainerReader::open(Cursor::new(sample())).unwrap();
        let block = reader.find_block(0x1040).unwrap();
        assert_eq!(block.len(), 4);
        assert_eq!(reader.read_body(&block).unwrap(), b"ECEC");
    }

    #[test]
    fn test_find_missing_block() {
        let mut reader = ContainerReader::open(Cursor::new(sample())).unwrap();
        assert!(matches!(
            reader.find_block(0x1004),
            Err(NkBinError::BlockNotFound(0x1004))
        ));
    }

    #[test]
    fn test_missing_exec_record() {
        let mut bytes = sample();
        bytes.truncate(bytes.len() - FRAME_SIZE);

        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
        let summary = reader.summary().unwrap();
        assert_eq!(summary.blocks.len(), 3);
        assert_eq!(summary.exec_address, None);
    }

    #[test]
    fn test_truncated_frame() {
        let mut bytes = sample();
        bytes.truncate(bytes.len() - 4);

        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
        assert!(matches!(reader.blocks(), Err(NkBinError::Io(_))));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut bytes = sample();
        let mut reader = ContainerReader::open(Cursor::new(bytes.clone())).unwrap();
        assert!(reader.verify().unwrap().iter().all(BlockCheck::is_valid));

        // First body byte of the first block
        bytes[HEADER_SIZE + FRAME_SIZE] ^= 0xFF;
        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
        let checks = reader.verify().unwrap();
        assert!(!checks[0].is_valid());
        assert!(checks[1].is_valid());
        assert!(checks[2].is_valid());
    }

    #[test]
    fn test_rejects_foreign_file() {
        let bytes = b"MZ\x90\x00 definitely not a boot image".to_vec();
        assert!(matches!(
            ContainerReader::open(Cursor::new(bytes)),
            Err(NkBinError::InvalidMagic)
        ));
    }
}
