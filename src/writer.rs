//! Container writer
//!
//! Blocks are appended front to back; only the header at offset 0 is
//! backpatched once the address span is known.

use crate::error::{NkBinError, Result};
use crate::header::{BlockFrame, ContainerHeader, HEADER_SIZE};
use std::io::{Seek, SeekFrom, Write};
use tracing::{debug, info};

/// Streams address-tagged blocks into a B000FF container
///
/// Blocks must be added in non-decreasing address order and must not
/// overlap. Nothing is retained per block except the running address span.
pub struct ContainerWriter<W: Write + Seek> {
    stream: W,
    start_address: u32,
    end_address: u32,
    exec_address: u32,
    blocks: usize,
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Start a container, reserving space for the header
    pub fn new(mut stream: W) -> Result<Self> {
        stream.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        Ok(ContainerWriter {
            stream,
            start_address: u32::MAX,
            end_address: 0,
            exec_address: 0,
            blocks: 0,
        })
    }

    /// Append `data` as a block at `address`
    ///
    /// # Errors
    ///
    /// - `ReservedAddress` if `address` is 0
    /// - `AddressOrder` if `address` is below the end of a previous block
    /// - `AddressOverflow` if the block would extend past 4 GiB
    pub fn add_entry(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if address == 0 {
            return Err(NkBinError::ReservedAddress);
        }
        if address < self.end_address {
            return Err(NkBinError::AddressOrder {
                address,
                end_address: self.end_address,
            });
        }

        let frame = BlockFrame::for_data(address, data)?;
        let end = address
            .checked_add(frame.length)
            .ok_or(NkBinError::AddressOverflow {
                address,
                length: data.len(),
            })?;

        self.start_address = self.start_address.min(address);
        self.end_address = self.end_address.max(end);

        frame.write_to(&mut self.stream)?;
        self.stream.write_all(data)?;
        self.blocks += 1;

        debug!(
            "Added block {:#010x}..{:#010x} (checksum {:#x})",
            address, end, frame.checksum
        );

        Ok(())
    }

    /// Set the entry point stored in the execution record (last call wins)
    pub fn set_exec_address(&mut self, address: u32) {
        self.exec_address = address;
    }

    /// Lowest block address so far, `None` before the first block
    pub fn start_address(&self) -> Option<u32> {
        (self.blocks > 0).then_some(self.start_address)
    }

    /// End address of the highest block so far
    pub fn end_address(&self) -> u32 {
        self.end_address
    }

    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Write the execution record and backpatch the header
    ///
    /// Consumes the writer and hands back the underlying stream, flushed.
    ///
    /// # Errors
    ///
    /// `EmptyContainer` if no block was ever added. Nothing is written in
    /// that case.
    pub fn finalize(mut self) -> Result<W> {
        if self.blocks == 0 || self.start_address > self.end_address {
            return Err(NkBinError::EmptyContainer);
        }
        let total_length = self.end_address - self.start_address;

        BlockFrame::exec_record(self.exec_address).write_to(&mut self.stream)?;

        self.stream.seek(SeekFrom::Start(0))?;
        ContainerHeader::new(self.start_address, total_length).write_to(&mut self.stream)?;
        self.stream.flush()?;

        info!(
            "Finalized container: {} blocks, start {:#010x}, length {:#x}, exec {:#010x}",
            self.blocks, self.start_address, total_length, self.exec_address
        );

        Ok(self.stream)
    }
}
