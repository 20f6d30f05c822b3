//! NK.bin image assembly
//!
//! A generated image holds just enough for the bootloader to find and run
//! one raw executable:
//!
//! ```text
//! load_base                   jump stub (branch to the payload)
//! load_base + 0x40            "ECEC" + ROMHDR address
//! load_base + 0x48            pTOC: ROMHDR address - load_base
//! load_base + exe_offset      payload
//! name_address                "nk.exe\0"
//! romhdr_address              ROMHDR + one TOC entry
//! ```

use crate::config::{PlatformConfig, ROMHDR_SIGNATURE};
use crate::error::{NkBinError, Result};
use crate::toc::{RomHeader, TocEntry};
use crate::writer::ContainerWriter;
use std::borrow::Cow;
use std::io::{Seek, Write};
use tracing::{debug, info};

/// One block of a planned image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    pub name: &'static str,
    pub address: u32,
    pub data: Cow<'a, [u8]>,
}

impl Section<'_> {
    fn end_address(&self) -> Result<u32> {
        u32::try_from(self.data.len())
            .ok()
            .and_then(|len| self.address.checked_add(len))
            .ok_or(NkBinError::AddressOverflow {
                address: self.address,
                length: self.data.len(),
            })
    }
}

/// Lays out a payload and its boot records according to a [`PlatformConfig`]
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    config: PlatformConfig,
    epoch_time: Option<f64>,
}

impl ImageBuilder {
    pub fn new(config: PlatformConfig) -> Self {
        ImageBuilder {
            config,
            epoch_time: None,
        }
    }

    /// Stamp the TOC entry with a fixed Unix time instead of the current one
    pub fn with_epoch_time(mut self, epoch_time: f64) -> Self {
        self.epoch_time = Some(epoch_time);
        self
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Entry point written to the execution record
    pub fn exe_address(&self) -> Result<u32> {
        self.config
            .exe_address()
            .ok_or(NkBinError::AddressOverflow {
                address: self.config.load_base,
                length: self.config.exe_offset as usize,
            })
    }

    /// ROMHDR describing a payload of `payload_len` bytes
    pub fn romhdr(&self, payload_len: u32) -> Result<RomHeader> {
        let config = &self.config;

        let mut romhdr = RomHeader::with_params(config.load_base, config.romhdr);
        romhdr.add_entry(TocEntry::with_epoch_time(
            payload_len,
            config.name_address,
            self.epoch_time,
        ));

        let size = romhdr.size();
        romhdr.phys_last = config
            .romhdr_address
            .checked_add(size as u32)
            .ok_or(NkBinError::AddressOverflow {
                address: config.romhdr_address,
                length: size,
            })?;

        Ok(romhdr)
    }

    /// Every block of the image, in address order
    ///
    /// # Errors
    ///
    /// `LayoutOrder` if the configured addresses would place a block over
    /// the one before it (for instance a payload running into the name
    /// string).
    pub fn sections<'a>(&self, payload: &'a [u8]) -> Result<Vec<Section<'a>>> {
        let config = &self.config;
        let payload_len =
            u32::try_from(payload.len()).map_err(|_| NkBinError::BlockTooLarge(payload.len()))?;

        let offset = |offset: u32| {
            config
                .load_base
                .checked_add(offset)
                .ok_or(NkBinError::AddressOverflow {
                    address: config.load_base,
                    length: offset as usize,
                })
        };

        let mut romhdr_pointer = ROMHDR_SIGNATURE.to_vec();
        romhdr_pointer.extend_from_slice(&config.romhdr_address.to_le_bytes());

        let toc_pointer = config.romhdr_address.wrapping_sub(config.load_base);

        let mut name = config.module_name.as_bytes().to_vec();
        name.push(0);

        let sections = vec![
            Section {
                name: "jump stub",
                address: config.load_base,
                data: Cow::Owned(config.jump_stub.to_vec()),
            },
            Section {
                name: "ROMHDR pointer",
                address: offset(config.romhdr_pointer_offset)?,
                data: Cow::Owned(romhdr_pointer),
            },
            Section {
                name: "pTOC",
                address: offset(config.toc_pointer_offset)?,
                data: Cow::Owned(toc_pointer.to_le_bytes().to_vec()),
            },
            Section {
                name: "payload",
                address: self.exe_address()?,
                data: Cow::Borrowed(payload),
            },
            Section {
                name: "module name",
                address: config.name_address,
                data: Cow::Owned(name),
            },
            Section {
                name: "ROMHDR",
                address: config.romhdr_address,
                data: Cow::Owned(self.romhdr(payload_len)?.to_bytes()),
            },
        ];

        let mut end_address = 0;
        for section in &sections {
            if section.address < end_address {
                return Err(NkBinError::LayoutOrder {
                    what: section.name,
                    address: section.address,
                    end_address,
                });
            }
            end_address = section.end_address()?;
        }

        Ok(sections)
    }

    /// Write a complete image for `payload` into `stream`
    ///
    /// The layout is checked before anything is written.
    pub fn build<W: Write + Seek>(&self, stream: W, payload: &[u8]) -> Result<W> {
        let sections = self.sections(payload)?;

        let mut writer = ContainerWriter::new(stream)?;
        for section in &sections {
            debug!(
                "Writing {} at {:#010x} ({} bytes)",
                section.name,
                section.address,
                section.data.len()
            );
            writer.add_entry(section.address, &section.data)?;
        }
        writer.set_exec_address(self.exe_address()?);

        let stream = writer.finalize()?;
        info!(
            "Built image for {} byte payload at {:#010x}",
            payload.len(),
            self.exe_address()?
        );

        Ok(stream)
    }
}
