//! ROMHDR and TOC entries
//!
//! The bootloader finds the payload through the ROMHDR: a fixed 84-byte
//! summary record immediately followed by one 32-byte TOC entry per module.
//!
//! ```text
//! ROMHDR (84 bytes)
//!   17 x u32  dll_first .. driv_glob_len
//!    2 x u16  cpu_type, misc_flags
//!    3 x u32  extensions_ptr, tracking_start, tracking_len
//! TOCentry (32 bytes each)
//!    u32 attributes, u64 file time, u32 size, u32 name,
//!    u32 e32, u32 o32, u32 load offset
//! ```

use crate::config::RomHeaderParams;
use chrono::{DateTime, Utc};

pub const ROMHDR_SIZE: usize = 17 * 4 + 2 * 2 + 3 * 4;
pub const TOC_ENTRY_SIZE: usize = 4 + 8 + 5 * 4;

/// Read, write and execute
pub const DEFAULT_ATTRIBUTES: u32 = 0x7;

/// Seconds from 1601-01-01 (FILETIME epoch) to 1970-01-01 (Unix epoch)
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert Unix epoch seconds to FILETIME ticks (100ns since 1601)
///
/// `None` means now. Fractional seconds are kept down to the tick and the
/// result is truncated, not rounded.
pub fn to_toc_time(epoch_time: Option<f64>) -> u64 {
    let epoch_time = epoch_time.unwrap_or_else(|| {
        let now = Utc::now();
        now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 / 1e9
    });
    ((epoch_time + FILETIME_EPOCH_OFFSET as f64) * TICKS_PER_SECOND as f64) as u64
}

/// One module record in the TOC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub attributes: u32,
    /// FILETIME ticks
    pub time: u64,
    pub size: u32,
    /// Address of the null-terminated module name
    pub name_ptr: u32,
    pub e32_ptr: u32,
    pub o32_ptr: u32,
    pub load_ptr: u32,
}

impl TocEntry {
    /// Entry stamped with the current time and default attributes
    pub fn new(size: u32, name_ptr: u32) -> Self {
        Self::with_epoch_time(size, name_ptr, None)
    }

    pub fn with_epoch_time(size: u32, name_ptr: u32, epoch_time: Option<f64>) -> Self {
        TocEntry {
            attributes: DEFAULT_ATTRIBUTES,
            time: to_toc_time(epoch_time),
            size,
            name_ptr,
            e32_ptr: 0,
            o32_ptr: 0,
            load_ptr: 0,
        }
    }

    /// Set the timestamp from a calendar time, exact to the tick
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        let ticks = (time.timestamp() + FILETIME_EPOCH_OFFSET) * TICKS_PER_SECOND
            + (time.timestamp_subsec_nanos() / 100) as i64;
        self.time = ticks.max(0) as u64;
        self
    }

    pub fn to_bytes(&self) -> [u8; TOC_ENTRY_SIZE] {
        let mut bytes = [0u8; TOC_ENTRY_SIZE];
        bytes[0..4].copy_from_slice(&self.attributes.to_le_bytes());
        bytes[4..12].copy_from_slice(&self.time.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.size.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.name_ptr.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.e32_ptr.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.o32_ptr.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.load_ptr.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; TOC_ENTRY_SIZE]) -> Self {
        let mut time = [0u8; 8];
        time.copy_from_slice(&bytes[4..12]);

        TocEntry {
            attributes: u32_at(bytes, 0),
            time: u64::from_le_bytes(time),
            size: u32_at(bytes, 12),
            name_ptr: u32_at(bytes, 16),
            e32_ptr: u32_at(bytes, 20),
            o32_ptr: u32_at(bytes, 24),
            load_ptr: u32_at(bytes, 28),
        }
    }
}

/// ROMHDR summary record plus the TOC entries that follow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomHeader {
    pub phys_first: u32,
    /// Must be set to the end of the ROMHDR once its size is known
    pub phys_last: u32,
    pub params: RomHeaderParams,
    num_mods: u32,
    // Always equal to num_mods here; real WinCE images may differ
    num_files: u32,
    entries: Vec<TocEntry>,
}

impl RomHeader {
    pub fn new(phys_first: u32) -> Self {
        Self::with_params(phys_first, RomHeaderParams::default())
    }

    pub fn with_params(phys_first: u32, params: RomHeaderParams) -> Self {
        RomHeader {
            phys_first,
            phys_last: 0,
            params,
            num_mods: 0,
            num_files: 0,
            entries: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, entry: TocEntry) {
        self.entries.push(entry);
        self.num_mods += 1;
        self.num_files += 1;
    }

    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    pub fn num_mods(&self) -> u32 {
        self.num_mods
    }

    pub fn num_files(&self) -> u32 {
        self.num_files
    }

    /// Serialized length of the ROMHDR and all entries
    pub fn size(&self) -> usize {
        ROMHDR_SIZE + self.entries.len() * TOC_ENTRY_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let p = &self.params;
        let mut bytes = Vec::with_capacity(self.size());

        for field in [
            p.dll_first,
            p.dll_last,
            self.phys_first,
            self.phys_last,
            self.num_mods,
            p.ram_start,
            p.ram_free,
            p.ram_end,
            p.copy_entries,
            p.copy_offset,
            p.profile_len,
            p.profile_offset,
            self.num_files,
            p.kernel_flags,
            p.fs_ram_percent,
            p.driv_glob_start,
            p.driv_glob_len,
        ] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes.extend_from_slice(&p.cpu_type.to_le_bytes());
        bytes.extend_from_slice(&p.misc_flags.to_le_bytes());
        for field in [p.extensions_ptr, p.tracking_start, p.tracking_len] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }

        for entry in &self.entries {
            bytes.extend_from_slice(&entry.to_bytes());
        }

        bytes
    }

    /// Decode a ROMHDR and the `num_mods` entries after it
    ///
    /// Returns `None` if `bytes` is too short for the entries it declares.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ROMHDR_SIZE {
            return None;
        }
        let u32_field = |index: usize| u32_at(bytes, index * 4);
        let u16_at = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);

        let params = RomHeaderParams {
            dll_first: u32_field(0),
            dll_last: u32_field(1),
            ram_start: u32_field(5),
            ram_free: u32_field(6),
            ram_end: u32_field(7),
            copy_entries: u32_field(8),
            copy_offset: u32_field(9),
            profile_len: u32_field(10),
            profile_offset: u32_field(11),
            kernel_flags: u32_field(13),
            fs_ram_percent: u32_field(14),
            driv_glob_start: u32_field(15),
            driv_glob_len: u32_field(16),
            cpu_type: u16_at(68),
            misc_flags: u16_at(70),
            extensions_ptr: u32_at(bytes, 72),
            tracking_start: u32_at(bytes, 76),
            tracking_len: u32_at(bytes, 80),
        };
        let num_mods = u32_field(4);

        let entries = bytes[ROMHDR_SIZE..]
            .chunks_exact(TOC_ENTRY_SIZE)
            .take(num_mods as usize)
            .map(|chunk| {
                let mut entry = [0u8; TOC_ENTRY_SIZE];
                entry.copy_from_slice(chunk);
                TocEntry::from_bytes(&entry)
            })
            .collect::<Vec<_>>();
        if entries.len() != num_mods as usize {
            return None;
        }

        Some(RomHeader {
            phys_first: u32_field(2),
            phys_last: u32_field(3),
            params,
            num_mods,
            num_files: u32_field(12),
            entries,
        })
    }
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
