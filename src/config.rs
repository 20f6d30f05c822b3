//! Platform layout configuration
//!
//! The addresses and ROMHDR constants below come from a known-good NK.bin
//! for the target device. They are passthrough values: nothing here is
//! computed, and most of the ROMHDR fields only matter to a real WinCE
//! kernel. Any of them can be overridden from a TOML file:
//!
//! ```toml
//! load_base = 0x88200000
//! exe_offset = 0x1000
//! module_name = "nk.exe"
//!
//! [romhdr]
//! cpu_type = 0x1C2
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_LOAD_BASE: u32 = 0x8820_0000;
pub const DEFAULT_EXE_OFFSET: u32 = 0x1000;
pub const DEFAULT_EXE_ADDRESS: u32 = DEFAULT_LOAD_BASE + DEFAULT_EXE_OFFSET;
pub const DEFAULT_NAME_ADDRESS: u32 = 0x88A0_0000;
pub const DEFAULT_ROMHDR_ADDRESS: u32 = 0x88E7_B130;

/// ARM branch forward by 0x1000 (`b #0x1000`)
pub const DEFAULT_JUMP_STUB: [u8; 4] = [0xFE, 0x03, 0x00, 0xEA];

pub const ROMHDR_SIGNATURE: [u8; 4] = *b"ECEC";

/// Where the fixed records of an image go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Address of the jump stub and the start of the image
    pub load_base: u32,

    /// Payload position relative to `load_base`; also the entry point
    pub exe_offset: u32,

    /// Address of the module name string
    pub name_address: u32,

    /// Address of the ROMHDR and its TOC entries
    pub romhdr_address: u32,

    /// Offset from `load_base` of the "ECEC" + ROMHDR address record
    pub romhdr_pointer_offset: u32,

    /// Offset from `load_base` of the pTOC (ROMHDR address relative to `load_base`)
    pub toc_pointer_offset: u32,

    pub jump_stub: [u8; 4],

    pub module_name: String,

    pub romhdr: RomHeaderParams,
}

impl PlatformConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file; keys left out keep their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Loading platform config from {:?}", path.as_ref());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn exe_address(&self) -> Option<u32> {
        self.load_base.checked_add(self.exe_offset)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            load_base: DEFAULT_LOAD_BASE,
            exe_offset: DEFAULT_EXE_OFFSET,
            name_address: DEFAULT_NAME_ADDRESS,
            romhdr_address: DEFAULT_ROMHDR_ADDRESS,
            romhdr_pointer_offset: 0x40,
            toc_pointer_offset: 0x48,
            jump_stub: DEFAULT_JUMP_STUB,
            module_name: "nk.exe".to_string(),
            romhdr: RomHeaderParams::default(),
        }
    }
}

/// Opaque ROMHDR fields, emitted verbatim
///
/// `phys_first`, `phys_last` and the module/file counts are not here: the
/// image assembler derives those from the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RomHeaderParams {
    pub dll_first: u32,
    pub dll_last: u32,
    pub ram_start: u32,
    pub ram_free: u32,
    pub ram_end: u32,
    pub copy_entries: u32,
    pub copy_offset: u32,
    pub profile_len: u32,
    pub profile_offset: u32,
    pub kernel_flags: u32,
    pub fs_ram_percent: u32,
    pub driv_glob_start: u32,
    pub driv_glob_len: u32,
    pub cpu_type: u16,
    pub misc_flags: u16,
    /// Points nowhere valid in generated images
    pub extensions_ptr: u32,
    pub tracking_start: u32,
    pub tracking_len: u32,
}

impl Default for RomHeaderParams {
    fn default() -> Self {
        RomHeaderParams {
            dll_first: 0x01EE_01EE,
            dll_last: 0x0200_0000,
            ram_start: 0x88E8_0000,
            ram_free: 0x88EE_A000,
            ram_end: 0x8C00_0000,
            copy_entries: 0,
            copy_offset: 0,
            profile_len: 0,
            profile_offset: 0,
            kernel_flags: 0x2,
            fs_ram_percent: 0x0303_0303,
            driv_glob_start: 0,
            driv_glob_len: 0,
            cpu_type: 0x1C2,
            misc_flags: 0x2,
            extensions_ptr: 0x8820_2F60,
            tracking_start: 0,
            tracking_len: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NkBinError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PlatformConfig::default();
        assert_eq!(config.exe_address(), Some(0x8820_1000));
        assert_eq!(config.exe_address(), Some(DEFAULT_EXE_ADDRESS));
        assert_eq!(config.module_name, "nk.exe");
        assert_eq!(config.romhdr.cpu_type, 0x1C2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PlatformConfig::from_toml_str(
            r#"
            exe_offset = 0x2000
            module_name = "boot.exe"

            [romhdr]
            ram_end = 0x8D000000
            "#,
        )
        .unwrap();

        assert_eq!(config.exe_offset, 0x2000);
        assert_eq!(config.module_name, "boot.exe");
        assert_eq!(config.load_base, DEFAULT_LOAD_BASE);
        assert_eq!(config.romhdr.ram_end, 0x8D00_0000);
        assert_eq!(config.romhdr.ram_start, 0x88E8_0000);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            PlatformConfig::from_toml_str("").unwrap(),
            PlatformConfig::default()
        );
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            PlatformConfig::from_toml_str("load_base = \"high\""),
            Err(NkBinError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name_address = 0x88B00000").unwrap();

        let config = PlatformConfig::load(file.path()).unwrap();
        assert_eq!(config.name_address, 0x88B0_0000);
    }

    #[test]
    fn test_exe_address_overflow() {
        let config = PlatformConfig {
            load_base: 0xFFFF_F000,
            exe_offset: 0x2000,
            ..PlatformConfig::default()
        };
        assert_eq!(config.exe_address(), None);
    }
}
