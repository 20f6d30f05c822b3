//! # nk-bin - WinCE boot images for custom code
//!
//! `nk-bin` writes and patches B000FF containers (the `NK.bin` format read by
//! WinCE bootloaders). A container is a header followed by address-tagged
//! blocks and a final execution record:
//!
//! - **Writer**: append blocks in address order, then backpatch the header
//! - **ROMHDR/TOC**: the directory a bootloader follows to find the payload
//! - **Image assembly**: jump stub, ROMHDR pointers, payload, name, ROMHDR
//! - **Patching**: swap a block's contents in place without moving anything
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nk_bin::{build_image_file, patch_image_file, ImageBuilder, PatchOptions, Result};
//!
//! # fn main() -> Result<()> {
//! let payload = std::fs::read("hello.bin")?;
//! build_image_file("NK.bin", &payload, &ImageBuilder::default())?;
//!
//! // Later: drop a rebuilt payload into the same image
//! let rebuilt = std::fs::read("hello.bin")?;
//! patch_image_file("NK.bin", &rebuilt, &PatchOptions::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Streams
//!
//! ```rust
//! use nk_bin::ContainerWriter;
//! use std::io::Cursor;
//!
//! # fn main() -> nk_bin::Result<()> {
//! let mut writer = ContainerWriter::new(Cursor::new(Vec::new()))?;
//! writer.add_entry(0x8820_0000, &[0xFE, 0x03, 0x00, 0xEA])?;
//! writer.set_exec_address(0x8820_1000);
//! let image = writer.finalize()?.into_inner();
//! assert_eq!(&image[..7], b"B000FF\n");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod header;
pub mod image;
pub mod io;
pub mod patch;
pub mod reader;
pub mod toc;
pub mod writer;

pub use crate::config::{PlatformConfig, RomHeaderParams};
pub use crate::error::{NkBinError, Result};
pub use crate::header::{checksum, BlockFrame, ContainerHeader};
pub use crate::image::{ImageBuilder, Section};
pub use crate::io::{build_image_file, patch_image_file, read_block, read_summary, verify_image_file};
pub use crate::patch::{patch_block, PatchOptions, PatchReport};
pub use crate::reader::{Block, BlockCheck, ContainerReader, ContainerSummary};
pub use crate::toc::{to_toc_time, RomHeader, TocEntry};
pub use crate::writer::ContainerWriter;
