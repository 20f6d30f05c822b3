//! File-level operations on NK.bin images
//!
//! Each function opens the file, performs one operation and closes it again;
//! no handle outlives the call.

use crate::error::Result;
use crate::image::ImageBuilder;
use crate::patch::{patch_block, PatchOptions, PatchReport};
use crate::reader::{BlockCheck, ContainerReader, ContainerSummary};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::info;

/// Create (or truncate) `path` and write an image for `payload` into it
pub fn build_image_file<P: AsRef<Path>>(path: P, payload: &[u8], builder: &ImageBuilder) -> Result<()> {
    info!("Building image {:?}", path.as_ref());

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;

    let file = builder.build(file, payload)?;
    file.sync_all()?;
    Ok(())
}

/// Replace part of the block at `options.address` in an existing image
///
/// The file is left untouched if the block is missing or too small.
pub fn patch_image_file<P: AsRef<Path>>(
    path: P,
    replacement: &[u8],
    options: &PatchOptions,
) -> Result<PatchReport> {
    info!("Patching image {:?}", path.as_ref());

    let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
    let report = patch_block(&mut file, replacement, options)?;
    file.sync_all()?;
    Ok(report)
}

pub fn read_summary<P: AsRef<Path>>(path: P) -> Result<ContainerSummary> {
    ContainerReader::open(File::open(path)?)?.summary()
}

pub fn verify_image_file<P: AsRef<Path>>(path: P) -> Result<Vec<BlockCheck>> {
    ContainerReader::open(File::open(path)?)?.verify()
}

/// Body of the block at `address`
pub fn read_block<P: AsRef<Path>>(path: P, address: u32) -> Result<Vec<u8>> {
    let mut reader = ContainerReader::open(File::open(path)?)?;
    let block = reader.find_block(address)?;
    reader.read_body(&block)
}
