//! nk-bin command line
//!
//! Build an NK.bin around a raw executable, patch a new executable into an
//! existing image, or list what an image contains.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nk_bin::{
    build_image_file, patch_image_file, read_block, read_summary, verify_image_file, ImageBuilder,
    PatchOptions, PlatformConfig, RomHeader,
};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "nk-bin")]
#[command(about = "Generate and patch WinCE NK.bin boot images")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a new image around a raw executable
    Build {
        /// Executable to boot
        exe: PathBuf,

        /// Output image
        #[arg(short, long, default_value = "NK.bin")]
        output: PathBuf,

        /// TOML file overriding the platform layout
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Replace the executable inside an existing image
    Patch {
        /// New executable; must not be larger than the old one
        exe: PathBuf,

        /// Image to patch in place
        #[arg(short, long, default_value = "NK.bin")]
        image: PathBuf,

        /// Address of the block to patch [default: executable address]
        #[arg(short, long, value_parser = parse_address)]
        address: Option<u32>,

        /// Offset inside the block where the new bytes start
        #[arg(long, default_value = "0", value_parser = parse_offset)]
        offset: usize,
    },

    /// List the blocks of an image
    Info {
        #[arg(default_value = "NK.bin")]
        image: PathBuf,

        /// Also check every block checksum
        #[arg(long)]
        verify: bool,

        /// TOML file with the platform layout, used to locate the ROMHDR
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Parse an address given in hex (`0x88201000`) or decimal
fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid address '{}': {}", s, e))
}

fn parse_offset(s: &str) -> Result<usize, String> {
    parse_address(s).map(|offset| offset as usize)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PlatformConfig> {
    match path {
        Some(path) => PlatformConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path)),
        None => Ok(PlatformConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Build { exe, output, config } => {
            let config = load_config(config.as_deref())?;
            let payload = std::fs::read(&exe).with_context(|| format!("Failed to read {:?}", exe))?;

            build_image_file(&output, &payload, &ImageBuilder::new(config))
                .with_context(|| format!("Failed to build {:?}", output))?;
            info!("Wrote {:?}", output);
        }
        Command::Patch {
            exe,
            image,
            address,
            offset,
        } => {
            let replacement =
                std::fs::read(&exe).with_context(|| format!("Failed to read {:?}", exe))?;
            let defaults = PatchOptions::default();
            let options = PatchOptions {
                address: address.unwrap_or(defaults.address),
                offset,
            };

            let report = patch_image_file(&image, &replacement, &options)
                .with_context(|| format!("Failed to patch {:?}", image))?;
            info!(
                "Patched block {:#010x} at file offset {}",
                report.block.address(),
                report.block.offset
            );
        }
        Command::Info {
            image,
            verify,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let summary =
                read_summary(&image).with_context(|| format!("Failed to read {:?}", image))?;

            println!(
                "start {:#010x}  length {:#x}",
                summary.header.start_address, summary.header.total_length
            );
            for block in &summary.blocks {
                println!(
                    "  {:#010x}  {:>8} bytes  checksum {:#010x}  (offset {})",
                    block.address(),
                    block.len(),
                    block.frame.checksum,
                    block.offset
                );
            }
            match summary.exec_address {
                Some(exec) => println!("exec  {:#010x}", exec),
                None => println!("exec  (missing)"),
            }

            if let Ok(body) = read_block(&image, config.romhdr_address) {
                if let Some(romhdr) = RomHeader::from_bytes(&body) {
                    println!(
                        "ROMHDR  phys {:#010x}..{:#010x}  modules {}",
                        romhdr.phys_first,
                        romhdr.phys_last,
                        romhdr.num_mods()
                    );
                    for entry in romhdr.entries() {
                        println!(
                            "  module {:>8} bytes  name @ {:#010x}  time {}",
                            entry.size, entry.name_ptr, entry.time
                        );
                    }
                }
            }

            if verify {
                let bad: Vec<_> = verify_image_file(&image)?
                    .into_iter()
                    .filter(|check| !check.is_valid())
                    .collect();
                for check in &bad {
                    println!(
                        "checksum mismatch at {:#010x}: stored {:#010x}, actual {:#010x}",
                        check.block.address(),
                        check.block.frame.checksum,
                        check.actual
                    );
                }
                if !bad.is_empty() {
                    bail!("{} block(s) failed checksum verification", bad.len());
                }
                println!("all checksums ok");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x88201000"), Ok(0x8820_1000));
        assert_eq!(parse_address("0X8820_1000"), Ok(0x8820_1000));
        assert_eq!(parse_address("4096"), Ok(4096));
        assert!(parse_address("0xZZ").is_err());
        assert!(parse_address("").is_err());
    }
}
