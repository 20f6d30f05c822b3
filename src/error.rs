use thiserror::Error;

#[derive(Error, Debug)]
pub enum NkBinError {
    #[error("Invalid magic signature: not a B000FF container")]
    InvalidMagic,

    #[error("Block at {address:#010x} starts before end of previous block ({end_address:#010x})")]
    AddressOrder { address: u32, end_address: u32 },

    #[error("{what} at {address:#010x} overlaps preceding data ending at {end_address:#010x}")]
    LayoutOrder {
        what: &'static str,
        address: u32,
        end_address: u32,
    },

    #[error("Block at {address:#010x} with length {length} overflows the 32-bit address space")]
    AddressOverflow { address: u32, length: usize },

    #[error("Address 0 is reserved for the execution record")]
    ReservedAddress,

    #[error("Block too large for a 32-bit length field: {0} bytes")]
    BlockTooLarge(usize),

    #[error("Cannot finalize container: no blocks were written")]
    EmptyContainer,

    #[error("No block found at address {0:#010x}")]
    BlockNotFound(u32),

    #[error("Replacement needs {replacement} bytes but block only has {available}")]
    ReplacementTooLarge { replacement: usize, available: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, NkBinError>;
