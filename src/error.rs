use thiserror::Error;

use crate::combo::Role;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no gadget matches `{pattern}`")]
    PatternNotFound { pattern: String },

    #[error("role `{0}` is not bound")]
    RoleUnbound(Role),

    #[error("conflicting roles: {0}")]
    RoleConflict(String),

    #[error("malformed pattern template: {0}")]
    Template(String),

    #[error("shellcode byte {value:#04x} (offset {offset}) was not found in executable code")]
    ByteUnavailable { offset: usize, value: u8 },

    #[error(
        ".got + .got.plt = {} bytes ({got} + {gotplt}) but the shellcode is {required} bytes",
        .got + .gotplt
    )]
    CapacityInsufficient { got: u64, gotplt: u64, required: u64 },

    #[error("unsupported word width: {0} bytes (use 4 or 8)")]
    UnsupportedWordWidth(usize),

    #[error("{len} bytes do not fit in a {max}-byte block")]
    LengthExceeded { len: usize, max: usize },

    #[error("value {value:#x} does not fit in a {width}-byte word")]
    ValueTooWide { value: u64, width: usize },

    #[error("string of {len} bytes contains a NUL byte")]
    InteriorNul { len: usize },

    #[error("execve needs at least the program path")]
    EmptyArgv,

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
