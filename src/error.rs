// Unified error type for the updater, the bootloader client, and the
// hex parser. Every fallible operation in the crate returns this.

use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::NvError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// SET_FEATURE accepted fewer bytes than the frame holds.
    #[error("SET_FEATURE wrote {sent} of {expected} bytes")]
    Write { sent: usize, expected: usize },

    /// GET_FEATURE returned fewer bytes than the protocol frame size.
    #[error("GET_FEATURE returned {received} of {expected} bytes")]
    Read { received: usize, expected: usize },

    /// The endpoint has been closed or was never opened.
    #[error("device endpoint is not connected")]
    NotConnected,

    /// A status reply carried a mode tag this tool does not know.
    #[error("unrecognized status sentinel 0x{0:04X}")]
    UnknownSentinel(u16),

    /// A ReadMem reply declared a payload longer than the frame can hold.
    #[error("ReadMem reply declared {length} payload bytes, at most {max} fit")]
    ReplyLength { length: usize, max: usize },

    /// SanityCheck found the part not answering as a programmable device.
    #[error("device did not pass the bootloader sanity check")]
    BootloaderNotReady,

    /// The device reported an error in its status frame.
    #[error("device reported: {0}")]
    Device(NvError),

    #[error("firmware file not found: {0}")]
    HexNoFile(PathBuf),

    #[error("firmware file is corrupted: {0}")]
    HexCorrupt(String),

    #[error(transparent)]
    Hid(#[from] hidapi::HidError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Negative category code for this failure, used as the process
    /// exit status (truncated mod 256 by the OS).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Write { .. } => -6,
            Self::Read { .. } | Self::UnknownSentinel(_) => -5,
            Self::HexNoFile(_) => -101,
            Self::HexCorrupt(_) => -102,
            _ => -1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
