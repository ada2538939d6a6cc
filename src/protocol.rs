// Cirque bootloader feature-report protocol definitions.
//
// Every frame is [report_id, opcode, fields...] little-endian, zero-padded
// to REPORT_LENGTH before SET_FEATURE. Get-Status and ReadMem replies come
// back as REPORT_LENGTH-byte GET_FEATURE transfers.

use std::fmt;

/// Protocol frame size for every padded transfer.
pub const REPORT_LENGTH: usize = 531;

/// Report id the bootloader answers on.
pub const DEFAULT_REPORT_ID: u8 = 7;

/// Cirque's USB vendor id, used for device discovery.
pub const CIRQUE_VID: u16 = 0x0488;

/// Bootloader command opcodes
pub mod cmd {
    pub const WRITE: u8 = 0;
    pub const FLUSH: u8 = 1;
    pub const VALIDATE: u8 = 2;
    pub const RESET: u8 = 3;
    pub const FORMAT_IMAGE: u8 = 4;
    pub const FORMAT_REGION: u8 = 5;
    pub const INVOKE_BL: u8 = 6;
    pub const WRITE_MEM: u8 = 7;
    pub const READ_MEM: u8 = 8;

    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            WRITE => "WRITE",
            FLUSH => "FLUSH",
            VALIDATE => "VALIDATE",
            RESET => "RESET",
            FORMAT_IMAGE => "FORMAT_IMAGE",
            FORMAT_REGION => "FORMAT_REGION",
            INVOKE_BL => "INVOKE_BL",
            WRITE_MEM => "WRITE_MEM",
            READ_MEM => "READ_MEM",
            _ => "UNKNOWN",
        }
    }
}

/// Well-known memory addresses on the part
pub mod addr {
    /// Start of the version block (vid/pid/revision/...).
    pub const VERSION_BLOCK: u32 = 0x2000_080A;
    /// One past the version block; the byte here is the endian flag.
    pub const ENDIAN_FLAG: u32 = 0x2000_0824;
    /// Four bytes that must read {00, 08, 00, 20} on a healthy part.
    pub const SANITY_MAGIC: u32 = 0x2000_0800;
    /// Expected contents of SANITY_MAGIC.
    pub const SANITY_MAGIC_BYTES: [u8; 4] = [0x00, 0x08, 0x00, 0x20];
    /// 30-bit firmware revision plus dirty/branch flags.
    pub const FW_REVISION: u32 = 0x2000_0810;
}

/// Sentinels reported while application firmware is running.
pub const APP_SENTINELS: [u16; 3] = [0x5AC3, 0x6D49, 0x426C];

/// Sentinels reported while the resident bootloader is running.
pub const BOOTLOADER_SENTINELS: [u16; 2] = [0xC35A, 0x6C42];

/// Which program answered the last Get-Status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Application,
    Bootloader,
}

/// Error codes the device reports in its status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvError {
    None,
    NotInitialized,
    SectorOutOfRange,
    OffsetOutOfRange,
    NullPtr,
    Timeout,
    Unknown,
    NoRecentImage,
    AccessViolation,
    ProtectionViolation,
    MisalignedAddress,
    CmdUnknown,
    ChksumMismatch,
    /// Code outside the documented range.
    Unrecognized(u8),
}

impl NvError {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::NotInitialized,
            2 => Self::SectorOutOfRange,
            3 => Self::OffsetOutOfRange,
            4 => Self::NullPtr,
            5 => Self::Timeout,
            6 => Self::Unknown,
            7 => Self::NoRecentImage,
            8 => Self::AccessViolation,
            9 => Self::ProtectionViolation,
            10 => Self::MisalignedAddress,
            11 => Self::CmdUnknown,
            12 => Self::ChksumMismatch,
            other => Self::Unrecognized(other),
        }
    }
}

impl fmt::Display for NvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "no error"),
            Self::NotInitialized => write!(f, "flash manager not initialized"),
            Self::SectorOutOfRange => write!(f, "sector out of range"),
            Self::OffsetOutOfRange => write!(f, "offset out of range"),
            Self::NullPtr => write!(f, "null pointer"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unknown => write!(f, "unknown error"),
            Self::NoRecentImage => write!(f, "no recent image"),
            Self::AccessViolation => write!(f, "access violation"),
            Self::ProtectionViolation => write!(f, "protection violation"),
            Self::MisalignedAddress => write!(f, "misaligned address"),
            Self::CmdUnknown => write!(f, "command unknown"),
            Self::ChksumMismatch => write!(f, "checksum mismatch"),
            Self::Unrecognized(code) => write!(f, "unrecognized error code {code}"),
        }
    }
}

/// Flash image layouts the part supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    Single = 0,
    Dual = 1,
}

/// Which flash image is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveImage {
    None,
    One,
    Two,
}

/// Scope of an asynchronous image validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationType {
    Headers = 0,
    EntireImage = 1,
}

/// Decoded Get-Status reply.
#[derive(Debug, Clone, Copy)]
pub struct BootloaderStatus {
    pub sentinel: u16,
    pub version: u8,
    pub last_error: NvError,
    pub flags: u8,
    pub image_layout: ImageLayout,
    pub active_image: ActiveImage,
    pub busy: bool,
    pub image_valid: bool,
    pub force: bool,
    /// Largest indivisible write, in bytes. Zero before status version 8.
    pub atomic_write_size: u8,
    /// Microseconds the part needs per written byte. Zero before version 8.
    pub byte_write_delay_us: u8,
    /// Region format delay in ms per KiB. Zero before version 8.
    pub region_format_delay_ms_per_1k: u8,
}

impl BootloaderStatus {
    /// Decode a status frame. `buf[0]` is the report id; the sentinel
    /// starts at `buf[1]`. Returns `None` when the sentinel is not one
    /// of the recognized mode tags.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 9 {
            return None;
        }
        let sentinel = u16::from_le_bytes([buf[1], buf[2]]);
        if !APP_SENTINELS.contains(&sentinel) && !BOOTLOADER_SENTINELS.contains(&sentinel) {
            return None;
        }

        let version = buf[3];
        let flags = buf[5];

        let (atomic_write_size, byte_write_delay_us, region_format_delay_ms_per_1k) =
            if version >= 0x08 {
                (buf[6], buf[7], buf[8])
            } else {
                (0, 0, 0)
            };

        Some(Self {
            sentinel,
            version,
            last_error: NvError::from_raw(buf[4]),
            flags,
            image_layout: if flags & 0x01 != 0 {
                ImageLayout::Dual
            } else {
                ImageLayout::Single
            },
            active_image: match (flags >> 1) & 0x03 {
                0 => ActiveImage::None,
                1 => ActiveImage::One,
                _ => ActiveImage::Two,
            },
            busy: flags & 0x08 != 0,
            image_valid: flags & 0x10 != 0,
            force: flags & 0x20 != 0,
            atomic_write_size,
            byte_write_delay_us,
            region_format_delay_ms_per_1k,
        })
    }

    pub fn mode(&self) -> DeviceMode {
        if BOOTLOADER_SENTINELS.contains(&self.sentinel) {
            DeviceMode::Bootloader
        } else {
            DeviceMode::Application
        }
    }
}

/// Device identity read from the version block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub vid: u16,
    pub pid: u16,
    pub rev: u16,
}
