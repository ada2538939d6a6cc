// Cirque touchpad firmware updater - shared library
// Bootloader protocol client, Intel-HEX parsing, and the update engine

pub mod bootloader;
pub mod checksum;
pub mod devdata;
pub mod error;
pub mod hexfile;
pub mod hid;
pub mod protocol;
pub mod updater;

pub use bootloader::BootloaderClient;
pub use devdata::{DevData, ImageKind};
pub use error::{Error, Result};
pub use hexfile::{HexRecord, RecordList};
pub use hid::{find_cirque_devices, FeatureEndpoint, RawHidEndpoint};
pub use protocol::{BootloaderStatus, DeviceMode, NvError, ValidationType, VersionInfo};
pub use updater::{update_firmware, Updater};
