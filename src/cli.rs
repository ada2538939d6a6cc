// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cirque_fw_update")]
#[command(author, version, about = "Cirque touchpad firmware update tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Flash a firmware image (Intel-HEX or preparsed cache) onto a touchpad
    #[command(visible_alias = "u")]
    Update {
        /// Firmware file (.hex, or a "Cirque" binary cache)
        fw_file: PathBuf,
        /// HID node of the touchpad (e.g. /dev/hidraw0)
        device: String,
    },

    /// Print the device firmware version as MM.mm
    #[command(visible_alias = "a")]
    Version {
        /// HID node of the touchpad
        device: String,
    },

    /// Print the device VID, PID and firmware revision
    #[command(visible_alias = "n")]
    Info {
        /// HID node of the touchpad
        device: String,
    },

    /// Dump raw diagnostic sensor images
    #[command(visible_aliases = ["raw", "r"])]
    RawData {
        /// HID node to query (all discovered Cirque devices if omitted)
        device: Option<String>,
    },

    /// List connected Cirque HID nodes
    #[command(visible_aliases = ["ls", "l"])]
    List,

    /// Convert a firmware file into the preparsed binary cache
    Preparse {
        /// Input firmware file
        fw_file: PathBuf,
        /// Cache file to write
        output: PathBuf,
    },
}
