// HID feature-report transport.
//
// The bootloader client only needs synchronous SET_FEATURE / GET_FEATURE
// on one report buffer, so that pair is the whole endpoint contract.
// Production code talks to hidraw through hidapi; tests substitute mock
// endpoints that model the device state machine.

use std::ffi::CString;

use hidapi::{HidApi, HidDevice};

use crate::error::{Error, Result};
use crate::protocol;

/// Synchronous feature-report endpoint.
///
/// A return value equal to the buffer length means the transfer
/// completed; the client treats anything less as a transport failure.
pub trait FeatureEndpoint {
    /// Submit a SET_FEATURE transfer. `buf[0]` is the report id.
    fn set_feature(&mut self, buf: &[u8]) -> Result<usize>;

    /// Fill `buf` from a GET_FEATURE transfer. `buf[0]` names the
    /// report id to fetch and is overwritten by the reply.
    fn get_feature(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// hidraw-backed endpoint.
pub struct RawHidEndpoint {
    device: HidDevice,
}

impl RawHidEndpoint {
    /// Open a HID node (e.g. `/dev/hidraw0`) for exclusive use.
    pub fn open(device_path: &str) -> Result<Self> {
        let api = HidApi::new()?;
        let path = CString::new(device_path)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let device = api.open_path(&path)?;
        Ok(Self { device })
    }
}

impl FeatureEndpoint for RawHidEndpoint {
    fn set_feature(&mut self, buf: &[u8]) -> Result<usize> {
        // hidapi reports short writes as errors, so success means the
        // whole frame went out.
        self.device.send_feature_report(buf)?;
        Ok(buf.len())
    }

    fn get_feature(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.device.get_feature_report(buf)?)
    }
}

/// One discovered Cirque HID node.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub path: String,
    pub vid: u16,
    pub pid: u16,
    pub product: Option<String>,
}

/// Enumerate HID nodes whose vendor id is Cirque's (0x0488).
pub fn find_cirque_devices() -> Result<Vec<DiscoveredDevice>> {
    let api = HidApi::new()?;
    let mut devices = Vec::new();

    for info in api.device_list() {
        if info.vendor_id() != protocol::CIRQUE_VID {
            continue;
        }
        let path = info.path().to_string_lossy().to_string();
        // hidapi lists one entry per usage; one node is enough for us.
        if devices.iter().any(|d: &DiscoveredDevice| d.path == path) {
            continue;
        }
        devices.push(DiscoveredDevice {
            path,
            vid: info.vendor_id(),
            pid: info.product_id(),
            product: info.product_string().map(str::to_owned),
        });
    }

    Ok(devices)
}
