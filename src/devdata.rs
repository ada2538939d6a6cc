// Diagnostic sensor-image reader ("dev data").
//
// Layered on the bootloader client's memory operations only: each image
// kind lives behind a request/length/payload window at 0x3000_0000, and
// normal touch feeds are suppressed while images are gathered so the
// measurement buffers stay still.

use std::fmt::Write as _;
use std::thread;
use std::time::Duration;

use crate::bootloader::BootloaderClient;
use crate::error::{Error, Result};
use crate::hid::FeatureEndpoint;

/// Touchpad (x, y) electrode counts.
const DIMENSIONS_ADDR: u32 = 0x2001_080C;
/// Logical scaling flags; bit 0 inverts X, bit 1 inverts Y.
const LOGICAL_SCALAR_FLAGS_ADDR: u32 = 0x2008_0018;
/// 30-bit firmware revision with dirty/branch flags in the top bits.
const FW_REVISION_ADDR: u32 = 0x2000_0810;
/// Feed configuration and control registers.
const FEED_CFG2_ADDR: u32 = 0x200E_0009;
const FEED_CONTROL_ADDR: u32 = 0x200E_000A;
/// Base of the image request windows.
const IMAGE_WINDOW_BASE: u32 = 0x3000_0000;
/// Largest single image read.
const MAX_IMAGE_TRANSFER: u16 = 256;

/// The four sensor images the firmware can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Current compensation matrix.
    Compensation,
    /// Live raw measurements (pre-demux).
    RawMeasurement,
    /// Live uncompensated image.
    Uncompensated,
    /// Live compensated image.
    Compensated,
}

impl ImageKind {
    pub const ALL: [ImageKind; 4] = [
        ImageKind::Compensation,
        ImageKind::RawMeasurement,
        ImageKind::Uncompensated,
        ImageKind::Compensated,
    ];

    fn window_address(self) -> u32 {
        let index: u32 = match self {
            ImageKind::Compensation => 1,
            ImageKind::RawMeasurement => 2,
            ImageKind::Uncompensated => 3,
            ImageKind::Compensated => 4,
        };
        IMAGE_WINDOW_BASE + (index << 16)
    }

    pub fn title(self) -> &'static str {
        match self {
            ImageKind::Compensation => "Current Compensation Matrix",
            ImageKind::RawMeasurement => "Live Raw Measurements",
            ImageKind::Uncompensated => "Live Uncompensated Image",
            ImageKind::Compensated => "Live Compensated Image",
        }
    }
}

/// Firmware revision with its source-control flags split out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareRevision {
    pub revision: u32,
    pub dirty: bool,
    pub branch: bool,
}

/// Sensor-image reader bound to one client session.
pub struct DevData<'a, E: FeatureEndpoint> {
    client: &'a mut BootloaderClient<E>,
    x_count: u8,
    y_count: u8,
    invert_x: bool,
    invert_y: bool,
}

impl<'a, E: FeatureEndpoint> DevData<'a, E> {
    /// Read the touchpad geometry the imager needs.
    pub fn new(client: &'a mut BootloaderClient<E>) -> Result<Self> {
        let dims = client.extended_read(DIMENSIONS_ADDR, 2)?;
        if dims.len() < 2 {
            return Err(Error::Read {
                received: dims.len(),
                expected: 2,
            });
        }

        let flags = client.extended_read(LOGICAL_SCALAR_FLAGS_ADDR, 1)?;
        let flags = *flags.first().ok_or(Error::Read {
            received: 0,
            expected: 1,
        })?;

        Ok(Self {
            client,
            x_count: dims[0],
            y_count: dims[1],
            invert_x: flags & 0x01 != 0,
            invert_y: flags & 0x02 != 0,
        })
    }

    pub fn dimensions(&self) -> (u8, u8) {
        (self.x_count, self.y_count)
    }

    /// Read the firmware revision word, per the session's byte order.
    pub fn firmware_revision(&mut self) -> Result<FirmwareRevision> {
        let bytes = self.client.extended_read(FW_REVISION_ADDR, 4)?;
        if bytes.len() < 4 {
            return Err(Error::Read {
                received: bytes.len(),
                expected: 4,
            });
        }
        let word = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let raw = if self.client.is_big_endian() {
            u32::from_be_bytes(word)
        } else {
            u32::from_le_bytes(word)
        };
        Ok(FirmwareRevision {
            revision: raw & 0x3FFF_FFFF,
            dirty: raw & 0x8000_0000 != 0,
            branch: raw & 0x4000_0000 != 0,
        })
    }

    /// Capture one image as a `y_count × x_count` matrix of i16 samples,
    /// with axis inversion already applied.
    pub fn image(&mut self, kind: ImageKind) -> Result<Vec<Vec<i16>>> {
        let window = kind.window_address();

        // Request the image, then poll the length word until the
        // firmware has staged it.
        self.client.extended_write(window, &[0x01, 0x00])?;
        let mut length = 0u16;
        while length == 0 {
            let bytes = self.client.extended_read(window, 2)?;
            if bytes.len() < 2 {
                return Err(Error::Read {
                    received: bytes.len(),
                    expected: 2,
                });
            }
            length = u16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let mut buffer = Vec::with_capacity(usize::from(length));
        let mut offset = 0u32;
        let mut remaining = length;
        while remaining != 0 {
            let n = remaining.min(MAX_IMAGE_TRANSFER);
            let chunk = self.client.extended_read(window + 2 + offset, n)?;
            buffer.extend_from_slice(&chunk);
            remaining -= n;
            offset += u32::from(n);
        }

        // Release the window for the next consumer.
        self.client.extended_write(window, &[0x00, 0x01])?;

        let samples = self.decode_samples(&buffer);
        let needed = usize::from(self.x_count) * usize::from(self.y_count);
        if samples.len() < needed {
            return Err(Error::Read {
                received: buffer.len(),
                expected: needed * 2,
            });
        }

        let mut matrix: Vec<Vec<i16>> = samples[..needed]
            .chunks(usize::from(self.x_count))
            .map(|row| row.to_vec())
            .collect();

        if self.invert_x {
            for row in &mut matrix {
                row.reverse();
            }
        }
        if self.invert_y {
            matrix.reverse();
        }
        Ok(matrix)
    }

    fn decode_samples(&self, bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|pair| {
                if self.client.is_big_endian() {
                    i16::from_be_bytes([pair[0], pair[1]])
                } else {
                    i16::from_le_bytes([pair[0], pair[1]])
                }
            })
            .collect()
    }

    /// Gather all four images with the touch feed suppressed, returning
    /// a printable report.
    pub fn dump_report(&mut self) -> Result<String> {
        let mut report = String::new();

        let rev = self.firmware_revision()?;
        let _ = writeln!(
            report,
            "  rev: {}, {} {}",
            rev.revision,
            if rev.dirty { "Dirty" } else { "Pristine" },
            if rev.branch { "Branch" } else { "Trunk" },
        );

        // Disable normal feeds while gathering data.
        let feed_cfg2 = self.read_register(FEED_CFG2_ADDR)?;
        let feed_control = self.read_register(FEED_CONTROL_ADDR)?;
        self.client
            .extended_write(FEED_CONTROL_ADDR, &[feed_control & 0xF8])?;

        // Let the touch buffer empty out.
        thread::sleep(Duration::from_millis(50));

        let result = (|| -> Result<()> {
            for kind in ImageKind::ALL {
                let image = self.image(kind)?;
                report.push_str(&format_image(kind.title(), &image));
            }
            Ok(())
        })();

        // Restore the feed control setting even when a capture failed.
        let restored = (feed_control & 0xF8) | (1 << (feed_cfg2 & 0x03));
        self.client.extended_write(FEED_CONTROL_ADDR, &[restored])?;

        result.map(|()| report)
    }

    fn read_register(&mut self, address: u32) -> Result<u8> {
        let bytes = self.client.extended_read(address, 1)?;
        bytes.first().copied().ok_or(Error::Read {
            received: 0,
            expected: 1,
        })
    }
}

/// Render one image matrix as fixed-width cells, one row per line.
pub fn format_image(title: &str, image: &[Vec<i16>]) -> String {
    let mut out = String::with_capacity(title.len() + image.len() * 8 * 8);
    out.push_str(title);
    out.push_str(":\n");
    for row in image {
        for value in row {
            let _ = write!(out, "{value:6},");
        }
        out.push('\n');
    }
    out
}
