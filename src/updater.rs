// Firmware-update sequencing.
//
// Drives the bootloader client through the full programming sequence:
// status/error recovery, bootloader invocation, image and region
// formatting, payload streaming, flush, validation, and the final
// reset. The sleeps between steps are device flash timing, not polling
// substitutes; a Get-Status follows every delay so device-reported
// errors are never missed.

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::bootloader::BootloaderClient;
use crate::error::{Error, Result};
use crate::hexfile::RecordList;
use crate::hid::FeatureEndpoint;
use crate::protocol::{DeviceMode, NvError, ValidationType};

/// Largest WriteData payload per frame. Even, and a multiple of four.
pub const MAX_DATA_PAYLOAD: usize = 520;

/// Fixed settle time after FormatImage.
const FORMAT_IMAGE_DELAY_MS: u64 = 100;
/// Region-format delay per KiB when the device predates version 8.
const DEFAULT_REGION_FORMAT_DELAY_MS_PER_1K: u64 = 50;
/// Per-byte write delay when the device predates version 8.
const DEFAULT_BYTE_WRITE_DELAY_US: u64 = 10;
/// Settle time after Reset and InvokeBootloader.
const MODE_CHANGE_DELAY_MS: u64 = 100;
/// Settle time after Flush and Validate.
const SETTLE_DELAY_MS: u64 = 10;

/// Result of one programming pass; a post-Validate checksum mismatch is
/// the only recoverable outcome.
enum PassOutcome {
    Complete,
    ChecksumMismatch,
}

pub struct Updater<E: FeatureEndpoint> {
    client: BootloaderClient<E>,
}

impl<E: FeatureEndpoint> Updater<E> {
    pub fn new(client: BootloaderClient<E>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BootloaderClient<E> {
        &self.client
    }

    /// Release the underlying client, e.g. to query version info after
    /// an update.
    pub fn into_client(self) -> BootloaderClient<E> {
        self.client
    }

    /// Program the record list onto the device.
    ///
    /// When the sanity check cannot determine the part's byte order the
    /// updater assumes little-endian and arms a one-shot retry: a
    /// checksum mismatch reported after Validate flips the assumed
    /// endianness and re-runs the pass from the status check. A second
    /// mismatch is terminal.
    pub fn run(&mut self, records: &RecordList) -> Result<()> {
        let mut endian_retry = match self.client.sanity_check() {
            Ok(()) => false,
            Err(_) => {
                debug!("sanity check failed; assuming little-endian with one retry");
                self.client.set_big_endian(false);
                true
            }
        };

        loop {
            match self.program_once(records)? {
                PassOutcome::Complete => {
                    info!("firmware update successful");
                    return Ok(());
                }
                PassOutcome::ChecksumMismatch if endian_retry => {
                    endian_retry = false;
                    let flipped = !self.client.is_big_endian();
                    info!(big_endian = flipped, "checksum mismatch; retrying with flipped endianness");
                    self.client.set_big_endian(flipped);
                }
                PassOutcome::ChecksumMismatch => {
                    return Err(Error::Device(NvError::ChksumMismatch));
                }
            }
        }
    }

    /// One full programming pass (status check through final reset).
    fn program_once(&mut self, records: &RecordList) -> Result<PassOutcome> {
        let mut status = self.client.get_status()?;

        // A stale error blocks everything; one reset may clear it.
        if status.last_error != NvError::None {
            info!(error = %status.last_error, "clearing stale device error");
            self.client.reset()?;
            sleep_ms(MODE_CHANGE_DELAY_MS);
            status = self.client.get_status()?;
            if status.last_error != NvError::None {
                return Err(Error::Device(status.last_error));
            }
        }

        if status.mode() == DeviceMode::Application {
            info!("device is running application firmware; invoking bootloader");
            self.client.invoke_bootloader()?;
            sleep_ms(MODE_CHANGE_DELAY_MS);
            status = self.client.get_status()?;
        }

        let (region_delay_ms_per_1k, byte_delay_us) = if status.version >= 0x08 {
            (
                u64::from(status.region_format_delay_ms_per_1k),
                u64::from(status.byte_write_delay_us),
            )
        } else {
            (
                DEFAULT_REGION_FORMAT_DELAY_MS_PER_1K,
                DEFAULT_BYTE_WRITE_DELAY_US,
            )
        };
        debug!(
            format_image_ms = FORMAT_IMAGE_DELAY_MS,
            region_ms_per_1k = region_delay_ms_per_1k,
            byte_us = byte_delay_us,
            "timing values"
        );

        let first = records
            .records
            .first()
            .ok_or_else(|| Error::HexCorrupt("image has no data records".into()))?;
        if first.bytes.len() < 8 {
            return Err(Error::HexCorrupt(
                "first record too short to hold an entry point".into(),
            ));
        }
        let entry_point = u32::from_le_bytes(first.bytes[4..8].try_into().unwrap());

        let num_regions = records.records.len();
        if num_regions > usize::from(u8::MAX) {
            return Err(Error::HexCorrupt(format!(
                "image has {num_regions} regions, at most 255 fit"
            )));
        }

        // Version 9 parts keep their own i2c / HID descriptor settings.
        let (i2c_address, hid_desc_addr) = if status.version >= 0x09 {
            (0xFF, 0xFFFF)
        } else {
            (0x2C, 0x0020)
        };

        info!(
            num_regions,
            entry_point = format_args!("0x{entry_point:08X}"),
            "formatting image"
        );
        self.client
            .format_image(num_regions as u8, entry_point, i2c_address, hid_desc_addr)?;
        sleep_ms(FORMAT_IMAGE_DELAY_MS);

        for (i, record) in records.records.iter().enumerate() {
            self.client
                .format_region(i as u8, record.address, &record.bytes)?;
            let kib = (record.bytes.len() as u64).div_ceil(1024);
            sleep_ms(region_delay_ms_per_1k * kib);
            self.require_clean_status()?;
        }

        for record in &records.records {
            info!(
                address = format_args!("0x{:08X}", record.address),
                len = record.bytes.len(),
                "writing region data"
            );
            for (i, chunk) in record.bytes.chunks(MAX_DATA_PAYLOAD).enumerate() {
                let offset = record.address + (i * MAX_DATA_PAYLOAD) as u32;
                self.client.write_data(offset, chunk)?;
                sleep_us((byte_delay_us * chunk.len() as u64).max(1000));
                self.require_clean_status()?;
            }
        }

        self.client.flush()?;
        sleep_ms(SETTLE_DELAY_MS);
        self.require_clean_status()?;
        debug!("flush complete");

        self.client.validate(ValidationType::EntireImage)?;
        sleep_ms(SETTLE_DELAY_MS);
        match self.client.get_status()?.last_error {
            NvError::None => debug!("validation complete"),
            NvError::ChksumMismatch => return Ok(PassOutcome::ChecksumMismatch),
            error => return Err(Error::Device(error)),
        }

        self.client.reset()?;
        sleep_ms(MODE_CHANGE_DELAY_MS);
        self.require_clean_status()?;

        Ok(PassOutcome::Complete)
    }

    fn require_clean_status(&mut self) -> Result<()> {
        let status = self.client.get_status()?;
        if status.last_error != NvError::None {
            return Err(Error::Device(status.last_error));
        }
        Ok(())
    }
}

/// Update a device from an Intel-HEX file (or preparsed cache).
pub fn update_firmware(device_path: &str, hex_path: &Path) -> Result<()> {
    let client = BootloaderClient::open(device_path)?;

    let records = RecordList::load(hex_path)?;
    info!(
        file = %hex_path.display(),
        records = records.records.len(),
        "parsed firmware image"
    );

    Updater::new(client).run(&records)
}

fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

fn sleep_us(us: u64) {
    thread::sleep(Duration::from_micros(us));
}
