// Bootloader protocol client.
//
// Owns one feature-report endpoint for its lifetime and turns the
// high-level operations (status, memory access, flash management) into
// framed transfers. Frames are [report_id, opcode, fields...] in
// little-endian order, zero-padded to the 531-byte protocol frame size.
// The one exception is the ReadMem request, which goes out at its
// natural length before the full-size reply is fetched.

use tracing::debug;

use crate::checksum::{fletcher16, fletcher32};
use crate::error::{Error, Result};
use crate::hid::{FeatureEndpoint, RawHidEndpoint};
use crate::protocol::{self, addr, cmd, BootloaderStatus, ValidationType, VersionInfo};

pub struct BootloaderClient<E: FeatureEndpoint> {
    endpoint: E,
    report_id: u8,
    /// Byte order of the part, discovered by SanityCheck and flipped by
    /// the updater's one-shot retry. Affects decoding of memory reads.
    is_big_endian: bool,
    /// Status-frame schema version, cached from the last Get-Status.
    status_version: u8,
}

impl BootloaderClient<RawHidEndpoint> {
    /// Open a HID node and wrap it in a client using the default report id.
    pub fn open(device_path: &str) -> Result<Self> {
        Ok(Self::new(RawHidEndpoint::open(device_path)?))
    }
}

impl<E: FeatureEndpoint> BootloaderClient<E> {
    pub fn new(endpoint: E) -> Self {
        Self::with_report_id(endpoint, protocol::DEFAULT_REPORT_ID)
    }

    pub fn with_report_id(endpoint: E, report_id: u8) -> Self {
        Self {
            endpoint,
            report_id,
            is_big_endian: false,
            status_version: 0,
        }
    }

    pub fn is_big_endian(&self) -> bool {
        self.is_big_endian
    }

    pub fn set_big_endian(&mut self, big_endian: bool) {
        self.is_big_endian = big_endian;
    }

    /// Status version seen on the last Get-Status reply.
    pub fn status_version(&self) -> u8 {
        self.status_version
    }

    fn frame(&self, opcode: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(protocol::REPORT_LENGTH);
        buf.push(self.report_id);
        buf.push(opcode);
        buf
    }

    /// Pad to the protocol frame size and submit via SET_FEATURE.
    fn submit(&mut self, mut buf: Vec<u8>) -> Result<()> {
        buf.resize(protocol::REPORT_LENGTH, 0);
        let sent = self.endpoint.set_feature(&buf)?;
        if sent != buf.len() {
            return Err(Error::Write {
                sent,
                expected: buf.len(),
            });
        }
        Ok(())
    }

    /// Fetch a full-size reply frame. `buf[0]` carries the report id in.
    fn fetch_reply(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; protocol::REPORT_LENGTH];
        buf[0] = self.report_id;
        let received = self.endpoint.get_feature(&mut buf)?;
        if received != buf.len() {
            return Err(Error::Read {
                received,
                expected: buf.len(),
            });
        }
        Ok(buf)
    }

    /// Read and decode the device status. Also refreshes the cached
    /// status version used elsewhere in the session.
    pub fn get_status(&mut self) -> Result<BootloaderStatus> {
        let buf = self.fetch_reply()?;
        let status = BootloaderStatus::parse(&buf)
            .ok_or_else(|| Error::UnknownSentinel(u16::from_le_bytes([buf[1], buf[2]])))?;
        self.status_version = status.version;
        debug!(
            sentinel = format_args!("0x{:04X}", status.sentinel),
            version = status.version,
            error = %status.last_error,
            "status"
        );
        Ok(status)
    }

    /// Read `length` bytes of device memory at `address`.
    ///
    /// The request is submitted at its natural length; the reply comes
    /// back as a full status-shaped frame with the payload embedded at a
    /// version-dependent offset.
    pub fn extended_read(&mut self, address: u32, length: u16) -> Result<Vec<u8>> {
        let mut buf = self.frame(cmd::READ_MEM);
        buf.extend_from_slice(&address.to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());

        let sent = self.endpoint.set_feature(&buf)?;
        if sent != buf.len() {
            return Err(Error::Write {
                sent,
                expected: buf.len(),
            });
        }

        let reply = self.fetch_reply()?;
        Self::parse_read_reply(&reply)
    }

    /// Extract the payload from a ReadMem reply. The reply carries the
    /// status version byte at [3]; version 8 grew the status header by
    /// three timing bytes, shifting the payload.
    fn parse_read_reply(reply: &[u8]) -> Result<Vec<u8>> {
        let start = if reply[3] >= 0x08 { 9 } else { 6 };

        // 4 bytes address echo, 2 bytes length, then the payload.
        let length = usize::from(u16::from_le_bytes([reply[start + 4], reply[start + 5]]));
        let max = protocol::REPORT_LENGTH - start - 6;
        if length > max {
            return Err(Error::ReplyLength { length, max });
        }
        Ok(reply[start + 6..start + 6 + length].to_vec())
    }

    /// Write bytes to device memory, protected by a Fletcher-16 over the
    /// opcode, address, length, and payload.
    pub fn extended_write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let mut buf = self.frame(cmd::WRITE_MEM);
        buf.extend_from_slice(&address.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
        buf.extend_from_slice(data);
        let checksum = fletcher16(&buf[1..]);
        buf.extend_from_slice(&checksum.to_le_bytes());
        self.submit(buf)
    }

    pub fn reset(&mut self) -> Result<()> {
        debug!("reset");
        let buf = self.frame(cmd::RESET);
        self.submit(buf)
    }

    /// Ask running application firmware to hand over to the bootloader.
    pub fn invoke_bootloader(&mut self) -> Result<()> {
        debug!("invoke bootloader");
        let buf = self.frame(cmd::INVOKE_BL);
        self.submit(buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        debug!("flush");
        let buf = self.frame(cmd::FLUSH);
        self.submit(buf)
    }

    /// Declare a fresh single-layout image with `num_regions` regions.
    pub fn format_image(
        &mut self,
        num_regions: u8,
        entry_point: u32,
        i2c_address: u8,
        hid_desc_addr: u16,
    ) -> Result<()> {
        debug!(
            num_regions,
            entry_point = format_args!("0x{entry_point:08X}"),
            "format image"
        );
        let mut buf = self.frame(cmd::FORMAT_IMAGE);
        buf.push(protocol::ImageLayout::Single as u8);
        buf.push(num_regions);
        buf.extend_from_slice(&entry_point.to_le_bytes());
        buf.extend_from_slice(&hid_desc_addr.to_le_bytes());
        buf.push(i2c_address);
        buf.push(self.report_id);
        self.submit(buf)
    }

    /// Declare a region's extent and Fletcher-32. The payload itself is
    /// delivered afterwards through `write_data`, never here.
    pub fn format_region(&mut self, region_number: u8, offset: u32, data: &[u8]) -> Result<()> {
        debug!(region_number, offset = format_args!("0x{offset:08X}"), len = data.len(), "format region");
        let mut buf = self.frame(cmd::FORMAT_REGION);
        buf.push(region_number);
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&fletcher32(data).to_le_bytes());
        self.submit(buf)
    }

    /// Stream one chunk of image payload at `write_offset`.
    pub fn write_data(&mut self, write_offset: u32, data: &[u8]) -> Result<()> {
        let mut buf = self.frame(cmd::WRITE);
        buf.extend_from_slice(&write_offset.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
        self.submit(buf)
    }

    /// Kick off asynchronous verification; poll Get-Status for the result.
    pub fn validate(&mut self, validation: ValidationType) -> Result<()> {
        debug!(?validation, "validate");
        let mut buf = self.frame(cmd::VALIDATE);
        buf.push(validation as u8);
        self.submit(buf)
    }

    /// Verify the part is ready for flash management and record its byte
    /// order. Any failed check reports `BootloaderNotReady`.
    pub fn sanity_check(&mut self) -> Result<()> {
        let checks = (|| -> Result<bool> {
            let status = self.get_status()?;
            if !protocol::APP_SENTINELS.contains(&status.sentinel) {
                return Ok(false);
            }

            let magic = self.extended_read(addr::SANITY_MAGIC, 4)?;
            if magic != addr::SANITY_MAGIC_BYTES {
                return Ok(false);
            }

            let endian = self.extended_read(addr::ENDIAN_FLAG, 1)?;
            match endian.first() {
                Some(flag) => {
                    self.is_big_endian = flag & 0x01 != 0;
                    Ok(true)
                }
                None => Ok(false),
            }
        })();

        match checks {
            Ok(true) => {
                debug!(big_endian = self.is_big_endian, "sanity check passed");
                Ok(())
            }
            Ok(false) | Err(_) => Err(Error::BootloaderNotReady),
        }
    }

    /// Read the device identity from the version block. The block's own
    /// trailing byte is the authoritative endian flag for its decoding.
    pub fn get_version_info(&mut self) -> Result<VersionInfo> {
        let block_len = (addr::ENDIAN_FLAG - addr::VERSION_BLOCK + 1) as usize;
        let bytes = self.extended_read(addr::VERSION_BLOCK, block_len as u16)?;
        if bytes.len() < block_len {
            return Err(Error::Read {
                received: bytes.len(),
                expected: block_len,
            });
        }

        let word = |lo: usize, hi: usize| u16::from(bytes[lo]) | (u16::from(bytes[hi]) << 8);
        let big_endian = bytes[block_len - 1] & 0x01 != 0;
        let info = if big_endian {
            VersionInfo {
                vid: word(1, 0),
                pid: word(3, 2),
                rev: word(5, 4),
            }
        } else {
            VersionInfo {
                vid: word(0, 1),
                pid: word(2, 3),
                rev: word(4, 5),
            }
        };
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::protocol::{DEFAULT_REPORT_ID, REPORT_LENGTH};

    /// Endpoint that records every outgoing frame and plays back canned
    /// replies to GET_FEATURE.
    #[derive(Default)]
    struct ScriptedEndpoint {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
    }

    impl FeatureEndpoint for ScriptedEndpoint {
        fn set_feature(&mut self, buf: &[u8]) -> Result<usize> {
            self.sent.push(buf.to_vec());
            Ok(buf.len())
        }

        fn get_feature(&mut self, buf: &mut [u8]) -> Result<usize> {
            let reply = self.replies.pop_front().expect("unexpected GET_FEATURE");
            let n = reply.len().min(buf.len());
            buf[..n].copy_from_slice(&reply[..n]);
            Ok(reply.len())
        }
    }

    fn read_reply(version: u8, address: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; REPORT_LENGTH];
        buf[0] = DEFAULT_REPORT_ID;
        buf[1..3].copy_from_slice(&0xC35Au16.to_le_bytes());
        buf[3] = version;
        let start = if version >= 8 { 9 } else { 6 };
        buf[start..start + 4].copy_from_slice(&address.to_le_bytes());
        buf[start + 4..start + 6].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        buf[start + 6..start + 6 + payload.len()].copy_from_slice(payload);
        buf
    }

    fn client_with(replies: Vec<Vec<u8>>) -> BootloaderClient<ScriptedEndpoint> {
        BootloaderClient::new(ScriptedEndpoint {
            sent: Vec::new(),
            replies: replies.into(),
        })
    }

    #[test]
    fn header_only_commands_are_padded_to_frame_size() {
        let mut client = client_with(vec![]);
        client.reset().unwrap();
        client.flush().unwrap();
        client.invoke_bootloader().unwrap();

        let sent = &client.endpoint.sent;
        assert_eq!(sent.len(), 3);
        for frame in sent {
            assert_eq!(frame.len(), REPORT_LENGTH);
            assert_eq!(frame[0], DEFAULT_REPORT_ID);
            assert!(frame[2..].iter().all(|&b| b == 0));
        }
        assert_eq!(sent[0][1], cmd::RESET);
        assert_eq!(sent[1][1], cmd::FLUSH);
        assert_eq!(sent[2][1], cmd::INVOKE_BL);
    }

    #[test]
    fn write_mem_frame_carries_fletcher16_over_opcode_to_payload() {
        let mut client = client_with(vec![]);
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        client.extended_write(0x2000_0100, &data).unwrap();

        let frame = &client.endpoint.sent[0];
        assert_eq!(frame.len(), REPORT_LENGTH);
        assert_eq!(frame[1], cmd::WRITE_MEM);
        assert_eq!(&frame[2..6], &0x2000_0100u32.to_le_bytes());
        assert_eq!(&frame[6..8], &4u16.to_le_bytes());
        assert_eq!(&frame[8..12], &data);
        let expected = fletcher16(&frame[1..12]);
        assert_eq!(u16::from_le_bytes([frame[12], frame[13]]), expected);
        assert!(frame[14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn format_region_sends_metadata_and_checksum_but_no_payload() {
        let mut client = client_with(vec![]);
        let data = vec![0x11u8; 100];
        client.format_region(3, 0x0001_0000, &data).unwrap();

        let frame = &client.endpoint.sent[0];
        assert_eq!(frame.len(), REPORT_LENGTH);
        assert_eq!(frame[1], cmd::FORMAT_REGION);
        assert_eq!(frame[2], 3);
        assert_eq!(&frame[3..7], &0x0001_0000u32.to_le_bytes());
        assert_eq!(&frame[7..11], &100u32.to_le_bytes());
        assert_eq!(
            u32::from_le_bytes([frame[11], frame[12], frame[13], frame[14]]),
            fletcher32(&data)
        );
        // Nothing but zero padding follows the checksum.
        assert!(frame[15..].iter().all(|&b| b == 0));
    }

    #[test]
    fn format_image_frame_layout() {
        let mut client = client_with(vec![]);
        client.format_image(2, 0x0800_1234, 0x2C, 0x0020).unwrap();

        let frame = &client.endpoint.sent[0];
        assert_eq!(frame[1], cmd::FORMAT_IMAGE);
        assert_eq!(frame[2], protocol::ImageLayout::Single as u8);
        assert_eq!(frame[3], 2);
        assert_eq!(&frame[4..8], &0x0800_1234u32.to_le_bytes());
        assert_eq!(&frame[8..10], &0x0020u16.to_le_bytes());
        assert_eq!(frame[10], 0x2C);
        assert_eq!(frame[11], DEFAULT_REPORT_ID);
    }

    #[test]
    fn read_mem_request_goes_out_at_natural_length() {
        let payload = [1u8, 2, 3, 4];
        let mut client = client_with(vec![read_reply(0x08, 0x2000_0800, &payload)]);
        let out = client.extended_read(0x2000_0800, 4).unwrap();
        assert_eq!(out, payload);

        let request = &client.endpoint.sent[0];
        assert_eq!(request.len(), 9);
        assert_eq!(request[1], cmd::READ_MEM);
        assert_eq!(&request[2..6], &0x2000_0800u32.to_le_bytes());
        assert_eq!(&request[6..8], &4u16.to_le_bytes());
    }

    #[test]
    fn read_reply_offset_depends_on_status_version() {
        let payload = [0xAAu8, 0xBB];
        let mut client = client_with(vec![
            read_reply(0x07, 0x100, &payload),
            read_reply(0x09, 0x100, &payload),
        ]);
        assert_eq!(client.extended_read(0x100, 2).unwrap(), payload);
        assert_eq!(client.extended_read(0x100, 2).unwrap(), payload);
    }

    #[test]
    fn oversized_read_reply_length_is_a_protocol_error() {
        let mut reply = read_reply(0x08, 0x100, &[]);
        // Claim more payload than fits in the frame after offset 9.
        reply[13..15].copy_from_slice(&520u16.to_le_bytes());
        let mut client = client_with(vec![reply]);
        match client.extended_read(0x100, 4) {
            Err(Error::ReplyLength { length: 520, .. }) => {}
            other => panic!("expected ReplyLength error, got {other:?}"),
        }
    }

    #[test]
    fn short_status_read_is_a_transport_error() {
        struct ShortRead;
        impl FeatureEndpoint for ShortRead {
            fn set_feature(&mut self, buf: &[u8]) -> Result<usize> {
                Ok(buf.len())
            }
            fn get_feature(&mut self, _buf: &mut [u8]) -> Result<usize> {
                Ok(64)
            }
        }
        let mut client = BootloaderClient::new(ShortRead);
        match client.get_status() {
            Err(Error::Read { received: 64, .. }) => {}
            other => panic!("expected Read error, got {other:?}"),
        }
    }

    #[test]
    fn version_info_decodes_both_byte_orders() {
        let block_len = (addr::ENDIAN_FLAG - addr::VERSION_BLOCK + 1) as usize;

        // Little-endian block: vid 0x0488, pid 0x1234, rev 0x0102.
        let mut le_block = vec![0u8; block_len];
        le_block[0..2].copy_from_slice(&0x0488u16.to_le_bytes());
        le_block[2..4].copy_from_slice(&0x1234u16.to_le_bytes());
        le_block[4..6].copy_from_slice(&0x0102u16.to_le_bytes());
        le_block[block_len - 1] = 0x00;

        // The same identity as a big-endian part reports it.
        let mut be_block = vec![0u8; block_len];
        be_block[0..2].copy_from_slice(&0x0488u16.to_be_bytes());
        be_block[2..4].copy_from_slice(&0x1234u16.to_be_bytes());
        be_block[4..6].copy_from_slice(&0x0102u16.to_be_bytes());
        be_block[block_len - 1] = 0x01;

        let expected = VersionInfo {
            vid: 0x0488,
            pid: 0x1234,
            rev: 0x0102,
        };

        let mut client = client_with(vec![read_reply(0x08, addr::VERSION_BLOCK, &le_block)]);
        assert_eq!(client.get_version_info().unwrap(), expected);

        let mut client = client_with(vec![read_reply(0x08, addr::VERSION_BLOCK, &be_block)]);
        assert_eq!(client.get_version_info().unwrap(), expected);
    }
}
