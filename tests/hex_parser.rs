//! File-level scenarios for the firmware image loader: Intel-HEX text,
//! record coalescing, and the preparsed binary cache round-trip.

use std::fs;
use std::path::PathBuf;

use cirque_fw_update::{Error, HexRecord, RecordList};

/// Unique scratch path per test so parallel runs don't collide.
fn scratch(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "cirque_fw_update_{name}_{}",
        std::process::id()
    ));
    let _ = fs::remove_file(&path);
    path
}

#[test]
fn single_data_record() {
    let list = RecordList::parse_hex(
        ":100010000102030405060708090A0B0C0D0E0F1058\n:00000001FF\n",
    )
    .unwrap();

    assert_eq!(list.records.len(), 1);
    assert_eq!(list.records[0].address, 0x0010);
    assert_eq!(
        list.records[0].bytes,
        (0x01..=0x10).collect::<Vec<u8>>()
    );
}

#[test]
fn extended_linear_address_offsets_data_records() {
    let list = RecordList::parse_hex(":020000040001F9\n:01100000AA45\n:00000001FF\n").unwrap();

    assert_eq!(list.records.len(), 1);
    assert_eq!(list.records[0].address, 0x0001_1000);
    assert_eq!(list.records[0].bytes, vec![0xAA]);
}

#[test]
fn adjacent_data_records_coalesce() {
    let list = RecordList::parse_hex(concat!(
        ":100000000102030405060708090A0B0C0D0E0F1068\n",
        ":100010001112131415161718191A1B1C1D1E1F2058\n",
        ":00000001FF\n",
    ))
    .unwrap();

    assert_eq!(list.records.len(), 1);
    assert_eq!(list.records[0].address, 0x0000);
    assert_eq!(
        list.records[0].bytes,
        (0x01..=0x20).collect::<Vec<u8>>()
    );
}

#[test]
fn gap_between_data_records_keeps_them_separate() {
    let list = RecordList::parse_hex(concat!(
        ":100000000102030405060708090A0B0C0D0E0F1068\n",
        ":100020001112131415161718191A1B1C1D1E1F2048\n",
        ":00000001FF\n",
    ))
    .unwrap();

    assert_eq!(list.records.len(), 2);
    assert_eq!(list.records[0].address, 0x0000);
    assert_eq!(list.records[0].bytes.len(), 16);
    assert_eq!(list.records[1].address, 0x0020);
    assert_eq!(list.records[1].bytes.len(), 16);
}

#[test]
fn corrupt_line_fails_the_whole_parse() {
    // Valid first record, flipped checksum on the second.
    let err = RecordList::parse_hex(concat!(
        ":100000000102030405060708090A0B0C0D0E0F1068\n",
        ":100010001112131415161718191A1B1C1D1E1F2057\n",
        ":00000001FF\n",
    ))
    .unwrap_err();
    assert!(matches!(err, Error::HexCorrupt(_)));
}

#[test]
fn missing_file_reports_nofile() {
    let err = RecordList::load("/nonexistent/firmware.hex").unwrap_err();
    assert!(matches!(err, Error::HexNoFile(_)));
}

#[test]
fn hex_file_load_and_cache_round_trip() {
    let hex_path = scratch("roundtrip.hex");
    let bin_path = scratch("roundtrip.bin");

    fs::write(
        &hex_path,
        concat!(
            ":020000040001F9\n",
            ":100000000102030405060708090A0B0C0D0E0F1068\n",
            ":100010001112131415161718191A1B1C1D1E1F2058\n",
            ":04100000DEADBEEFB4\n",
            ":00000001FF\n",
        ),
    )
    .unwrap();

    let parsed = RecordList::load(&hex_path).unwrap();
    assert_eq!(parsed.records.len(), 2);
    assert_eq!(parsed.records[0].address, 0x0001_0000);
    assert_eq!(parsed.records[0].bytes.len(), 32);
    assert_eq!(parsed.records[1].address, 0x0001_1000);
    assert_eq!(parsed.records[1].bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);

    // Write the cache and read it back through the same entry point;
    // the magic sniff must route to the cache decoder.
    parsed.write_bin(&bin_path).unwrap();
    let reloaded = RecordList::load(&bin_path).unwrap();
    assert_eq!(reloaded.records, parsed.records);

    let _ = fs::remove_file(&hex_path);
    let _ = fs::remove_file(&bin_path);
}

#[test]
fn corrupted_cache_record_reports_corrupt() {
    let bin_path = scratch("corrupt.bin");

    let list = RecordList {
        records: vec![HexRecord {
            address: 0x0001_0000,
            bytes: vec![0x10, 0x20, 0x30, 0x40, 0x50],
        }],
        start_segment_address: None,
        start_linear_address: None,
    };
    list.write_bin(&bin_path).unwrap();

    // Flip one payload byte; the stored Fletcher-32 no longer matches.
    let mut raw = fs::read(&bin_path).unwrap();
    let len = raw.len();
    raw[len - 6] ^= 0x01;
    fs::write(&bin_path, raw).unwrap();

    let err = RecordList::load(&bin_path).unwrap_err();
    assert!(matches!(err, Error::HexCorrupt(_)));

    let _ = fs::remove_file(&bin_path);
}
