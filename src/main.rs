//! Cirque touchpad firmware update CLI.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use cirque_fw_update::devdata::DevData;
use cirque_fw_update::{find_cirque_devices, update_firmware, BootloaderClient, RecordList, Result};

mod cli;
use cli::{Cli, Commands};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Update { fw_file, device } => update(&device, &fw_file),
        Commands::Version { device } => version(&device),
        Commands::Info { device } => info(&device),
        Commands::RawData { device } => raw_data(device.as_deref()),
        Commands::List => list(),
        Commands::Preparse { fw_file, output } => preparse(&fw_file, &output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            // Negative category codes; the OS truncates them mod 256.
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn update(device: &str, fw_file: &Path) -> Result<()> {
    println!(
        "Updating device {device} with firmware from {}",
        fw_file.display()
    );
    update_firmware(device, fw_file)?;
    println!("Firmware update successful.");
    Ok(())
}

fn version(device: &str) -> Result<()> {
    let mut client = BootloaderClient::open(device)?;
    let info = client.get_version_info()?;
    println!("{:02X}.{:02X}", info.rev >> 8, info.rev & 0xFF);
    Ok(())
}

fn info(device: &str) -> Result<()> {
    println!("Querying device {device}");
    let mut client = BootloaderClient::open(device)?;
    let info = client.get_version_info()?;
    println!(
        "  1: VID {:04X}  PID {:04X}  REV {:04X}",
        info.vid, info.pid, info.rev
    );
    Ok(())
}

fn raw_data(device: Option<&str>) -> Result<()> {
    let devices = match device {
        Some(path) => vec![path.to_owned()],
        None => find_cirque_devices()?
            .into_iter()
            .map(|d| d.path)
            .collect(),
    };

    for path in devices {
        println!("Querying device {path}");
        match dump_one(&path) {
            Ok(report) => print!("{report}"),
            Err(e) => eprintln!("  skipped {path}: {e}"),
        }
    }
    Ok(())
}

fn dump_one(path: &str) -> Result<String> {
    let mut client = BootloaderClient::open(path)?;
    client.sanity_check()?;
    DevData::new(&mut client)?.dump_report()
}

fn list() -> Result<()> {
    let devices = find_cirque_devices()?;
    if devices.is_empty() {
        println!("No Cirque devices found.");
        return Ok(());
    }
    for d in devices {
        println!(
            "{}  VID={:04x} PID={:04x}  {}",
            d.path,
            d.vid,
            d.pid,
            d.product.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn preparse(fw_file: &Path, output: &Path) -> Result<()> {
    let records = RecordList::load(fw_file)?;
    records.write_bin(output)?;
    println!(
        "Wrote {} records to {}",
        records.records.len(),
        output.display()
    );
    Ok(())
}
