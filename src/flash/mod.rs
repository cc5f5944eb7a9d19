//! Initial flashing of a device over serial.
//!
//! A new device gets its bootloader, partition table and a firmware image
//! configured with its identity and WiFi credentials. The OTA selector and
//! NVS partitions are overwritten with erased bytes so the device boots the
//! fresh image from `ota_0` with no stale state.

pub mod layout;
pub mod zap;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::TempPath;
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::{Paths, WifiConfig};
use crate::partitions::{self, PartitionLayout, NVS, OTA_SELECTOR};
use crate::process::Cmd;
use crate::sdk::{FirmwareConfig, Sdk};

use self::layout::{EsptoolArgs, FlashImages, FlashPlan};
use self::zap::create_zap_file;

/// What the user asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct FlashOptions {
    pub port: Option<String>,
    pub baud: u32,
    pub name: Option<String>,
    pub wifi: WifiConfig,
}

/// Identity given to the flashed device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashedDevice {
    pub id: Uuid,
    pub name: String,
}

/// Everything esptool needs. Temp files live as long as this value.
pub struct PreparedFlash {
    args: Vec<OsString>,
    _ota_zap: TempPath,
    _nvs_zap: TempPath,
}

impl PreparedFlash {
    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

/// Build zap files and the esptool argument list for `firmware`.
pub fn prepare(
    layout: &PartitionLayout,
    image_dir: &Path,
    firmware: &Path,
    port: &str,
    baud: u32,
) -> Result<PreparedFlash> {
    let ota_zap = create_zap_file(layout, OTA_SELECTOR)?;
    let nvs_zap = create_zap_file(layout, NVS)?;

    let bootloader = bootloader_path(image_dir);
    let partition_table = image_dir.join("partitions.bin");
    let plan = FlashPlan::build(
        layout,
        &FlashImages {
            bootloader: &bootloader,
            partition_table: &partition_table,
            application: firmware,
            ota_zap: &ota_zap,
            nvs_zap: &nvs_zap,
        },
    );

    Ok(PreparedFlash {
        args: EsptoolArgs::new(port, baud).to_args(&plan),
        _ota_zap: ota_zap,
        _nvs_zap: nvs_zap,
    })
}

/// Flash a brand new device and return the identity it was given.
pub fn flash_device(
    paths: &Paths,
    sdk: &Sdk,
    options: &FlashOptions,
    cancel: &CancelToken,
) -> Result<FlashedDevice> {
    let port = check_port(options.port.as_deref())?;
    let esptool = paths.esptool_path()?;
    let image_dir = paths.esp32_image_path()?;
    let toolchain = paths.toolchain_path()?;

    let layout = partitions::load_from_toolchain(&toolchain)?;
    debug!(?layout, "loaded partition table");

    let id = Uuid::new_v4();
    let name = options
        .name
        .clone()
        .unwrap_or_else(|| device_name_from_id(&id));

    let firmware = tempfile::Builder::new()
        .prefix("jag_firmware_")
        .suffix(".bin")
        .tempfile()
        .context("Failed to create firmware image file")?
        .into_temp_path();
    let config = FirmwareConfig {
        id: id.to_string(),
        name: name.clone(),
        wifi_ssid: options.wifi.ssid.clone(),
        wifi_password: options.wifi.password.clone(),
    };
    sdk.build_firmware_image(cancel, &image_dir, &config, &firmware)?;

    let prepared = prepare(&layout, &image_dir, &firmware, port, options.baud)?;

    println!("Flashing device over serial on port '{port}' ...");
    Cmd::new(&esptool)
        .args(prepared.args())
        .error_msg("Flashing failed")
        .cancel_on(cancel)
        .run_interactive()?;

    Ok(FlashedDevice { id, name })
}

fn check_port(port: Option<&str>) -> Result<&str> {
    match port.map(str::trim) {
        Some(port) if !port.is_empty() => Ok(port),
        _ => bail!("no serial port given; pass --port or set 'port' in the user config"),
    }
}

const ADJECTIVES: &[&str] = &[
    "agile", "brave", "calm", "clever", "eager", "fancy", "gentle", "happy", "jolly", "keen",
    "lively", "merry", "nimble", "proud", "quick", "quiet", "shiny", "swift", "tidy", "witty",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "bison", "crane", "eagle", "ferret", "fox", "gecko", "heron", "ibex",
    "koala", "lemur", "lynx", "moose", "otter", "panda", "puffin", "raven", "tapir", "walrus",
];

/// Readable, stable name such as `lively-fox`, derived from the device id.
pub fn device_name_from_id(id: &Uuid) -> String {
    let bytes = id.as_bytes();
    let adjective = ADJECTIVES[usize::from(bytes[0]) % ADJECTIVES.len()];
    let animal = ANIMALS[usize::from(bytes[1]) % ANIMALS.len()];
    format!("{adjective}-{animal}")
}

/// Bootloader image inside an ESP32 image directory.
pub fn bootloader_path(image_dir: &Path) -> PathBuf {
    image_dir.join("bootloader").join("bootloader.bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitions::{parse_entries, PartitionEntry};
    use std::fs;

    fn table(text: &str) -> PartitionLayout {
        PartitionLayout::merge(
            PartitionLayout::defaults(),
            PartitionLayout::from_entries(parse_entries(text).unwrap()),
        )
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn prepare_full_table() {
        let layout = table(
            "nvs, data, nvs, 0x9000, 0x6000\n\
             otadata, data, ota, 0xd000, 0x2000\n\
             ota_0, app, ota_0, 0x10000, 0x1a0000\n",
        );
        let image = Path::new("/img");
        let prepared = prepare(&layout, image, Path::new("/tmp/fw.bin"), "/dev/ttyUSB0", 921600)
            .unwrap();
        let args = strings(prepared.args());

        assert_eq!(&args[..4], ["--chip", "esp32", "--port", "/dev/ttyUSB0"]);
        let pairs = &args[18..];
        assert_eq!(pairs[0], "0x1000");
        assert_eq!(pairs[1], "/img/bootloader/bootloader.bin");
        assert_eq!(pairs[2], "0x8000");
        assert_eq!(pairs[3], "/img/partitions.bin");
        assert_eq!(pairs[4], "0x10000");
        assert_eq!(pairs[5], "/tmp/fw.bin");
        assert_eq!(pairs[6], "0xd000");
        assert!(pairs[7].ends_with(".otadata"));
        assert_eq!(pairs[8], "0x9000");
        assert!(pairs[9].ends_with(".nvsdata"));

        // The zap files exist while the prepared flash is alive.
        assert_eq!(fs::metadata(&pairs[7]).unwrap().len(), 0x2000);
        let nvs = PathBuf::from(&pairs[9]);
        drop(prepared);
        assert!(!nvs.exists());
    }

    #[test]
    fn prepare_defaults_only() {
        let layout = PartitionLayout::defaults();
        let prepared =
            prepare(&layout, Path::new("/img"), Path::new("/fw.bin"), "COM3", 115200).unwrap();
        let args = strings(prepared.args());
        assert_eq!(
            &args[18..],
            [
                "0x1000",
                "/img/bootloader/bootloader.bin",
                "0x8000",
                "/img/partitions.bin",
                "0x10000",
                "/fw.bin"
            ]
        );
        assert_eq!(args[5], "115200");
    }

    #[test]
    fn bootloader_override_is_used() {
        let mut layout = PartitionLayout::defaults();
        layout.insert(PartitionEntry {
            name: "bootloader".to_string(),
            offset: 0x0,
            size: 0x8000,
        });
        let prepared =
            prepare(&layout, Path::new("/img"), Path::new("/fw.bin"), "p", 1).unwrap();
        assert_eq!(prepared.args()[18], OsString::from("0x0"));
    }

    #[test]
    fn port_is_required() {
        assert!(check_port(None).is_err());
        assert!(check_port(Some("  ")).is_err());
        assert_eq!(check_port(Some("/dev/ttyUSB0")).unwrap(), "/dev/ttyUSB0");
    }

    #[test]
    fn names_are_stable_per_id() {
        let id: Uuid = "6f1f6a0e-2b8a-4b55-9d0e-0c6f0a7f3b11".parse().unwrap();
        let name = device_name_from_id(&id);
        assert_eq!(name, device_name_from_id(&id));
        let (adjective, animal) = name.split_once('-').unwrap();
        assert!(ADJECTIVES.contains(&adjective));
        assert!(ANIMALS.contains(&animal));
    }
}
