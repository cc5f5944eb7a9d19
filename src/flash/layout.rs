//! Flash plan and esptool argument assembly.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::partitions::{PartitionLayout, BOOTLOADER, NVS, OTA_0, OTA_SELECTOR, PARTITION_TABLE};

/// Offset of the first application slot when the table does not name `ota_0`.
pub const DEFAULT_APP_OFFSET: u32 = 0x10000;

/// One region to write: `file` goes to flash at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRegion {
    pub offset: u32,
    pub file: PathBuf,
}

impl FlashRegion {
    fn new(offset: u32, file: &Path) -> Self {
        Self {
            offset,
            file: file.to_path_buf(),
        }
    }
}

/// Files that go into an initial flash.
#[derive(Debug, Clone, Copy)]
pub struct FlashImages<'a> {
    pub bootloader: &'a Path,
    pub partition_table: &'a Path,
    pub application: &'a Path,
    pub ota_zap: &'a Path,
    pub nvs_zap: &'a Path,
}

/// Ordered write operations for one flash invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPlan {
    regions: Vec<FlashRegion>,
}

impl FlashPlan {
    /// Bootloader, partition table, application, then the optional OTA
    /// selector and NVS zaps. Zaps are only planned when the layout resolved
    /// an offset for them.
    pub fn build(layout: &PartitionLayout, images: &FlashImages<'_>) -> Self {
        let mut regions = Vec::with_capacity(5);
        if let Some(offset) = layout.position(BOOTLOADER) {
            regions.push(FlashRegion::new(offset, images.bootloader));
        }
        if let Some(offset) = layout.position(PARTITION_TABLE) {
            regions.push(FlashRegion::new(offset, images.partition_table));
        }
        let app_offset = layout.position(OTA_0).unwrap_or(DEFAULT_APP_OFFSET);
        regions.push(FlashRegion::new(app_offset, images.application));

        // Force the bootloader to boot from ota_0.
        if let Some(offset) = layout.position(OTA_SELECTOR) {
            regions.push(FlashRegion::new(offset, images.ota_zap));
        }
        if let Some(offset) = layout.position(NVS) {
            regions.push(FlashRegion::new(offset, images.nvs_zap));
        }
        Self { regions }
    }

    pub fn regions(&self) -> &[FlashRegion] {
        &self.regions
    }
}

/// Builder for an esptool `write_flash` invocation.
#[derive(Debug, Clone)]
pub struct EsptoolArgs {
    chip: String,
    port: String,
    baud: u32,
    before: String,
    after: String,
    flash_mode: String,
    flash_freq: String,
    flash_size: String,
}

impl EsptoolArgs {
    pub fn new(port: &str, baud: u32) -> Self {
        Self {
            chip: "esp32".to_string(),
            port: port.to_string(),
            baud,
            before: "default_reset".to_string(),
            after: "hard_reset".to_string(),
            flash_mode: "dio".to_string(),
            flash_freq: "40m".to_string(),
            flash_size: "detect".to_string(),
        }
    }

    /// Full argument list: connection flags, `write_flash` flags, then one
    /// `<offset> <file>` pair per planned region.
    pub fn to_args(&self, plan: &FlashPlan) -> Vec<OsString> {
        let baud = self.baud.to_string();
        let fixed: [&str; 18] = [
            "--chip",
            self.chip.as_str(),
            "--port",
            self.port.as_str(),
            "--baud",
            baud.as_str(),
            "--before",
            self.before.as_str(),
            "--after",
            self.after.as_str(),
            "write_flash",
            "-z",
            "--flash_mode",
            self.flash_mode.as_str(),
            "--flash_freq",
            self.flash_freq.as_str(),
            "--flash_size",
            self.flash_size.as_str(),
        ];
        let mut args: Vec<OsString> = fixed.iter().map(OsString::from).collect();

        for region in plan.regions() {
            args.push(hex(region.offset).into());
            args.push(region.file.clone().into_os_string());
        }
        args
    }
}

/// Lowercase `0x`-prefixed hex.
pub fn hex(value: u32) -> String {
    format!("{value:#x}")
}
