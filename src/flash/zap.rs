//! Zap files: scratch files filled with the erased-flash byte.
//!
//! Writing one over the OTA selector makes the bootloader fall back to
//! `ota_0`; writing one over NVS drops key-value state left by an earlier
//! image.

use std::io::{self, Read, Write};

use anyhow::{Context, Result};
use tempfile::TempPath;

use crate::partitions::PartitionLayout;

/// Value of a NOR flash byte after erase.
pub const ERASED_BYTE: u8 = 0xff;

/// Create a temp file holding `size(partition)` erased bytes.
///
/// The file is deleted when the returned [`TempPath`] is dropped. If the
/// layout has no size for `partition`, a warning is logged and the file is
/// left empty.
pub fn create_zap_file(layout: &PartitionLayout, partition: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{partition}data"))
        .tempfile()
        .with_context(|| format!("Failed to create zap file for {partition}"))?;

    match layout.size(partition) {
        Some(size) => {
            let mut erased = io::repeat(ERASED_BYTE).take(u64::from(size));
            io::copy(&mut erased, file.as_file_mut())
                .and_then(|_| file.as_file_mut().flush())
                .with_context(|| {
                    format!("Failed to write zap file {}", file.path().display())
                })?;
        }
        None => {
            tracing::warn!(partition, "no size for partition, zap file left empty");
            println!("No size for {partition} partition, skipping");
        }
    }

    Ok(file.into_temp_path())
}
