//! ESP32 partition table parsing.
//!
//! The toolchain ships a `partitions.csv` describing where every region of
//! device flash lives. Each data line has five columns:
//!
//! ```text
//! # Name,   Type, SubType, Offset,  Size
//! nvs,      data, nvs,     0x9000,  0x6000
//! otadata,  data, ota,     0xd000,  0x2000
//! ota_0,    app,  ota_0,   0x10000, 0x1a0000
//! ```
//!
//! A non-empty subtype replaces the name as the lookup key, so the OTA
//! selector above is addressed as `ota`, not `otadata`.
//!
//! The bootloader and the partition table itself are usually commented out in
//! the csv because their placement is fixed; [`PartitionLayout::defaults`]
//! provides them and [`PartitionLayout::merge`] lets the file override them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// File name of the partition table inside a toolchain directory.
pub const PARTITIONS_CSV: &str = "partitions.csv";

pub const BOOTLOADER: &str = "bootloader";
pub const PARTITION_TABLE: &str = "partitions";
pub const OTA_SELECTOR: &str = "ota";
pub const OTA_0: &str = "ota_0";
pub const NVS: &str = "nvs";

const COLUMN_NAME: usize = 0;
const COLUMN_SUBTYPE: usize = 2;
const COLUMN_POSITION: usize = 3;
const COLUMN_SIZE: usize = 4;

/// Errors produced while loading a partition table.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("could not open partition table '{}'", path.display())]
    MissingPartitionTable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed partition table '{}' line {line}: {problem}", path.display())]
    MalformedPartitionTable {
        path: PathBuf,
        line: usize,
        problem: Malformed,
    },
}

/// What was wrong with a partition table line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Malformed {
    #[error("missing fields (found {found}, expected 5)")]
    MissingFields { found: usize },

    #[error("could not parse number '{value}' in column {column}")]
    InvalidNumber { column: usize, value: String },

    #[error("column {column} has a value but the partition has no name")]
    Unnamed { column: usize },
}

/// One data line of the partition table, keyed by its resolved name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// Resolved flash positions and sizes, keyed by partition name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionLayout {
    positions: BTreeMap<String, u32>,
    sizes: BTreeMap<String, u32>,
}

impl PartitionLayout {
    /// Fixed regions that partition tables normally leave out.
    pub fn defaults() -> Self {
        let mut layout = Self::default();
        layout.insert(PartitionEntry {
            name: BOOTLOADER.to_string(),
            offset: 0x1000,
            size: 0x7000,
        });
        layout.insert(PartitionEntry {
            name: PARTITION_TABLE.to_string(),
            offset: 0x8000,
            size: 0x0c00,
        });
        layout
    }

    /// Build a layout from entries in file order; later entries win.
    pub fn from_entries(entries: impl IntoIterator<Item = PartitionEntry>) -> Self {
        let mut layout = Self::default();
        for entry in entries {
            layout.insert(entry);
        }
        layout
    }

    /// Layer `overrides` on top of `base`. Keys present in `overrides` win.
    pub fn merge(base: Self, overrides: Self) -> Self {
        let mut merged = base;
        merged.positions.extend(overrides.positions);
        merged.sizes.extend(overrides.sizes);
        merged
    }

    pub fn insert(&mut self, entry: PartitionEntry) {
        self.positions.insert(entry.name.clone(), entry.offset);
        self.sizes.insert(entry.name, entry.size);
    }

    pub fn position(&self, name: &str) -> Option<u32> {
        self.positions.get(name).copied()
    }

    pub fn size(&self, name: &str) -> Option<u32> {
        self.sizes.get(name).copied()
    }
}

/// Load `<toolchain_dir>/partitions.csv` layered over the built-in defaults.
pub fn load_from_toolchain(toolchain_dir: &Path) -> Result<PartitionLayout, PartitionError> {
    parse_file(&toolchain_dir.join(PARTITIONS_CSV))
}

/// Parse a partition table file layered over the built-in defaults.
pub fn parse_file(path: &Path) -> Result<PartitionLayout, PartitionError> {
    let text = fs::read_to_string(path).map_err(|source| PartitionError::MissingPartitionTable {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = parse_entries(&text).map_err(|(line, problem)| {
        PartitionError::MalformedPartitionTable {
            path: path.to_path_buf(),
            line,
            problem,
        }
    })?;
    Ok(PartitionLayout::merge(
        PartitionLayout::defaults(),
        PartitionLayout::from_entries(entries),
    ))
}

/// Parse every data line of a partition table.
///
/// Errors carry the 1-based line number.
pub fn parse_entries(text: &str) -> Result<Vec<PartitionEntry>, (usize, Malformed)> {
    let mut entries = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        if let Some(entry) = parse_line(raw).map_err(|problem| (index + 1, problem))? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Parse a single line. Comments and blank lines yield `Ok(None)`.
pub fn parse_line(raw: &str) -> Result<Option<PartitionEntry>, Malformed> {
    let line = match raw.find('#') {
        Some(comment) => &raw[..comment],
        None => raw,
    }
    .trim();
    if line.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let mut name = "";
    let mut offset = None;
    let mut size = None;

    for (column, &field) in fields.iter().enumerate() {
        match column {
            COLUMN_NAME => name = field,
            COLUMN_SUBTYPE if !field.is_empty() => name = field,
            COLUMN_POSITION | COLUMN_SIZE => {
                if name.is_empty() {
                    return Err(Malformed::Unnamed { column });
                }
                let value = parse_number(field).ok_or_else(|| Malformed::InvalidNumber {
                    column,
                    value: field.to_string(),
                })?;
                if column == COLUMN_POSITION {
                    offset = Some(value);
                } else {
                    size = Some(value);
                }
            }
            _ => {}
        }
    }

    match (offset, size) {
        (Some(offset), Some(size)) => Ok(Some(PartitionEntry {
            name: name.to_string(),
            offset,
            size,
        })),
        _ => Err(Malformed::MissingFields {
            found: fields.len(),
        }),
    }
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_number(field: &str) -> Option<u32> {
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE: &str = "\
# Name,   Type, SubType, Offset,  Size
# bootloader,,,0x1000,0x7000
nvs,      data, nvs,     0x9000,  0x6000
otadata,  data, ota,     0xd000,  0x2000   # selector
phy_init, data, phy,     0xf000,  0x1000
ota_0,    app,  ota_0,   0x10000, 0x1a0000
";

    #[test]
    fn parses_subtype_keys() {
        let layout = PartitionLayout::from_entries(parse_entries(TABLE).unwrap());
        assert_eq!(layout.position("nvs"), Some(0x9000));
        assert_eq!(layout.size("nvs"), Some(0x6000));
        assert_eq!(layout.position("ota"), Some(0xd000));
        assert_eq!(layout.position("otadata"), None);
        assert_eq!(layout.position("phy"), Some(0xf000));
        assert_eq!(layout.size("ota_0"), Some(0x1a0000));
    }

    #[test]
    fn name_used_when_subtype_empty() {
        let entry = parse_line("factory, app, , 65536, 1048576").unwrap().unwrap();
        assert_eq!(entry.name, "factory");
        assert_eq!(entry.offset, 0x10000);
        assert_eq!(entry.size, 0x100000);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        assert_eq!(parse_line("   # just a comment").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("  \t ").unwrap(), None);
    }

    #[test]
    fn short_line_is_missing_fields() {
        assert_eq!(
            parse_line("nvs, data, nvs, 0x9000").unwrap_err(),
            Malformed::MissingFields { found: 4 }
        );
        assert_eq!(
            parse_line("nvs").unwrap_err(),
            Malformed::MissingFields { found: 1 }
        );
    }

    #[test]
    fn bad_number_reports_column() {
        assert_eq!(
            parse_line("nvs, data, nvs, 0xZZ, 0x6000").unwrap_err(),
            Malformed::InvalidNumber {
                column: 3,
                value: "0xZZ".to_string()
            }
        );
        assert!(matches!(
            parse_line("nvs, data, nvs, 0x9000, -1"),
            Err(Malformed::InvalidNumber { column: 4, .. })
        ));
    }

    #[test]
    fn position_without_name_fails() {
        assert_eq!(
            parse_line(", data, , 0x9000, 0x6000").unwrap_err(),
            Malformed::Unnamed { column: 3 }
        );
    }

    #[test]
    fn extra_columns_are_ignored() {
        let entry = parse_line("nvs, data, nvs, 0x9000, 0x6000, encrypted")
            .unwrap()
            .unwrap();
        assert_eq!(entry.name, "nvs");
    }

    #[test]
    fn later_lines_override_earlier() {
        let text = "nvs,data,nvs,0x9000,0x6000\nnvs,data,nvs,0xa000,0x4000\n";
        let layout = PartitionLayout::from_entries(parse_entries(text).unwrap());
        assert_eq!(layout.position("nvs"), Some(0xa000));
        assert_eq!(layout.size("nvs"), Some(0x4000));
    }

    #[test]
    fn distinct_keys_are_order_independent() {
        let forward = parse_entries(TABLE).unwrap();
        let mut reversed_lines: Vec<&str> = TABLE.lines().collect();
        reversed_lines.reverse();
        let backward = parse_entries(&reversed_lines.join("\n")).unwrap();
        assert_eq!(
            PartitionLayout::from_entries(forward),
            PartitionLayout::from_entries(backward)
        );
    }

    #[test]
    fn error_line_numbers_are_one_based() {
        let (line, problem) = parse_entries("# header\nnvs,data,nvs,0x9000,0x6000\nbroken\n")
            .unwrap_err();
        assert_eq!(line, 3);
        assert_eq!(problem, Malformed::MissingFields { found: 1 });
    }

    #[test]
    fn file_overrides_defaults() {
        let base = PartitionLayout::defaults();
        let file = PartitionLayout::from_entries(vec![PartitionEntry {
            name: BOOTLOADER.to_string(),
            offset: 0x0,
            size: 0x8000,
        }]);
        let merged = PartitionLayout::merge(base, file);
        assert_eq!(merged.position(BOOTLOADER), Some(0x0));
        assert_eq!(merged.size(BOOTLOADER), Some(0x8000));
        assert_eq!(merged.position(PARTITION_TABLE), Some(0x8000));
    }

    #[test]
    fn numbers_accept_hex_in_either_case_and_decimal() {
        assert_eq!(parse_number("0x9000"), Some(0x9000));
        assert_eq!(parse_number("0XD000"), Some(0xd000));
        assert_eq!(parse_number("4096"), Some(4096));
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("nine"), None);
    }

    #[test]
    fn defaults_only_cover_fixed_regions() {
        let defaults = PartitionLayout::defaults();
        assert_eq!(defaults.position(BOOTLOADER), Some(0x1000));
        assert_eq!(defaults.position(PARTITION_TABLE), Some(0x8000));
        assert_eq!(defaults.position(OTA_SELECTOR), None);
        assert_eq!(defaults.position(NVS), None);
    }

    #[test]
    fn load_from_toolchain_reads_csv() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PARTITIONS_CSV), TABLE).unwrap();
        let layout = load_from_toolchain(tmp.path()).unwrap();
        assert_eq!(layout.position(BOOTLOADER), Some(0x1000));
        assert_eq!(layout.position(OTA_0), Some(0x10000));
    }

    #[test]
    fn missing_file_is_missing_table() {
        let tmp = TempDir::new().unwrap();
        let err = load_from_toolchain(tmp.path()).unwrap_err();
        assert!(matches!(err, PartitionError::MissingPartitionTable { .. }));
    }

    #[test]
    fn malformed_file_names_path_and_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("table.csv");
        fs::write(&path, "nvs,data,nvs,0x9000,0x6000\nota,data,ota,0xd000\n").unwrap();
        match parse_file(&path).unwrap_err() {
            PartitionError::MalformedPartitionTable {
                path: bad, line, ..
            } => {
                assert_eq!(bad, path);
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
