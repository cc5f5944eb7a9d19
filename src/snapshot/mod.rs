//! Snapshot recognition and program identity.
//!
//! A snapshot is an `ar` archive whose first member is named `toit`. A
//! `uuid` member carries the 16 raw bytes of the program id, which keys the
//! snapshot cache and lets stack traces from a device be matched back to the
//! program that produced them.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Name of the first member of every snapshot.
pub const SNAPSHOT_MARKER: &str = "toit";
/// Name of the member holding the program id.
pub const UUID_ENTRY: &str = "uuid";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to open '{}'", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a snapshot file: '{}'", path.display())]
    NotAnArtifact { path: PathBuf },

    #[error("did not include UUID: '{}'", path.display())]
    MissingProgramId { path: PathBuf },

    #[error("UUID in snapshot too short: '{}'", path.display())]
    CorruptProgramId { path: PathBuf },
}

/// 128-bit program identity embedded in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(Uuid);

impl ProgramId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

/// Lowercase hyphenated form, e.g. `0f6c...-...`.
impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for ProgramId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Whether `path` is a snapshot: `ar` magic followed by a `toit` member.
///
/// Never fails; unreadable files are simply not snapshots.
pub fn is_snapshot(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut archive = ar::Archive::new(BufReader::new(file));
    let is_snapshot = matches!(
        archive.next_entry(),
        Some(Ok(entry)) if entry.header().identifier() == SNAPSHOT_MARKER.as_bytes()
    );
    is_snapshot
}

/// Extract the program id from the snapshot at `path`.
pub fn program_id(path: &Path) -> Result<ProgramId, SnapshotError> {
    let file = File::open(path).map_err(|source| SnapshotError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = ar::Archive::new(BufReader::new(file));

    let mut read_any = false;
    loop {
        let mut entry = match archive.next_entry() {
            Some(Ok(entry)) => entry,
            None | Some(Err(_)) if read_any => {
                return Err(SnapshotError::MissingProgramId {
                    path: path.to_path_buf(),
                })
            }
            None | Some(Err(_)) => {
                return Err(SnapshotError::NotAnArtifact {
                    path: path.to_path_buf(),
                })
            }
        };
        read_any = true;

        if entry.header().identifier() == UUID_ENTRY.as_bytes() {
            let mut raw = [0u8; 16];
            entry
                .read_exact(&mut raw)
                .map_err(|_| SnapshotError::CorruptProgramId {
                    path: path.to_path_buf(),
                })?;
            return Ok(ProgramId::from_bytes(raw));
        }
    }
}

/// `ar` archive holding `members` in order.
#[cfg(test)]
pub(crate) fn build_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = ar::Builder::new(Vec::new());
    for (name, data) in members {
        let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
        builder.append(&header, *data).unwrap();
    }
    builder.into_inner().unwrap()
}
