//! Deploying a program to a running device.
//!
//! ```text
//! input ──► snapshot? ──no──► Compiler ──┐
//!              │yes                      ▼
//!              └──────────────────► program id ──► SnapshotCache::commit
//!                                                          │
//!                     DeviceChannel ◄── PayloadBuilder ◄───┘
//! ```
//!
//! The compiler, payload builder and device channel are collaborators behind
//! traits; [`crate::sdk::Sdk`] and [`crate::device::HttpDevice`] are the real
//! implementations.

mod defines;

pub use defines::{DefineError, Defines};

use std::error::Error as StdError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheError, SnapshotCache};
use crate::cancel::CancelToken;
use crate::process;
use crate::snapshot::{self, ProgramId, SnapshotError};

/// Prefix of the per-deployment scratch directory.
pub const SCRATCH_PREFIX: &str = "jag_run";

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Turns source code into a snapshot.
pub trait Compiler {
    /// Compile `source` into a snapshot written to `output`.
    ///
    /// The compiler prints its own diagnostics.
    fn compile(&self, cancel: &CancelToken, source: &Path, output: &Path) -> Result<()>;
}

/// Turns a cached snapshot into the bytes a device runs.
pub trait PayloadBuilder {
    fn build_payload(&self, cancel: &CancelToken, snapshot: &Path, id: &ProgramId)
        -> Result<Vec<u8>>;
}

/// Connection to a running device.
pub trait DeviceChannel {
    /// Human readable device name used in progress output.
    fn name(&self) -> &str;

    fn send_code(
        &self,
        cancel: &CancelToken,
        request: &Request,
        payload: &[u8],
        defines: Option<&Defines>,
    ) -> Result<()>;
}

/// What the device should do with the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Replace the currently running program.
    Run,
    /// Install as a named container that survives reboots.
    Install { name: String },
}

impl Request {
    /// Device endpoint for this request.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Run => "/run",
            Self::Install { .. } => "/install",
        }
    }

    /// Container name, empty for plain runs.
    pub fn container_name(&self) -> &str {
        match self {
            Self::Run => "",
            Self::Install { name } => name,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("no such file or directory: '{}'", path.display())]
    InputNotFound { path: PathBuf },

    #[error("can't stat file '{}'", path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't run directory: '{}'", path.display())]
    InputIsDirectory { path: PathBuf },

    #[error("failed to create scratch directory")]
    Scratch(#[source] io::Error),

    #[error("compilation of '{}' failed", path.display())]
    CompilationFailed {
        path: PathBuf,
        /// The compiler ran and printed its own diagnostics.
        reported: bool,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to build payload from '{}'", path.display())]
    PayloadFailed {
        path: PathBuf,
        reported: bool,
        #[source]
        source: BoxError,
    },

    #[error("failed to send code to '{device}'")]
    SendFailed {
        device: String,
        #[source]
        source: BoxError,
    },
}

impl DeployError {
    /// The user has already seen what went wrong.
    ///
    /// True only when a tool ran and printed its own diagnostics, or when the
    /// deployer printed the device error itself. A tool that could not be
    /// started or was cancelled still needs its error shown.
    pub fn already_reported(&self) -> bool {
        match self {
            Self::CompilationFailed { reported, .. } | Self::PayloadFailed { reported, .. } => {
                *reported
            }
            Self::SendFailed { .. } => true,
            _ => false,
        }
    }
}

/// Outcome of a successful deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub program_id: ProgramId,
    pub snapshot: PathBuf,
    pub payload_len: usize,
}

/// Drives one deployment through its collaborators.
pub struct Deployer<'a> {
    cache: &'a SnapshotCache,
    compiler: &'a dyn Compiler,
    payload: &'a dyn PayloadBuilder,
    device: &'a dyn DeviceChannel,
    cancel: CancelToken,
}

impl<'a> Deployer<'a> {
    pub fn new(
        cache: &'a SnapshotCache,
        compiler: &'a dyn Compiler,
        payload: &'a dyn PayloadBuilder,
        device: &'a dyn DeviceChannel,
    ) -> Self {
        Self {
            cache,
            compiler,
            payload,
            device,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Deploy `input`, a snapshot or a source file, to the device.
    pub fn deploy(
        &self,
        input: &Path,
        request: &Request,
        defines: Option<&Defines>,
    ) -> Result<Deployment, DeployError> {
        check_input(input)?;

        match request {
            Request::Run => println!(
                "Running '{}' on '{}' ...",
                input.display(),
                self.device.name()
            ),
            Request::Install { name } => println!(
                "Installing container '{}' from '{}' on '{}' ...",
                name,
                input.display(),
                self.device.name()
            ),
        }

        // Owns the compiler output; removed on every return path.
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map_err(DeployError::Scratch)?;

        let source_snapshot = if snapshot::is_snapshot(input) {
            debug!("'{}' is already a snapshot", input.display());
            input.to_path_buf()
        } else {
            let output = scratch.path().join(format!("{SCRATCH_PREFIX}.snapshot"));
            self.compiler
                .compile(&self.cancel, input, &output)
                .map_err(|err| DeployError::CompilationFailed {
                    path: input.to_path_buf(),
                    reported: process::tool_failed(&err),
                    source: err.into(),
                })?;
            output
        };

        let program_id = snapshot::program_id(&source_snapshot)?;
        let cached = self.cache.commit(&source_snapshot, &program_id)?;
        debug!("program {program_id} cached at {}", cached.display());

        let payload = self
            .payload
            .build_payload(&self.cancel, &cached, &program_id)
            .map_err(|err| DeployError::PayloadFailed {
                path: cached.clone(),
                reported: process::tool_failed(&err),
                source: err.into(),
            })?;

        if let Err(err) = self
            .device
            .send_code(&self.cancel, request, &payload, defines)
        {
            println!("Error: {err:#}");
            return Err(DeployError::SendFailed {
                device: self.device.name().to_string(),
                source: err.into(),
            });
        }

        println!(
            "Success: Sent {}KB code to '{}'",
            payload.len() / 1024,
            self.device.name()
        );
        Ok(Deployment {
            program_id,
            snapshot: cached,
            payload_len: payload.len(),
        })
    }
}

fn check_input(input: &Path) -> Result<(), DeployError> {
    match fs::metadata(input) {
        Ok(meta) if meta.is_dir() => Err(DeployError::InputIsDirectory {
            path: input.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(DeployError::InputNotFound {
            path: input.to_path_buf(),
        }),
        Err(source) => Err(DeployError::InputUnreadable {
            path: input.to_path_buf(),
            source,
        }),
    }
}
