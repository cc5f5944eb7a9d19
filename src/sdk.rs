//! The toolchain SDK: compiler, snapshot-to-image converter and firmware tool.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::executable;
use crate::deploy::{Compiler, PayloadBuilder};
use crate::process::{self, Cmd, ToolFailed};
use crate::snapshot::ProgramId;

/// Configuration baked into a freshly flashed firmware image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareConfig {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Sdk {
    root: PathBuf,
}

impl Sdk {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn compiler_path(&self) -> PathBuf {
        self.root.join("bin").join(executable("toit.compile"))
    }

    pub fn snapshot_to_image_path(&self) -> PathBuf {
        self.root.join("tools").join(executable("snapshot_to_image"))
    }

    pub fn firmware_tool_path(&self) -> PathBuf {
        self.root.join("tools").join(executable("firmware"))
    }

    /// Extract a flashable application binary from the firmware envelope in
    /// `image_dir`, configured with `config`, into `output`.
    pub fn build_firmware_image(
        &self,
        cancel: &CancelToken,
        image_dir: &Path,
        config: &FirmwareConfig,
        output: &Path,
    ) -> Result<()> {
        let envelope = image_dir.join("firmware.envelope");
        process::ensure_exists(&envelope, "Firmware envelope")?;

        let config_file = tempfile::Builder::new()
            .prefix("jag_config_")
            .suffix(".json")
            .tempfile()
            .context("Failed to create firmware config file")?;
        let json = serde_json::to_vec(config).context("Failed to encode firmware config")?;
        fs::write(config_file.path(), json).with_context(|| {
            format!("Failed to write firmware config {}", config_file.path().display())
        })?;

        Cmd::new(self.firmware_tool_path())
            .arg("-e")
            .arg_path(&envelope)
            .args(["extract", "--format=binary", "--config"])
            .arg_path(config_file.path())
            .arg("-o")
            .arg_path(output)
            .error_msg("Failed to build firmware image")
            .cancel_on(cancel)
            .run_interactive()?;
        Ok(())
    }
}

impl Compiler for Sdk {
    fn compile(&self, cancel: &CancelToken, source: &Path, output: &Path) -> Result<()> {
        Cmd::new(self.compiler_path())
            .arg("-w")
            .arg_path(output)
            .arg_path(source)
            .error_msg(&format!("Failed to compile '{}'", source.display()))
            .cancel_on(cancel)
            .run_interactive()?;
        Ok(())
    }
}

impl PayloadBuilder for Sdk {
    fn build_payload(
        &self,
        cancel: &CancelToken,
        snapshot: &Path,
        id: &ProgramId,
    ) -> Result<Vec<u8>> {
        let scratch = tempfile::Builder::new()
            .prefix("jag_image")
            .tempdir()
            .context("Failed to create image directory")?;
        let image = scratch.path().join("program.image");

        let result = Cmd::new(self.snapshot_to_image_path())
            .args(["--format=binary", "-m32", "--id"])
            .arg(id.to_string())
            .arg("-o")
            .arg_path(&image)
            .arg_path(snapshot)
            .cancel_on(cancel)
            .allow_fail()
            .run()?;
        if !result.success() {
            // Tool output is the only useful diagnostic here.
            eprint!("{}", result.stdout);
            eprint!("{}", result.stderr);
            return Err(ToolFailed {
                message: format!("Failed to convert '{}' to an image", snapshot.display()),
                status: result.status.to_string(),
            }
            .into());
        }

        fs::read(&image).with_context(|| format!("Failed to read image {}", image.display()))
    }
}
