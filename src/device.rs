//! HTTP channel to a device running the on-device agent.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::DeviceConfig;
use crate::deploy::{Defines, DeviceChannel, Request};

pub const DEVICE_ID_HEADER: &str = "X-Jaguar-Device-ID";
pub const SDK_VERSION_HEADER: &str = "X-Jaguar-SDK-Version";
pub const NAME_HEADER: &str = "X-Jaguar-Name";
pub const DEFINES_HEADER: &str = "X-Jaguar-Defines";

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpDevice {
    id: Uuid,
    name: String,
    address: String,
    sdk_version: String,
}

impl HttpDevice {
    pub fn new(id: Uuid, name: String, address: String, sdk_version: String) -> Self {
        Self {
            id,
            name,
            address,
            sdk_version,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        let device = &config.device;
        Self::new(
            device.id,
            device.name.clone(),
            device.address.clone(),
            device.sdk_version.clone(),
        )
    }

    pub fn url(&self, request: &Request) -> String {
        format!("{}{}", self.address.trim_end_matches('/'), request.path())
    }

    fn headers(&self, request: &Request, defines: Option<&Defines>) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (DEVICE_ID_HEADER, self.id.to_string()),
            (SDK_VERSION_HEADER, self.sdk_version.clone()),
        ];
        let name = request.container_name();
        if !name.is_empty() {
            headers.push((NAME_HEADER, name.to_string()));
        }
        if let Some(defines) = defines {
            headers.push((DEFINES_HEADER, defines.to_json()));
        }
        headers
    }
}

impl DeviceChannel for HttpDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_code(
        &self,
        cancel: &CancelToken,
        request: &Request,
        payload: &[u8],
        defines: Option<&Defines>,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            bail!("cancelled before sending to '{}'", self.name);
        }

        let url = self.url(request);
        debug!(%url, bytes = payload.len(), "sending code");

        let client = reqwest::blocking::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        let mut builder = client.put(&url).body(payload.to_vec());
        for (header, value) in self.headers(request, defines) {
            builder = builder.header(header, value);
        }

        let response = builder
            .send()
            .with_context(|| format!("Failed to reach device at {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("device '{}' answered {} for {}", self.name, status, url);
        }
        Ok(())
    }
}
