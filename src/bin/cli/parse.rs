use anyhow::{bail, Context, Result};

use jag::config::{UserConfig, WifiConfig};
use jag::flash::FlashOptions;

/// Positional arguments and `-D` flags of `run`/`install`.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct DeployArgs {
    pub(crate) defines: Vec<String>,
    pub(crate) positional: Vec<String>,
}

pub(crate) fn parse_deploy_args(args: &[String]) -> Result<DeployArgs> {
    let mut out = DeployArgs::default();
    let mut rest = args;
    loop {
        match rest {
            [] => break,
            [flag, value, tail @ ..] if flag == "-D" || flag == "--define" => {
                out.defines.push(value.clone());
                rest = tail;
            }
            [flag] if flag == "-D" || flag == "--define" => {
                bail!("{flag} needs a value");
            }
            [flag, tail @ ..] if flag.starts_with("--define=") => {
                out.defines.push(flag["--define=".len()..].to_string());
                rest = tail;
            }
            [flag, tail @ ..] if flag.starts_with("-D") => {
                out.defines.push(flag[2..].to_string());
                rest = tail;
            }
            [flag, ..] if flag.starts_with('-') && flag.len() > 1 => {
                bail!("unknown flag '{flag}'");
            }
            [arg, tail @ ..] => {
                out.positional.push(arg.clone());
                rest = tail;
            }
        }
    }
    Ok(out)
}

/// Flash flags layered over the user config. Flags win over the
/// environment, which wins over the config file.
pub(crate) fn parse_flash_args(args: &[String], config: &UserConfig) -> Result<FlashOptions> {
    let mut options = FlashOptions {
        port: config.port.clone(),
        baud: config.baud(),
        name: None,
        wifi: config.wifi_from_env(),
    };
    let mut ssid = None;
    let mut password = None;

    let mut rest = args;
    loop {
        match rest {
            [] => break,
            [flag, value, tail @ ..] if flag == "--port" || flag == "-p" => {
                options.port = Some(value.clone());
                rest = tail;
            }
            [flag, value, tail @ ..] if flag == "--baud" => {
                options.baud = value
                    .parse()
                    .with_context(|| format!("invalid baud rate '{value}'"))?;
                rest = tail;
            }
            [flag, value, tail @ ..] if flag == "--name" => {
                options.name = Some(value.clone());
                rest = tail;
            }
            [flag, value, tail @ ..] if flag == "--wifi-ssid" => {
                ssid = Some(value.clone());
                rest = tail;
            }
            [flag, value, tail @ ..] if flag == "--wifi-password" => {
                password = Some(value.clone());
                rest = tail;
            }
            [flag, ..] => bail!("unknown or incomplete flash argument '{flag}'"),
        }
    }

    options.wifi = WifiConfig {
        ssid: ssid.or(options.wifi.ssid),
        password: password.or(options.wifi.password),
    };
    Ok(options)
}
