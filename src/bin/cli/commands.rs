use std::path::Path;

use anyhow::{bail, Context, Result};

use jag::cache::SnapshotCache;
use jag::cancel::CancelToken;
use jag::config::{BuildMode, DeviceConfig, Paths, UserConfig};
use jag::deploy::{Defines, Deployer, Request};
use jag::device::HttpDevice;
use jag::flash;
use jag::sdk::Sdk;
use jag::snapshot::ProgramId;

use super::parse::{parse_deploy_args, parse_flash_args};

pub(crate) fn usage() -> &'static str {
    "Usage:\n  jag run [-D key=value]... <file>\n  jag install [-D key=value]... <name> <file>\n  jag flash [--port <port>] [--baud <rate>] [--name <name>] [--wifi-ssid <ssid>] [--wifi-password <password>]\n  jag cache path\n  jag cache list\n  jag cache lookup <program-id>"
}

pub(crate) fn dispatch(args: &[String], cancel: &CancelToken) -> Result<()> {
    match args {
        [cmd, rest @ ..] if cmd == "run" => {
            let parsed = parse_deploy_args(rest)?;
            match parsed.positional.as_slice() {
                [file] => deploy(Path::new(file), Request::Run, &parsed.defines, cancel),
                _ => bail!("jag run takes exactly one file\n{}", usage()),
            }
        }
        [cmd, rest @ ..] if cmd == "install" => {
            let parsed = parse_deploy_args(rest)?;
            match parsed.positional.as_slice() {
                [name, file] => deploy(
                    Path::new(file),
                    Request::Install { name: name.clone() },
                    &parsed.defines,
                    cancel,
                ),
                _ => bail!("jag install takes a container name and a file\n{}", usage()),
            }
        }
        [cmd, rest @ ..] if cmd == "flash" => run_flash(rest, cancel),
        [cmd, sub] if cmd == "cache" && sub == "path" => {
            let cache = open_cache(&paths()?)?;
            println!("{}", cache.dir().display());
            Ok(())
        }
        [cmd, sub] if cmd == "cache" && sub == "list" => {
            let cache = open_cache(&paths()?)?;
            for (id, path) in cache.list()? {
                println!("{id}  {}", path.display());
            }
            Ok(())
        }
        [cmd, sub, id] if cmd == "cache" && sub == "lookup" => {
            let id: ProgramId = id
                .parse()
                .with_context(|| format!("'{id}' is not a program id"))?;
            let cache = open_cache(&paths()?)?;
            match cache.get(&id) {
                Some(path) => {
                    println!("{}", path.display());
                    Ok(())
                }
                None => bail!("no snapshot cached for program {id}"),
            }
        }
        _ => bail!(usage()),
    }
}

fn paths() -> Result<Paths> {
    Paths::from_env(BuildMode::detect())
}

fn open_cache(paths: &Paths) -> Result<SnapshotCache> {
    Ok(SnapshotCache::open(paths.snapshot_cache_dir()?)?)
}

fn deploy(file: &Path, request: Request, defines: &[String], cancel: &CancelToken) -> Result<()> {
    let defines = Defines::parse(defines)?;
    let paths = paths()?;
    let device = HttpDevice::from_config(&DeviceConfig::load(&paths.device_config_path())?);
    let sdk = Sdk::new(paths.sdk_path()?);
    let cache = open_cache(&paths)?;

    Deployer::new(&cache, &sdk, &sdk, &device)
        .with_cancel(cancel.clone())
        .deploy(file, &request, defines.as_ref())?;
    Ok(())
}

fn run_flash(args: &[String], cancel: &CancelToken) -> Result<()> {
    let paths = paths()?;
    let config = UserConfig::load(&paths.user_config_path())?;
    let options = parse_flash_args(args, &config)?;
    let sdk = Sdk::new(paths.sdk_path()?);

    let device = flash::flash_device(&paths, &sdk, &options, cancel)?;
    println!("Flashed '{}' ({})", device.name, device.id);
    Ok(())
}
