//! End-to-end flows through the public API with fake collaborators.

use std::cell::Cell;
use std::fs;
use std::path::Path;

use anyhow::Result;
use tempfile::TempDir;

use jag::cache::SnapshotCache;
use jag::cancel::CancelToken;
use jag::deploy::{Compiler, Defines, Deployer, DeviceChannel, PayloadBuilder, Request};
use jag::flash::layout::{FlashImages, FlashPlan};
use jag::flash::zap::create_zap_file;
use jag::partitions;
use jag::snapshot::{self, ProgramId};

const PROGRAM_ID: [u8; 16] = [
    0xde, 0xad, 0xbe, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x10, 0x32, 0x54,
    0x76,
];

/// `ar` archive with the given members.
fn archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = ar::Builder::new(Vec::new());
    for (name, data) in members {
        let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
        builder.append(&header, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Compiles any source into the same snapshot, as a deterministic compiler would.
#[derive(Default)]
struct FakeCompiler {
    runs: Cell<usize>,
}

impl Compiler for FakeCompiler {
    fn compile(&self, _cancel: &CancelToken, source: &Path, output: &Path) -> Result<()> {
        self.runs.set(self.runs.get() + 1);
        let code = fs::read(source)?;
        fs::write(output, archive(&[("toit", &code[..]), ("uuid", &PROGRAM_ID[..])]))?;
        Ok(())
    }
}

struct EchoPayload;

impl PayloadBuilder for EchoPayload {
    fn build_payload(
        &self,
        _cancel: &CancelToken,
        snapshot: &Path,
        _id: &ProgramId,
    ) -> Result<Vec<u8>> {
        Ok(fs::read(snapshot)?)
    }
}

#[derive(Default)]
struct CountingDevice {
    sends: Cell<usize>,
}

impl DeviceChannel for CountingDevice {
    fn name(&self) -> &str {
        "bench"
    }

    fn send_code(
        &self,
        _cancel: &CancelToken,
        _request: &Request,
        _payload: &[u8],
        _defines: Option<&Defines>,
    ) -> Result<()> {
        self.sends.set(self.sends.get() + 1);
        Ok(())
    }
}

#[test]
fn scenario_a_flash_plan_zaps_ota_and_nvs() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("partitions.csv"),
        "# Name, Type, SubType, Offset, Size\n\
         nvs,data,nvs,0x9000,0x6000\n\
         otadata,data,ota,0xd000,0x2000\n",
    )
    .unwrap();

    let layout = partitions::load_from_toolchain(tmp.path()).unwrap();
    assert_eq!(layout.position("bootloader"), Some(0x1000));
    assert_eq!(layout.position("partitions"), Some(0x8000));

    let ota_zap = create_zap_file(&layout, "ota").unwrap();
    let nvs_zap = create_zap_file(&layout, "nvs").unwrap();
    let bootloader = tmp.path().join("bootloader.bin");
    let table = tmp.path().join("partitions.bin");
    let app = tmp.path().join("app.bin");

    let plan = FlashPlan::build(
        &layout,
        &FlashImages {
            bootloader: &bootloader,
            partition_table: &table,
            application: &app,
            ota_zap: &ota_zap,
            nvs_zap: &nvs_zap,
        },
    );

    let regions = plan.regions();
    let ota = regions.iter().find(|r| r.offset == 0xd000).unwrap();
    let nvs = regions.iter().find(|r| r.offset == 0x9000).unwrap();
    let ota_bytes = fs::read(&ota.file).unwrap();
    let nvs_bytes = fs::read(&nvs.file).unwrap();
    assert_eq!(ota_bytes.len(), 0x2000);
    assert_eq!(nvs_bytes.len(), 0x6000);
    assert!(ota_bytes.iter().chain(&nvs_bytes).all(|&b| b == 0xff));

    // Zaps follow the application write, OTA selector first.
    let offsets: Vec<u32> = regions.iter().map(|r| r.offset).collect();
    assert_eq!(offsets[..2], [0x1000, 0x8000]);
    assert_eq!(offsets[3..], [0xd000, 0x9000]);
}

#[test]
fn scenario_b_artifact_is_recognized_and_identified() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("program.snapshot");
    fs::write(&path, archive(&[("toit", &b"bytecode"[..]), ("uuid", &PROGRAM_ID[..])])).unwrap();

    assert!(snapshot::is_snapshot(&path));
    assert_eq!(snapshot::program_id(&path).unwrap().as_bytes(), &PROGRAM_ID);
}

#[test]
fn scenario_c_second_deploy_hits_the_cache() {
    let tmp = TempDir::new().unwrap();
    let cache = SnapshotCache::open(tmp.path().join("snapshots")).unwrap();
    let source = tmp.path().join("hello.toit");
    fs::write(&source, "main:\n  print \"hello\"\n").unwrap();

    let compiler = FakeCompiler::default();
    let device = CountingDevice::default();
    let deployer = Deployer::new(&cache, &compiler, &EchoPayload, &device);

    let first = deployer.deploy(&source, &Request::Run, None).unwrap();
    let canonical = cache.canonical_path(&ProgramId::from_bytes(PROGRAM_ID));
    assert_eq!(first.snapshot, canonical);
    let bytes = fs::read(&canonical).unwrap();
    #[cfg(unix)]
    let inode = {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(&canonical).unwrap().ino()
    };

    let second = deployer.deploy(&source, &Request::Run, None).unwrap();
    assert_eq!(second.snapshot, canonical);
    assert_eq!(second.program_id, first.program_id);
    assert_eq!(fs::read(&canonical).unwrap(), bytes);
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        assert_eq!(fs::metadata(&canonical).unwrap().ino(), inode);
    }

    assert_eq!(compiler.runs.get(), 2);
    assert_eq!(device.sends.get(), 2);
    assert_eq!(cache.list().unwrap().len(), 1);
    let leftovers = fs::read_dir(cache.dir())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with("jag_run_")
        })
        .count();
    assert_eq!(leftovers, 0);
}
