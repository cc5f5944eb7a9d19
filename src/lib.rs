//! Deploy compiled programs to ESP32 devices and build their initial flash.
//!
//! Two flows live in this crate:
//!
//! - **Deploy**: a source file or compiled snapshot is compiled if needed,
//!   identified by the program id embedded in the snapshot, committed to a
//!   content-addressed cache, turned into a device payload and sent to a
//!   running device.
//! - **Flash**: the toolchain's partition table is parsed into flash offsets
//!   and sizes, zap files are made for regions that must be erased, and
//!   esptool is driven with an ordered list of writes.
//!
//! # Architecture
//!
//! ```text
//! jag (binary)
//!     │
//!     ├── deploy ──► snapshot ──► cache
//!     │     └── collaborators: sdk (Compiler, PayloadBuilder), device (DeviceChannel)
//!     │
//!     └── flash ──► partitions
//!           ├── zap, layout
//!           └── sdk (firmware image), process (esptool)
//! ```
//!
//! Every external tool runs through [`process::Cmd`] and can be stopped with a
//! [`cancel::CancelToken`]. Tool locations come from [`config::Paths`].

pub mod cache;
pub mod cancel;
pub mod config;
pub mod deploy;
pub mod device;
pub mod flash;
pub mod partitions;
pub mod process;
pub mod sdk;
pub mod snapshot;

pub use cache::SnapshotCache;
pub use cancel::CancelToken;
pub use deploy::{Deployer, Request};
pub use snapshot::ProgramId;
