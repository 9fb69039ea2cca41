//! gcsfuse-mount: install gcsfuse and mount a Google Cloud Storage bucket
//!
//! Provisions a Linux host so a GCS bucket appears as a local directory
//! and comes back after a reboot.
//!
//! # Architecture
//!
//! - **Prober** (`os`): effective uid and the os-release identity.
//! - **Installers** (`install`): one `PackageInstaller` per distribution
//!   family (apt or yum), selected from the detected `ID`.
//! - **Mount** (`mount`, `fstab`): FUSE policy, mount directory, the gcsfuse
//!   invocation, the fstab entry and a best-effort verification.
//! - **Commands** (`command`): typed argument vectors run through an
//!   `Executor`, so every stage can be driven by a recording fake.
//!
//! # Example
//!
//! ```no_run
//! use gcsfuse_mount::command::SystemExecutor;
//! use gcsfuse_mount::config::{Config, Overrides};
//! use gcsfuse_mount::{os, provision};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let overrides = Overrides {
//!     bucket: Some("my-bucket".to_string()),
//!     ..Default::default()
//! };
//! let config = Config::load(None, overrides)?;
//! config.validate()?;
//!
//! let mut exec = SystemExecutor::new();
//! let outcome = provision::run(&config, &mut exec, os::effective_uid())?;
//! println!("mounted on {}", outcome.os.id);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod fstab;
pub mod install;
pub mod mount;
pub mod os;
pub mod provision;

pub use error::{ProvisionError, Result, StepError};
