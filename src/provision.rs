//! The full run: privilege check, OS detection, install, mount, persist,
//! verify. Each stage runs once, in order, and the first failure ends the
//! run.

use tracing::{debug, info};

use crate::command::Executor;
use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::fstab::{persist_entry, FstabEntry};
use crate::install::{installer_for, OsFamily};
use crate::mount;
use crate::os::{detect_os, require_root, OsIdentity};

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub os: OsIdentity,
    pub family: OsFamily,
    /// A new fstab line was written
    pub persisted: bool,
    /// The mount point showed up in the kernel mount table
    pub verified: bool,
}

fn banner(title: &str) {
    info!("==============================");
    info!(" {}", title);
    info!("==============================");
}

/// Install gcsfuse and mount the configured bucket.
///
/// `euid` is the caller's effective uid; nothing is read or written unless
/// it is 0.
pub fn run(config: &Config, exec: &mut dyn Executor, euid: u32) -> Result<Outcome> {
    require_root(euid)?;

    let os = detect_os(&config.paths.os_release)?;
    banner(&format!("Detected OS: {} (Version: {})", os.id, os.version));

    let family =
        OsFamily::from_id(&os.id).ok_or_else(|| ProvisionError::UnsupportedOs(os.id.clone()))?;

    banner("Installing gcsfuse");
    let installer = installer_for(family);
    debug!("Using {} family installer", installer.family());
    installer
        .install(exec, &config.paths)
        .map_err(ProvisionError::Install)?;

    let descriptor = &config.mount;

    if descriptor.allow_other {
        banner("Configuring fuse");
        mount::enable_allow_other(&config.paths.fuse_conf).map_err(ProvisionError::Mount)?;
    }

    banner("Creating mount directory");
    mount::prepare_mount_dir(exec, &descriptor.mount_point).map_err(ProvisionError::Mount)?;

    banner("Mounting GCS bucket");
    mount::mount_bucket(exec, descriptor).map_err(ProvisionError::Mount)?;

    let persisted = if descriptor.persist {
        banner(&format!("Persisting mount in {}", config.paths.fstab.display()));
        let entry = FstabEntry::from_descriptor(descriptor);
        persist_entry(&config.paths.fstab, &entry).map_err(|source| ProvisionError::Persist {
            path: config.paths.fstab.clone(),
            source,
        })?
    } else {
        false
    };

    banner("Verifying mount");
    let verified = mount::verify_mount(exec, descriptor, &config.paths.proc_mounts);

    Ok(Outcome {
        os,
        family,
        persisted,
        verified,
    })
}
