//! /etc/fstab entry for remounting the bucket at boot

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::MountDescriptor;
use crate::install::PACKAGE;

/// One fstab line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    /// First field: the bucket name
    pub spec: String,
    pub mount_point: PathBuf,
    pub vfs_type: String,
    pub options: Vec<String>,
    pub dump: u32,
    pub pass: u32,
}

impl FstabEntry {
    pub fn from_descriptor(mount: &MountDescriptor) -> Self {
        let mut options = vec!["rw".to_string()];
        if mount.implicit_dirs {
            options.push("implicit_dirs".to_string());
        }
        options.push(format!("uid={}", mount.uid));
        options.push(format!("gid={}", mount.gid));
        options.push(format!("file_mode={:o}", mount.file_mode));
        options.push(format!("dir_mode={:o}", mount.dir_mode));
        if mount.allow_other {
            options.push("allow_other".to_string());
        }
        // wait for the network before mounting at boot
        options.push("_netdev".to_string());

        Self {
            spec: mount.bucket.clone(),
            mount_point: mount.mount_point.clone(),
            vfs_type: PACKAGE.to_string(),
            options,
            dump: 0,
            pass: 0,
        }
    }
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.spec,
            self.mount_point.display(),
            self.vfs_type,
            self.options.join(","),
            self.dump,
            self.pass
        )
    }
}

/// Append `entry` to the fstab at `path` unless it is already there.
///
/// The check is an exact substring match on the rendered line. A missing
/// file counts as empty and is created; any other read error is returned
/// rather than risking a duplicate entry. Returns whether a line was
/// appended.
pub fn persist_entry(path: &Path, entry: &FstabEntry) -> io::Result<bool> {
    let line = entry.to_string();

    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{:?} does not exist, it will be created", path);
            String::new()
        }
        Err(e) => return Err(e),
    };

    if existing.contains(&line) {
        info!("Mount entry already present in {:?}", path);
        return Ok(false);
    }

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    file.write_all(format!("\n{}\n", line).as_bytes())?;
    file.sync_all()?;

    info!("Added mount entry to {:?}", path);
    Ok(true)
}
