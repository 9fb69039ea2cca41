//! gcsfuse package installation, one installer per distribution family

pub mod debian;
pub mod rhel;

use std::fmt;

use crate::command::Executor;
use crate::config::SystemPaths;
use crate::error::StepError;

pub use debian::DebianInstaller;
pub use rhel::RhelInstaller;

/// Name of the package (and binary) being installed
pub const PACKAGE: &str = "gcsfuse";

/// Distribution families sharing a package manager and repository format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    /// apt based: Debian, Ubuntu
    Debian,
    /// yum based: RHEL, CentOS, Fedora
    Rhel,
}

impl OsFamily {
    /// Family for an os-release `ID`, or `None` when unsupported
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "ubuntu" | "debian" => Some(OsFamily::Debian),
            "rhel" | "centos" | "fedora" => Some(OsFamily::Rhel),
            _ => None,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Debian => write!(f, "debian"),
            OsFamily::Rhel => write!(f, "rhel"),
        }
    }
}

/// Installs the gcsfuse package on one distribution family
pub trait PackageInstaller {
    fn family(&self) -> OsFamily;

    /// Configure the package repository and install gcsfuse.
    ///
    /// Stops at the first failing step.
    fn install(&self, exec: &mut dyn Executor, paths: &SystemPaths) -> Result<(), StepError>;
}

/// Installer for `family`
pub fn installer_for(family: OsFamily) -> Box<dyn PackageInstaller> {
    match family {
        OsFamily::Debian => Box::new(DebianInstaller::new()),
        OsFamily::Rhel => Box::new(RhelInstaller::new()),
    }
}

/// Write a repository definition file, creating its directory if needed
fn write_repo_file(path: &std::path::Path, content: &str) -> Result<(), StepError> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StepError::io(format!("creating {:?}", parent), e))?;
    }
    std::fs::write(path, content).map_err(|e| StepError::io(format!("writing {:?}", path), e))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .map_err(|e| StepError::io(format!("setting permissions on {:?}", path), e))
}
