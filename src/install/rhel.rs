//! yum based installation (RHEL, CentOS, Fedora)

use super::{write_repo_file, OsFamily, PackageInstaller, PACKAGE};
use crate::command::{CommandSpec, Executor};
use crate::config::SystemPaths;
use crate::error::StepError;

/// `$releasever` and `$basearch` are expanded by yum itself
pub const REPO_DEFINITION: &str = "[gcsfuse]
name=gcsfuse
baseurl=https://packages.cloud.google.com/yum/repos/gcsfuse-el$releasever-$basearch
enabled=1
gpgcheck=1
repo_gpgcheck=1
gpgkey=https://packages.cloud.google.com/yum/doc/yum-key.gpg
       https://packages.cloud.google.com/yum/doc/rpm-package-key.gpg
";

const PREREQUISITES: [&str; 2] = ["curl", "gnupg"];

#[derive(Debug, Default)]
pub struct RhelInstaller;

impl RhelInstaller {
    pub fn new() -> Self {
        Self
    }
}

impl PackageInstaller for RhelInstaller {
    fn family(&self) -> OsFamily {
        OsFamily::Rhel
    }

    fn install(&self, exec: &mut dyn Executor, paths: &SystemPaths) -> Result<(), StepError> {
        exec.run(
            &CommandSpec::new("yum")
                .args(["install", "-y"])
                .args(PREREQUISITES),
            true,
        )?;
        write_repo_file(&paths.yum_repo, REPO_DEFINITION)?;
        exec.run(
            &CommandSpec::new("yum").args(["install", "-y", PACKAGE]),
            true,
        )
    }
}
