//! apt based installation (Debian, Ubuntu)

use tracing::info;

use super::{write_repo_file, OsFamily, PackageInstaller, PACKAGE};
use crate::command::{CommandSpec, Executor};
use crate::config::SystemPaths;
use crate::error::StepError;

const APT_REPO_URL: &str = "https://packages.cloud.google.com/apt";
const APT_KEY_URL: &str = "https://packages.cloud.google.com/apt/doc/apt-key.gpg";

/// Tools needed before the gcsfuse repository can be added
const PREREQUISITES: [&str; 3] = ["curl", "gnupg", "lsb-release"];

#[derive(Debug, Default)]
pub struct DebianInstaller;

impl DebianInstaller {
    pub fn new() -> Self {
        Self
    }

    fn apt_get() -> CommandSpec {
        CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
    }

    /// Release codename, e.g. `jammy`
    fn codename(&self, exec: &mut dyn Executor) -> Result<String, StepError> {
        let out = exec.output(&CommandSpec::new("lsb_release").args(["-c", "-s"]))?;
        let codename = out.trim();
        if codename.is_empty() {
            return Err(StepError::EmptyCodename);
        }
        Ok(codename.to_string())
    }
}

/// apt source line for the gcsfuse repository of `codename`
pub fn source_line(codename: &str) -> String {
    format!("deb {} gcsfuse-{} main\n", APT_REPO_URL, codename)
}

impl PackageInstaller for DebianInstaller {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn install(&self, exec: &mut dyn Executor, paths: &SystemPaths) -> Result<(), StepError> {
        exec.run(&Self::apt_get().arg("update"), true)?;
        exec.run(
            &Self::apt_get().args(["install", "-y"]).args(PREREQUISITES),
            true,
        )?;

        let codename = self.codename(exec)?;
        info!("Adding gcsfuse repository for {}", codename);
        write_repo_file(&paths.apt_source, &source_line(&codename))?;

        let fetch_key = CommandSpec::new("curl").args(["-fsSL", APT_KEY_URL]);
        exec.run(
            &CommandSpec::new("apt-key")
                .args(["add", "-"])
                .stdin_from(fetch_key),
            true,
        )?;

        exec.run(&Self::apt_get().arg("update"), true)?;
        exec.run(&Self::apt_get().args(["install", "-y", PACKAGE]), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingExecutor;

    fn scratch() -> (tempfile::TempDir, SystemPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = SystemPaths::under(dir.path());
        (dir, paths)
    }

    #[test]
    fn test_install_sequence() {
        let (_dir, paths) = scratch();
        let mut exec = RecordingExecutor::new().with_output("lsb_release", "jammy\n");

        DebianInstaller::new().install(&mut exec, &paths).unwrap();

        assert_eq!(
            exec.lines(),
            vec![
                "apt-get update",
                "apt-get install -y curl gnupg lsb-release",
                "lsb_release -c -s",
                "curl -fsSL https://packages.cloud.google.com/apt/doc/apt-key.gpg | apt-key add -",
                "apt-get update",
                "apt-get install -y gcsfuse",
            ]
        );

        let source = std::fs::read_to_string(&paths.apt_source).unwrap();
        assert_eq!(
            source,
            "deb https://packages.cloud.google.com/apt gcsfuse-jammy main\n"
        );
    }

    #[test]
    fn test_apt_is_noninteractive() {
        let (_dir, paths) = scratch();
        let mut exec = RecordingExecutor::new().with_output("lsb_release", "bookworm");

        DebianInstaller::new().install(&mut exec, &paths).unwrap();

        for cmd in exec.invocations("apt-get") {
            assert!(cmd
                .env
                .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())));
        }
    }

    #[test]
    fn test_codename_failure_aborts_before_repo_write() {
        let (_dir, paths) = scratch();
        let mut exec = RecordingExecutor::new().fail_program("lsb_release");

        let err = DebianInstaller::new()
            .install(&mut exec, &paths)
            .unwrap_err();
        assert!(matches!(err, StepError::CommandFailed { .. }));
        assert!(!paths.apt_source.exists());
        assert_eq!(exec.invocations("apt-key").count(), 0);
    }

    #[test]
    fn test_empty_codename_is_an_error() {
        let (_dir, paths) = scratch();
        let mut exec = RecordingExecutor::new().with_output("lsb_release", "  \n");

        let err = DebianInstaller::new()
            .install(&mut exec, &paths)
            .unwrap_err();
        assert!(matches!(err, StepError::EmptyCodename));
        assert!(!paths.apt_source.exists());
    }

    #[test]
    fn test_key_failure_stops_install() {
        let (_dir, paths) = scratch();
        let mut exec = RecordingExecutor::new()
            .with_output("lsb_release", "jammy")
            .fail_program("curl");

        assert!(DebianInstaller::new().install(&mut exec, &paths).is_err());
        let installs: Vec<_> = exec
            .invocations("apt-get")
            .filter(|c| c.arg_strings().contains(&PACKAGE.to_string()))
            .collect();
        assert!(installs.is_empty());
    }
}
