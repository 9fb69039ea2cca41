//! Mounting the bucket: FUSE policy, mount directory, gcsfuse, verification

use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::command::{CommandSpec, Executor};
use crate::config::MountDescriptor;
use crate::error::StepError;
use crate::install::PACKAGE;

/// fuse.conf directive permitting `-o allow_other` for non-root mounters
pub const ALLOW_OTHER_DIRECTIVE: &str = "user_allow_other";

static COMMENTED_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*#[ \t]*user_allow_other[ \t]*$").unwrap());

static ACTIVE_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*user_allow_other[ \t]*$").unwrap());

/// Enable `user_allow_other` in the FUSE configuration at `path`.
///
/// Uncomments the stock `#user_allow_other` line, or appends the directive
/// when there is nothing to uncomment. Returns whether the file changed.
pub fn enable_allow_other(path: &Path) -> Result<bool, StepError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(StepError::io(format!("reading {:?}", path), e)),
    };

    if ACTIVE_DIRECTIVE.is_match(&content) {
        debug!("{} already enabled in {:?}", ALLOW_OTHER_DIRECTIVE, path);
        return Ok(false);
    }

    let mut updated = COMMENTED_DIRECTIVE
        .replace(&content, ALLOW_OTHER_DIRECTIVE)
        .into_owned();
    if !ACTIVE_DIRECTIVE.is_match(&updated) {
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(ALLOW_OTHER_DIRECTIVE);
        updated.push('\n');
    }

    std::fs::write(path, updated).map_err(|e| StepError::io(format!("writing {:?}", path), e))?;
    info!("Enabled {} in {:?}", ALLOW_OTHER_DIRECTIVE, path);
    Ok(true)
}

/// Permission bits of the mount point directory itself
pub const MOUNT_DIR_MODE: u32 = 0o755;

/// Create the mount point (and parents), set its mode and hand it to root
pub fn prepare_mount_dir(exec: &mut dyn Executor, path: &Path) -> Result<(), StepError> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(MOUNT_DIR_MODE)
        .create(path)
        .map_err(|e| StepError::io(format!("creating mount point {:?}", path), e))?;
    // umask or an existing directory may leave other bits
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(MOUNT_DIR_MODE))
        .map_err(|e| StepError::io(format!("setting permissions on {:?}", path), e))?;

    exec.run(
        &CommandSpec::new("chown").arg("root:root").arg(path),
        true,
    )
}

/// gcsfuse invocation for `mount`
pub fn mount_command(mount: &MountDescriptor) -> CommandSpec {
    let mut cmd = CommandSpec::new(PACKAGE);
    if mount.implicit_dirs {
        cmd = cmd.arg("--implicit-dirs");
    }
    cmd = cmd.args([
        format!("--uid={}", mount.uid),
        format!("--gid={}", mount.gid),
        format!("--file-mode={:o}", mount.file_mode),
        format!("--dir-mode={:o}", mount.dir_mode),
    ]);
    if mount.allow_other {
        cmd = cmd.args(["-o", "allow_other"]);
    }
    cmd.arg(&mount.bucket).arg(&mount.mount_point)
}

pub fn mount_bucket(exec: &mut dyn Executor, mount: &MountDescriptor) -> Result<(), StepError> {
    exec.run(&mount_command(mount), true)
}

/// Whether the kernel mount table content lists `mount_point`
pub fn is_listed(mount_table: &str, mount_point: &Path) -> bool {
    let wanted = mount_point.to_string_lossy();
    mount_table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| target == wanted)
}

/// Informational checks after mounting. Never fails.
///
/// Returns whether the mount point shows up in `proc_mounts`.
pub fn verify_mount(exec: &mut dyn Executor, mount: &MountDescriptor, proc_mounts: &Path) -> bool {
    // check=false always yields Ok; both listings are informational
    let _ = exec.run(
        &CommandSpec::new("df").arg("-h").arg(&mount.mount_point),
        false,
    );
    let _ = exec.run(
        &CommandSpec::new("mount").args(["-t", "fuse.gcsfuse"]),
        false,
    );

    match std::fs::read_to_string(proc_mounts) {
        Ok(table) if is_listed(&table, &mount.mount_point) => true,
        Ok(_) => {
            warn!(
                "{:?} is not listed in {:?}; the mount may not be active",
                mount.mount_point, proc_mounts
            );
            false
        }
        Err(e) => {
            warn!("Could not read {:?} to verify mount: {}", proc_mounts, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingExecutor;

    const STOCK_FUSE_CONF: &str = "# /etc/fuse.conf - Configuration file for Filesystem in Userspace (FUSE)

# Set the maximum number of FUSE mounts allowed to non-root users.
# The default is 1000.
#mount_max = 1000

# Allow non-root users to specify the allow_other or allow_root mount options.
#user_allow_other
";

    #[test]
    fn test_enable_uncomments_stock_directive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuse.conf");
        std::fs::write(&path, STOCK_FUSE_CONF).unwrap();

        assert!(enable_allow_other(&path).unwrap());

        let updated = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            updated,
            STOCK_FUSE_CONF.replace("#user_allow_other", "user_allow_other")
        );
        // other comments untouched
        assert!(updated.contains("#mount_max = 1000"));
    }

    #[test]
    fn test_enable_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuse.conf");
        std::fs::write(&path, STOCK_FUSE_CONF).unwrap();

        assert!(enable_allow_other(&path).unwrap());
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(!enable_allow_other(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn test_enable_handles_spaced_comment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuse.conf");
        std::fs::write(&path, "mount_max = 10\n#  user_allow_other\n").unwrap();

        enable_allow_other(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "mount_max = 10\nuser_allow_other\n"
        );
    }

    #[test]
    fn test_enable_appends_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuse.conf");
        std::fs::write(&path, "mount_max = 10").unwrap();

        enable_allow_other(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "mount_max = 10\nuser_allow_other\n"
        );
    }

    #[test]
    fn test_enable_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuse.conf");

        assert!(enable_allow_other(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "user_allow_other\n");
    }

    #[test]
    fn test_prepare_mount_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mount_point = dir.path().join("mnt/gcs-bucket");
        let mut exec = RecordingExecutor::new();

        prepare_mount_dir(&mut exec, &mount_point).unwrap();
        // existing directory is fine
        prepare_mount_dir(&mut exec, &mount_point).unwrap();

        assert!(mount_point.is_dir());
        let mode = std::fs::metadata(&mount_point).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        let chown: Vec<_> = exec.invocations("chown").collect();
        assert_eq!(chown.len(), 2);
        assert_eq!(
            chown[0].arg_strings(),
            vec!["root:root".to_string(), mount_point.to_string_lossy().into_owned()]
        );
    }

    #[test]
    fn test_prepare_mount_dir_resets_existing_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mount_point = dir.path().join("existing");
        std::fs::create_dir(&mount_point).unwrap();
        std::fs::set_permissions(&mount_point, std::fs::Permissions::from_mode(0o700)).unwrap();

        prepare_mount_dir(&mut RecordingExecutor::new(), &mount_point).unwrap();

        let mode = std::fs::metadata(&mount_point).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_prepare_mount_dir_chown_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = RecordingExecutor::new().fail_program("chown");
        assert!(prepare_mount_dir(&mut exec, &dir.path().join("m")).is_err());
    }

    #[test]
    fn test_mount_command_stock_options() {
        let mount = MountDescriptor::new("my-bucket", "/mnt/gcs-bucket");
        assert_eq!(
            mount_command(&mount).to_string(),
            "gcsfuse --implicit-dirs --uid=0 --gid=0 --file-mode=777 --dir-mode=777 -o allow_other my-bucket /mnt/gcs-bucket"
        );
    }

    #[test]
    fn test_mount_command_custom_options() {
        let mount = MountDescriptor {
            uid: 1000,
            gid: 100,
            file_mode: 0o644,
            dir_mode: 0o755,
            implicit_dirs: false,
            allow_other: false,
            ..MountDescriptor::new("data", "/srv/data")
        };
        assert_eq!(
            mount_command(&mount).to_string(),
            "gcsfuse --uid=1000 --gid=100 --file-mode=644 --dir-mode=755 data /srv/data"
        );
    }

    #[test]
    fn test_is_listed() {
        let table = "proc /proc proc rw,nosuid 0 0
my-bucket /mnt/gcs-bucket fuse.gcsfuse rw,nosuid,nodev,relatime,user_id=0,group_id=0,allow_other 0 0
";
        assert!(is_listed(table, Path::new("/mnt/gcs-bucket")));
        assert!(!is_listed(table, Path::new("/mnt/gcs")));
        assert!(!is_listed("", Path::new("/mnt/gcs-bucket")));
    }

    #[test]
    fn test_verify_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mount = MountDescriptor::new("my-bucket", "/mnt/gcs-bucket");
        let mut exec = RecordingExecutor::new()
            .fail_program("df")
            .fail_program("mount");

        assert!(!verify_mount(&mut exec, &mount, &dir.path().join("mounts")));
        assert_eq!(
            exec.lines(),
            vec!["df -h /mnt/gcs-bucket", "mount -t fuse.gcsfuse"]
        );

        let proc_mounts = dir.path().join("mounts");
        std::fs::write(
            &proc_mounts,
            "my-bucket /mnt/gcs-bucket fuse.gcsfuse rw 0 0\n",
        )
        .unwrap();
        assert!(verify_mount(&mut exec, &mount, &proc_mounts));
    }
}
