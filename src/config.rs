//! Configuration parsing and structures

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::env::expand_env_vars;

/// Mount point used when none is configured
pub const DEFAULT_MOUNT_POINT: &str = "/mnt/gcs-bucket";

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// GCS bucket name (supports `${VAR}`)
    pub bucket: Option<String>,

    /// Local mount point (supports `${VAR}`)
    pub mount_point: Option<String>,

    /// gcsfuse mount options
    #[serde(default)]
    pub options: RawMountOptions,

    /// Host file locations
    #[serde(default)]
    pub paths: SystemPaths,
}

/// Mount options as written in YAML; modes are octal strings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMountOptions {
    pub implicit_dirs: Option<bool>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub file_mode: Option<String>,
    pub dir_mode: Option<String>,
    pub allow_other: Option<bool>,
    /// Add an /etc/fstab entry so the bucket is remounted at boot
    pub persist: Option<bool>,
}

/// Values taken from the command line or environment.
///
/// Anything set here wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bucket: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub file_mode: Option<u32>,
    pub dir_mode: Option<u32>,
    pub implicit_dirs: Option<bool>,
    pub allow_other: Option<bool>,
    pub persist: Option<bool>,
    pub log_level: Option<String>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// What to mount and how
    pub mount: MountDescriptor,

    /// Host file locations
    pub paths: SystemPaths,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// The bucket mount: gcsfuse flags and the fstab entry are both derived
/// from this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDescriptor {
    pub bucket: String,
    pub mount_point: PathBuf,
    /// Owner reported for every file and directory in the mount
    pub uid: u32,
    pub gid: u32,
    /// Permission bits, e.g. 0o777
    pub file_mode: u32,
    pub dir_mode: u32,
    /// Infer directories from object name prefixes
    pub implicit_dirs: bool,
    /// Let users other than the mounting one access the mount
    pub allow_other: bool,
    pub persist: bool,
}

impl MountDescriptor {
    /// Descriptor with the stock options for `bucket` at `mount_point`
    pub fn new(bucket: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            mount_point: mount_point.into(),
            uid: 0,
            gid: 0,
            file_mode: 0o777,
            dir_mode: 0o777,
            implicit_dirs: true,
            allow_other: true,
            persist: true,
        }
    }
}

/// Host files read or written during a run.
///
/// Overridable so the tool can target a chroot or a scratch directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemPaths {
    pub os_release: PathBuf,
    pub fuse_conf: PathBuf,
    pub fstab: PathBuf,
    pub apt_source: PathBuf,
    pub yum_repo: PathBuf,
    /// Kernel mount table consulted when verifying the mount
    pub proc_mounts: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            os_release: PathBuf::from("/etc/os-release"),
            fuse_conf: PathBuf::from("/etc/fuse.conf"),
            fstab: PathBuf::from("/etc/fstab"),
            apt_source: PathBuf::from("/etc/apt/sources.list.d/gcsfuse.list"),
            yum_repo: PathBuf::from("/etc/yum.repos.d/gcsfuse.repo"),
            proc_mounts: PathBuf::from("/proc/mounts"),
        }
    }
}

impl SystemPaths {
    /// All paths re-rooted under `root`
    pub fn under(root: &Path) -> Self {
        let defaults = Self::default();
        let reroot = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            os_release: reroot(&defaults.os_release),
            fuse_conf: reroot(&defaults.fuse_conf),
            fstab: reroot(&defaults.fstab),
            apt_source: reroot(&defaults.apt_source),
            yum_repo: reroot(&defaults.yum_repo),
            proc_mounts: reroot(&defaults.proc_mounts),
        }
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config, applying overrides on top
    pub fn resolve(self, overrides: Overrides) -> Result<Config, ConfigError> {
        let RawConfig {
            mut logging,
            bucket,
            mount_point,
            options,
            paths,
        } = self;

        if let Some(level) = overrides.log_level {
            logging.level = level;
        }

        let bucket = match overrides.bucket {
            Some(bucket) => bucket,
            None => match bucket {
                Some(raw) => expand_env_vars(&raw)?,
                None => {
                    return Err(ConfigError::ValidationError(
                        "No bucket specified (use --bucket, BUCKET_NAME or `bucket:` in the config file)"
                            .to_string(),
                    ))
                }
            },
        };

        let mount_point = match overrides.mount_point {
            Some(path) => path,
            None => match mount_point {
                Some(raw) => PathBuf::from(expand_env_vars(&raw)?),
                None => PathBuf::from(DEFAULT_MOUNT_POINT),
            },
        };

        let mut mount = MountDescriptor::new(bucket, mount_point);

        let file_mode = options.file_mode.as_deref().map(parse_mode).transpose();
        let dir_mode = options.dir_mode.as_deref().map(parse_mode).transpose();
        let file_mode = file_mode.map_err(ConfigError::ValidationError)?;
        let dir_mode = dir_mode.map_err(ConfigError::ValidationError)?;

        // Priority: override > file > default
        mount.uid = overrides.uid.or(options.uid).unwrap_or(mount.uid);
        mount.gid = overrides.gid.or(options.gid).unwrap_or(mount.gid);
        mount.file_mode = overrides.file_mode.or(file_mode).unwrap_or(mount.file_mode);
        mount.dir_mode = overrides.dir_mode.or(dir_mode).unwrap_or(mount.dir_mode);
        mount.implicit_dirs = overrides
            .implicit_dirs
            .or(options.implicit_dirs)
            .unwrap_or(mount.implicit_dirs);
        mount.allow_other = overrides
            .allow_other
            .or(options.allow_other)
            .unwrap_or(mount.allow_other);
        mount.persist = overrides
            .persist
            .or(options.persist)
            .unwrap_or(mount.persist);

        Ok(Config {
            logging,
            mount,
            paths,
        })
    }
}

impl Config {
    /// Build configuration from an optional YAML file plus overrides
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let raw = match path {
            Some(path) => RawConfig::from_file(path)?,
            None => RawConfig::default(),
        };
        raw.resolve(overrides)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str, overrides: Overrides) -> Result<Self, ConfigError> {
        RawConfig::from_str(content)?.resolve(overrides)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mount = &self.mount;

        if mount.bucket.is_empty() {
            return Err(ConfigError::ValidationError(
                "Bucket name cannot be empty".to_string(),
            ));
        }
        if mount.bucket.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "Bucket name {:?} contains whitespace",
                mount.bucket
            )));
        }
        // gcsfuse would parse it as a flag
        if mount.bucket.starts_with('-') {
            return Err(ConfigError::ValidationError(format!(
                "Bucket name {:?} cannot start with '-'",
                mount.bucket
            )));
        }

        if !mount.mount_point.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "Mount point {:?} must be an absolute path",
                mount.mount_point
            )));
        }
        // fstab fields are whitespace separated
        if mount
            .mount_point
            .to_string_lossy()
            .chars()
            .any(char::is_whitespace)
        {
            return Err(ConfigError::ValidationError(format!(
                "Mount point {:?} contains whitespace",
                mount.mount_point
            )));
        }

        for (name, mode) in [("file_mode", mount.file_mode), ("dir_mode", mount.dir_mode)] {
            if mode > 0o7777 {
                return Err(ConfigError::ValidationError(format!(
                    "{} {:o} is not a valid permission mode",
                    name, mode
                )));
            }
        }

        Ok(())
    }
}

impl RawConfig {
    /// Load raw configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse raw configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Parse an octal permission string such as `777` or `0755`
pub fn parse_mode(s: &str) -> Result<u32, String> {
    let digits = s.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| format!("invalid octal mode {:?}", s))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
