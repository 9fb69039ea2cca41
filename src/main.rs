//! gcsfuse-mount entry point

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gcsfuse_mount::command::SystemExecutor;
use gcsfuse_mount::config::{parse_mode, Config, Overrides};
use gcsfuse_mount::{os, provision, ProvisionError};

/// Install gcsfuse and mount a GCS bucket, persisting it in /etc/fstab
#[derive(Parser, Debug)]
#[command(name = "gcsfuse-mount", version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "GCSFUSE_MOUNT_CONFIG")]
    config: Option<PathBuf>,

    /// Bucket to mount
    #[arg(short, long, env = "BUCKET_NAME")]
    bucket: Option<String>,

    /// Directory to mount the bucket on [default: /mnt/gcs-bucket]
    #[arg(short, long, env = "MOUNT_POINT")]
    mount_point: Option<PathBuf>,

    /// Owner uid for files in the mount
    #[arg(long)]
    uid: Option<u32>,

    /// Owner gid for files in the mount
    #[arg(long)]
    gid: Option<u32>,

    /// Octal permission bits for files
    #[arg(long, value_parser = parse_mode)]
    file_mode: Option<u32>,

    /// Octal permission bits for directories
    #[arg(long, value_parser = parse_mode)]
    dir_mode: Option<u32>,

    /// Don't infer directories from object name prefixes
    #[arg(long)]
    no_implicit_dirs: bool,

    /// Don't pass `-o allow_other` or touch /etc/fuse.conf
    #[arg(long)]
    no_allow_other: bool,

    /// Don't add an /etc/fstab entry
    #[arg(long)]
    no_persist: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        let disabled = |flag: bool| if flag { Some(false) } else { None };
        Overrides {
            bucket: self.bucket.clone(),
            mount_point: self.mount_point.clone(),
            uid: self.uid,
            gid: self.gid,
            file_mode: self.file_mode,
            dir_mode: self.dir_mode,
            implicit_dirs: disabled(self.no_implicit_dirs),
            allow_other: disabled(self.no_allow_other),
            persist: disabled(self.no_persist),
            log_level: self.log_level.clone(),
        }
    }
}

/// Privilege check, then load and validate configuration.
///
/// Root comes first so a non-root run reports that regardless of what
/// else is wrong with the invocation.
fn preflight(euid: u32, args: &Args) -> Result<Config, ProvisionError> {
    os::require_root(euid)?;
    let config = Config::load(args.config.as_deref(), args.overrides())?;
    config.validate()?;
    Ok(config)
}

/// Exit status for unusable command lines, shared with configuration errors
const USAGE_EXIT_CODE: i32 = 7;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(USAGE_EXIT_CODE);
        }
    };

    let euid = os::effective_uid();
    let config = match preflight(euid, &args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(e.exit_code());
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut exec = SystemExecutor::new();
    match provision::run(&config, &mut exec, euid) {
        Ok(_) => {
            info!(
                "✅ GCS bucket {} successfully mounted at {}",
                config.mount.bucket,
                config.mount.mount_point.display()
            );
        }
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
