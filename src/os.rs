//! Host identity: who we are running as and which distribution this is

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{ProvisionError, Result};

/// Distribution identity read from os-release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsIdentity {
    /// `ID`, lower-cased; empty when absent
    pub id: String,
    /// `VERSION_ID` as written; empty when absent
    pub version: String,
}

/// Parsed `KEY=VALUE` pairs of an os-release file
#[derive(Debug, Clone, Default)]
pub struct OsRelease {
    fields: HashMap<String, String>,
}

impl OsRelease {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn identity(&self) -> OsIdentity {
        OsIdentity {
            id: self.get("ID").unwrap_or_default().to_lowercase(),
            version: self.get("VERSION_ID").unwrap_or_default().to_string(),
        }
    }
}

/// Parse os-release content.
///
/// Each line is split on its first `=`; surrounding quotes are stripped
/// from the value. Blank lines, comments and lines without `=` are ignored.
pub fn parse_os_release(content: &str) -> OsRelease {
    let fields = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), unquote(value.trim()).to_string()))
        .collect();

    OsRelease { fields }
}

fn unquote(value: &str) -> &str {
    value.trim_matches('"').trim_matches('\'')
}

/// Read and parse the os-release file at `path`
pub fn detect_os(path: &Path) -> Result<OsIdentity> {
    let content = std::fs::read_to_string(path).map_err(|source| ProvisionError::Detection {
        path: path.to_path_buf(),
        source,
    })?;

    let identity = parse_os_release(&content).identity();
    debug!("Parsed {:?}: {:?}", path, identity);
    Ok(identity)
}

/// Effective user id of this process
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }
}

/// Fail unless `euid` is root
pub fn require_root(euid: u32) -> Result<()> {
    if euid != 0 {
        return Err(ProvisionError::NotRoot(euid));
    }
    Ok(())
}
