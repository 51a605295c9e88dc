//! Collision Resolver
//!
//! Derives a destination that does not clobber anything: `name.ext`, then `name_1.ext`,
//! `name_2.ext`, ... up to a bounded number of probes, then a name carrying a
//! time-based and random token so resolution always terminates. Probing only reads
//! metadata; it never creates the candidate.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::fs::FileSystem;

/// Default probe bound
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// Return `desired` if it is free, otherwise the first free numbered variant
pub fn resolve_collision(fs: &dyn FileSystem, desired: &Path, max_attempts: usize) -> PathBuf {
    if !fs.exists(desired) {
        return desired.to_path_buf();
    }

    for n in 1..=max_attempts {
        let candidate = with_suffix(desired, &n.to_string());
        if !fs.exists(&candidate) {
            return candidate;
        }
    }

    log::warn!(
        "No free name for '{}' after {} attempts, using a unique token",
        desired.display(),
        max_attempts
    );
    loop {
        let candidate = with_suffix(desired, &unique_token());
        if !fs.exists(&candidate) {
            return candidate;
        }
    }
}

/// `dir/name.ext` -> `dir/name_<suffix>.ext`
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push("_");
    name.push(suffix);
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

fn unique_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let random: u32 = rand::thread_rng().gen();
    format!("{}_{:08x}", millis, random)
}
