#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable `sh` script named `name` into `dir`.
///
/// The script's process name is `name`, which lets tests control what the
/// child search sees.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// Path as an owned `String`, for building command vectors.
pub fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
