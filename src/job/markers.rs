// src/job/markers.rs

//! Small synchronisation files shared with the supervised job.
//!
//! A marker is either a single file (`CASE.OK`) or a numbered family
//! (`CASE.I0001`, `CASE.I0002`, ...). The supervisor only deletes them at
//! teardown and checks for existence while waiting; the rest of the API is
//! for drivers that talk to the job through these files.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use tracing::{debug, warn};

use crate::errors::{JobError, Result};

#[derive(Debug, Clone)]
enum Kind {
    Single,
    Numbered { width: usize },
}

#[derive(Debug, Clone)]
pub struct MarkerFile {
    base: PathBuf,
    kind: Kind,
    current: Option<u64>,
}

impl MarkerFile {
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self {
            base: path.into(),
            kind: Kind::Single,
            current: None,
        }
    }

    /// A family of files named `base` followed by a zero-padded number.
    pub fn numbered(base: impl Into<PathBuf>, width: usize) -> Self {
        Self {
            base: base.into(),
            kind: Kind::Numbered { width },
            current: None,
        }
    }

    /// Select the `n`-th file of a numbered family. No effect on a single
    /// marker.
    pub fn at(mut self, n: u64) -> Self {
        if matches!(self.kind, Kind::Numbered { .. }) {
            self.current = Some(n);
        }
        self
    }

    pub fn path(&self) -> PathBuf {
        match (&self.kind, self.current) {
            (Kind::Numbered { width }, Some(n)) => {
                let mut name = self.base.as_os_str().to_os_string();
                name.push(format!("{n:0width$}", width = *width));
                PathBuf::from(name)
            }
            _ => self.base.clone(),
        }
    }

    /// Create an empty marker (truncating an existing one).
    pub fn create(&self) -> Result<PathBuf> {
        let path = self.path();
        fs::write(&path, b"")?;
        debug!(marker = %path.display(), "marker created");
        Ok(path)
    }

    pub fn create_from_str(&self, content: &str) -> Result<PathBuf> {
        let path = self.path();
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Copy `src` into the marker, optionally removing `src` afterwards.
    pub fn create_from_file(&self, src: impl AsRef<Path>, delete_src: bool) -> Result<PathBuf> {
        let src = src.as_ref();
        let path = self.path();
        if src != path {
            fs::copy(src, &path)?;
            if delete_src {
                silent_delete(src);
            }
        }
        Ok(path)
    }

    pub fn append(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Remove the current file. Missing files and permission errors are
    /// ignored.
    pub fn delete(&self) {
        silent_delete(&self.path());
    }

    /// Remove every file of a numbered family (or the single file).
    pub fn delete_all(&self) -> Result<usize> {
        let width = match self.kind {
            Kind::Single => {
                let existed = self.exists();
                self.delete();
                return Ok(usize::from(existed));
            }
            Kind::Numbered { width } => width,
        };

        let Some(dir) = parent_dir(&self.base) else {
            return Ok(0);
        };
        let matcher = self.family_matcher(width)?;

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if matcher.is_match(Path::new(&name)) {
                silent_delete(&entry.path());
                removed += 1;
            }
        }
        debug!(base = %self.base.display(), removed, "marker family deleted");
        Ok(removed)
    }

    fn family_matcher(&self, width: usize) -> Result<GlobMatcher> {
        let stem = self
            .base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                JobError::ConfigError(format!("marker base {} has no file name", self.base.display()))
            })?;
        let pattern = format!("{}{}", globset::escape(&stem), "[0-9]".repeat(width));
        let glob = Glob::new(&pattern).map_err(|e| {
            JobError::ConfigError(format!("invalid marker pattern '{pattern}': {e}"))
        })?;
        Ok(glob.compile_matcher())
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    pub fn is_deleted(&self) -> bool {
        !self.exists()
    }
}

fn parent_dir(path: &Path) -> Option<PathBuf> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Some(PathBuf::from(".")),
        Some(p) => Some(p.to_path_buf()),
        None => None,
    }
}

fn silent_delete(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {}
        Err(e) => warn!(path = %path.display(), error = %e, "unable to delete"),
    }
}
