// src/timer/step.rs

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::errors::Result;

/// Records how long each run step took between `start()` and `stop()`.
///
/// The file starts with a `# step \t seconds` header; every `stop()` appends
/// `<step>\t<seconds>`.
#[derive(Debug)]
pub struct StepTimer {
    path: PathBuf,
    counter: u64,
    started: Instant,
}

impl StepTimer {
    /// Create (or truncate) the timing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::write(&path, "# step \t seconds\n")?;
        Ok(Self {
            path,
            counter: 0,
            started: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn step(&self) -> u64 {
        self.counter
    }

    pub fn start(&mut self) {
        self.counter += 1;
        self.started = Instant::now();
    }

    pub fn stop(&self) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{}\t{:.3e}",
            self.counter,
            self.started.elapsed().as_secs_f64()
        )?;
        Ok(())
    }
}
