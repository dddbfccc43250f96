// src/config/validate.rs

use regex::Regex;

use crate::config::model::{JobFile, RawJobFile};
use crate::errors::{JobError, Result};

impl TryFrom<RawJobFile> for JobFile {
    type Error = crate::errors::JobError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(JobFile::new_unchecked(raw.job, raw.discovery, raw.run))
    }
}

fn validate_raw_config(cfg: &RawJobFile) -> Result<()> {
    validate_job(cfg)?;
    validate_time_pattern(cfg)?;
    validate_discovery(cfg)?;
    validate_markers(cfg)?;
    Ok(())
}

fn validate_job(cfg: &RawJobFile) -> Result<()> {
    let job = &cfg.job;

    if job.name.trim().is_empty() {
        return Err(JobError::ConfigError("[job].name must not be empty".to_string()));
    }
    if job.cmd.first().is_none_or(|exe| exe.trim().is_empty()) {
        return Err(JobError::ConfigError(format!(
            "job '{}' has an empty `cmd`",
            job.name
        )));
    }
    if let Some(end) = job.end_time {
        if !end.is_finite() || end < 0.0 {
            return Err(JobError::ConfigError(format!(
                "job '{}': end_time must be a non-negative number (got {end})",
                job.name
            )));
        }
    }
    if job.tail_bytes == 0 {
        return Err(JobError::ConfigError(format!(
            "job '{}': tail_bytes must be >= 1",
            job.name
        )));
    }
    Ok(())
}

fn validate_time_pattern(cfg: &RawJobFile) -> Result<()> {
    let re = Regex::new(&cfg.job.time_regex)?;
    if re.captures_len() < 2 {
        return Err(JobError::ConfigError(format!(
            "job '{}': time_regex '{}' needs a capture group for the time value",
            cfg.job.name, cfg.job.time_regex
        )));
    }
    Ok(())
}

fn validate_discovery(cfg: &RawJobFile) -> Result<()> {
    let d = &cfg.discovery;

    if d.launcher.trim().is_empty() {
        return Err(JobError::ConfigError(
            "[discovery].launcher must not be empty".to_string(),
        ));
    }
    for (field, value) in [
        ("launcher_attempts", d.launcher_attempts),
        ("launcher_wait_ms", d.launcher_wait_ms),
        ("child_wait_ms", d.child_wait_ms),
        ("child_limit", d.child_limit),
    ] {
        if value == 0 {
            return Err(JobError::ConfigError(format!(
                "[discovery].{field} must be >= 1 (got 0)"
            )));
        }
    }
    if cfg.run.poll_ms == 0 {
        return Err(JobError::ConfigError(
            "[run].poll_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_markers(cfg: &RawJobFile) -> Result<()> {
    if let Some(interface) = &cfg.job.markers.interface {
        if !(1..=9).contains(&interface.width) {
            return Err(JobError::ConfigError(format!(
                "[job.markers].interface width must be between 1 and 9 (got {})",
                interface.width
            )));
        }
        if interface.suffix.is_empty() {
            return Err(JobError::ConfigError(
                "[job.markers].interface suffix must not be empty".to_string(),
            ));
        }
    }
    if cfg.job.markers.ok.as_deref().is_some_and(str::is_empty) {
        return Err(JobError::ConfigError(
            "[job.markers].ok must not be empty".to_string(),
        ));
    }
    Ok(())
}
