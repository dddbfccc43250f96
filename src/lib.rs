// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod job;
pub mod logging;
pub mod poll;
pub mod process;
pub mod timer;
pub mod types;

use std::path::Path;

use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::JobFile;
use crate::config::loader::load_and_validate;
use crate::errors::{JobError, Result};
use crate::job::JobSupervisor;
use crate::poll::WaitSpec;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - launching the job and resolving its process tree
/// - progress polling until the job ends, completes or is canceled
/// - Ctrl-C handling
/// - teardown (`quit` for regular ends, `kill` for failures)
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_and_validate(&args.config)?;
    if args.keep_files {
        cfg.job.keep_files = true;
    }

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mut job = JobSupervisor::new(&cfg)?;
    job.check_input()?;

    // Ctrl-C → cooperative cancel, observed between polls.
    {
        let cancel = job.cancel_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            cancel.cancel();
        });
    }

    let outcome = match job.start().await {
        Ok(()) => supervise(&job, &cfg).await,
        Err(e) => Err(e),
    };
    job.log_suspend_errors();

    match outcome {
        Ok(()) => {
            info!("{}", job.complete_message());
            job.close().await
        }
        Err(end) if end.is_success() => {
            info!("{end}");
            job.quit().await
        }
        Err(err) => {
            error!(job = %job.name(), error = %err, "job failed");
            if let Err(kill_err) = job.kill().await {
                warn!(error = %kill_err, "unable to kill job");
            }
            Err(err)
        }
    }
}

/// Follow the job's progress until its main process exits.
///
/// `Ok(())` means the job ended on its own without an end time to reach.
/// `JobComplete` / `Canceled` come back as errors, like every other way the
/// wait can end early.
async fn supervise(job: &JobSupervisor, cfg: &JobFile) -> Result<()> {
    let Some(main) = job.main().cloned() else {
        return Ok(());
    };
    info!(job = %job.name(), process = %main, "supervising");

    let spec = WaitSpec::new(format!("{} to finish", job.name()))
        .pause(Some(cfg.run.poll()))
        .check(|| job.stop_if_canceled());

    job.wait_for(
        || {
            job.get_time_and_stop_if_limit_reached()?;
            Ok(main.is_not_running())
        },
        spec,
    )
    .await?;

    // The job may have written its last progress line just before exiting.
    job.get_time_and_stop_if_limit_reached()?;

    match job.end_time() {
        Some(_) => Err(JobError::UnexpectedTermination {
            job: job.name().to_string(),
            elapsed: Some(job.elapsed()),
            log: job.log_path().map(Path::to_path_buf),
        }),
        None => Ok(()),
    }
}

/// Simple dry-run output: print the resolved job.
fn print_dry_run(cfg: &JobFile) {
    let job = &cfg.job;
    println!("jobvisor dry-run");
    println!("  name = {}", job.name);
    println!("  app_name = {}", job.effective_app_name());
    println!("  cmd = {}", job.cmd.join(" "));
    if let Some(dir) = &job.workdir {
        println!("  workdir = {}", dir.display());
    }
    match job.to_screen {
        true => println!("  log = <screen>"),
        false => println!("  log = {}", job.log_path().display()),
    }
    if let Some(end) = job.end_time {
        println!("  end_time = {end} {}", job.time_unit);
    }
    println!("  keep_alive = {}", job.keep_alive);
    println!("  stop_children = {}", job.stop_children);
    if job.pipe {
        println!("  pipe = true");
    }
    if let Some(interface) = &job.markers.interface {
        println!(
            "  interface markers = {}{}{}",
            job.case.display(),
            interface.suffix,
            "#".repeat(interface.width)
        );
    }
    if let Some(ok) = &job.markers.ok {
        println!("  ok marker = {}{ok}", job.case.display());
    }
    println!(
        "  discovery = launcher '{}' ({} x {} ms), children {} x {} ms",
        cfg.discovery.launcher,
        cfg.discovery.launcher_attempts,
        cfg.discovery.launcher_wait_ms,
        cfg.discovery.child_limit,
        cfg.discovery.child_wait_ms
    );
}
