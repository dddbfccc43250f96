// tests/supervisor_mock.rs

use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::time::sleep;

use jobvisor::errors::JobError;
use jobvisor::job::JobSupervisor;
use jobvisor::poll::{LivenessCheck, WaitSpec};
use jobvisor::process::{MockProcessTable, ProcessHandle, ProcessSignal, ProcessStatus, ProcessTable};
use jobvisor::timer::TimerState;
use jobvisor_test_utils::builders::JobFileBuilder;
use jobvisor_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

/// A launcher (`runner`) with one helper and two `sim` workers.
struct Tree {
    table: MockProcessTable,
    parent: u32,
    helper: u32,
    workers: [u32; 2],
}

fn tree() -> Tree {
    let table = MockProcessTable::new();
    let parent = table.spawn("runner", None);
    let helper = table.spawn("helper", Some(parent));
    let w1 = table.spawn("sim", Some(helper));
    let w2 = table.spawn("sim", Some(helper));
    Tree {
        table,
        parent,
        helper,
        workers: [w1, w2],
    }
}

fn supervisor(builder: JobFileBuilder, table: &MockProcessTable) -> JobSupervisor {
    JobSupervisor::with_table(&builder.build(), Arc::new(table.clone())).unwrap()
}

fn pids(handles: &[ProcessHandle]) -> Vec<u32> {
    handles.iter().map(ProcessHandle::pid).collect()
}

#[tokio::test]
async fn active_set_is_children_then_parent() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);

    job.attach(t.parent).await?;

    assert_eq!(job.parent().map(ProcessHandle::pid), Some(t.parent));
    assert_eq!(pids(job.children()), vec![t.helper, t.workers[0], t.workers[1]]);
    assert_eq!(job.main().map(ProcessHandle::pid), Some(t.workers[1]));
    assert_eq!(
        pids(job.active()),
        vec![t.helper, t.workers[0], t.workers[1], t.parent]
    );
    assert!(job.is_running());

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn parent_only_without_stop_children() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"])
            .case(dir.path().join("CASE"))
            .stop_children(false),
        &t.table,
    );

    job.attach(t.parent).await?;

    assert_eq!(pids(job.active()), vec![t.parent]);
    assert_eq!(job.main().map(ProcessHandle::pid), Some(t.workers[1]));
    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn parent_is_main_when_no_worker_child() -> TestResult {
    let dir = tempdir()?;
    let table = MockProcessTable::new();
    let parent = table.spawn("runner", None);
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")),
        &table,
    );

    job.attach(parent).await?;

    assert!(job.children().is_empty());
    assert_eq!(job.main().map(ProcessHandle::pid), Some(parent));
    assert_eq!(pids(job.active()), vec![parent]);
    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn missing_worker_fails_start_when_required() -> TestResult {
    let dir = tempdir()?;
    let table = MockProcessTable::new();
    let parent = table.spawn("runner", None);
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"])
            .case(dir.path().join("CASE"))
            .require_child(true),
        &table,
    );

    let result = job.attach(parent).await;
    assert!(matches!(result, Err(JobError::ChildSearchFailed { .. })));
    Ok(())
}

#[tokio::test]
async fn parallel_launch_uses_launcher_as_parent() -> TestResult {
    let dir = tempdir()?;
    let table = MockProcessTable::new();
    let spawned = table.spawn("wrapper", None);
    let launcher = table.spawn("mpirun", None);
    let worker = table.spawn("sim", Some(launcher));
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["mpirun", "--np", "4", "sim"]).case(dir.path().join("CASE")),
        &table,
    );

    job.attach(spawned).await?;

    assert_eq!(job.parent().map(ProcessHandle::pid), Some(launcher));
    assert_eq!(pids(job.active()), vec![worker, launcher]);
    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn immediate_suspend_and_resume_hit_every_active_process() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;

    job.suspend(true).await?;
    for pid in [t.helper, t.workers[0], t.workers[1], t.parent] {
        assert_eq!(t.table.status(pid), ProcessStatus::Stopped);
    }

    job.resume(true).await?;
    for pid in [t.helper, t.workers[0], t.workers[1], t.parent] {
        assert_eq!(t.table.status(pid), ProcessStatus::Running);
    }

    let suspends: Vec<u32> = t
        .table
        .signals()
        .into_iter()
        .filter(|(_, s)| *s == ProcessSignal::Suspend)
        .map(|(pid, _)| pid)
        .collect();
    assert_eq!(suspends, vec![t.helper, t.workers[0], t.workers[1], t.parent]);

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn suspend_all_does_not_stop_at_first_failure() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    t.table.deny(t.helper);
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;

    assert!(!job.suspend_all());
    assert_eq!(t.table.status(t.workers[0]), ProcessStatus::Stopped);
    assert_eq!(t.table.status(t.parent), ProcessStatus::Stopped);
    assert!(!job.resume_all());

    let errors = job.log_suspend_errors().ok_or("expected suspend errors")?;
    assert!(errors.contains("helper failed to suspend/resume 2 times"));

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn disabled_keep_alive_never_signals() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"])
            .case(dir.path().join("CASE"))
            .keep_alive(-1.0),
        &t.table,
    );
    job.attach(t.parent).await?;

    job.suspend(true).await?;
    job.resume(true).await?;

    assert!(t.table.signals().is_empty());
    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn delayed_suspend_fires_after_window() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"])
            .case(dir.path().join("CASE"))
            .keep_alive(0.3),
        &t.table,
    );
    job.attach(t.parent).await?;
    assert_eq!(job.suspend_timer_state(), Some(TimerState::Idle));

    job.suspend(false).await?;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(t.table.status(t.parent), ProcessStatus::Running);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(job.suspend_timer_state(), Some(TimerState::Fired));
    for pid in [t.helper, t.workers[0], t.workers[1], t.parent] {
        assert_eq!(t.table.status(pid), ProcessStatus::Stopped);
    }

    job.resume(false).await?;
    for pid in [t.helper, t.workers[0], t.workers[1], t.parent] {
        assert_eq!(t.table.status(pid), ProcessStatus::Running);
    }

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn resume_inside_window_drops_the_suspend() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"])
            .case(dir.path().join("CASE"))
            .keep_alive(0.3),
        &t.table,
    );
    job.attach(t.parent).await?;

    job.suspend(false).await?;
    sleep(Duration::from_millis(50)).await;
    job.resume(false).await?;
    assert_eq!(job.suspend_timer_state(), Some(TimerState::Canceled));

    sleep(Duration::from_millis(500)).await;
    assert!(t.table.signals().is_empty());
    assert_eq!(t.table.status(t.parent), ProcessStatus::Running);

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn wait_for_bounds_and_raises_on_request() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;

    let ok = job
        .wait_for(|| Ok(true), WaitSpec::new("instant").limit(Some(0)))
        .await?;
    assert!(ok);

    let ok = job
        .wait_for(
            || Ok(false),
            WaitSpec::new("never").pause(Some(Duration::from_millis(1))).limit(Some(3)),
        )
        .await?;
    assert!(!ok);

    let result = job
        .wait_for(
            || Ok(false),
            WaitSpec::new("never")
                .pause(None)
                .limit(Some(3))
                .raise_on_exhaustion(None),
        )
        .await;
    match result {
        Err(JobError::LoopLimitExceeded { limit, message }) => {
            assert_eq!(limit, Some(3));
            assert!(message.contains("never"));
        }
        other => panic!("expected LoopLimitExceeded, got {other:?}"),
    }

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn default_liveness_reports_unexpected_termination() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;
    fs::write(job.log_path().ok_or("no log")?, "TIME 4.25\n")?;

    t.table.exit(t.workers[0]);
    let result = job
        .wait_for(|| Ok(false), WaitSpec::new("never").pause(Some(Duration::from_millis(1))))
        .await;

    match result {
        Err(JobError::UnexpectedTermination { job: name, elapsed, log }) => {
            assert_eq!(name, "sim");
            assert_eq!(elapsed, Some(4.25));
            assert_eq!(log.as_deref(), job.log_path());
        }
        other => panic!("expected UnexpectedTermination, got {other:?}"),
    }
    assert!(job.stopped_unexpectedly());

    // A custom check replaces the default one.
    let ok = job
        .wait_for(
            || Ok(false),
            WaitSpec::new("custom")
                .pause(None)
                .limit(Some(2))
                .liveness(LivenessCheck::Skip),
        )
        .await?;
    assert!(!ok);

    job.kill().await?;
    Ok(())
}

#[tokio::test]
async fn cancel_is_observed_inside_wait() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;
    fs::write(job.log_path().ok_or("no log")?, "TIME 12.50\n")?;

    let cancel = job.cancel_handle();
    let mut polls = 0;
    let result = job
        .wait_for(
            || {
                polls += 1;
                if polls == 3 {
                    cancel.cancel();
                }
                Ok(false)
            },
            WaitSpec::new("cancel").pause(Some(Duration::from_millis(1))),
        )
        .await;

    match result {
        Err(err @ JobError::Canceled { .. }) => {
            assert!(err.is_success());
            assert_eq!(err.to_string(), "run stopped after 12.5 days");
        }
        other => panic!("expected Canceled, got {other:?}"),
    }
    assert_eq!(polls, 3);
    assert!(job.is_canceled());

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn progress_and_completion_from_log() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"])
            .case(dir.path().join("CASE"))
            .end_time(10.0),
        &t.table,
    );
    job.attach(t.parent).await?;
    let log = job.log_path().ok_or("no log")?.to_path_buf();
    assert_eq!(log, dir.path().join("sim.log"));

    assert_eq!(job.time(), 0.0);

    fs::write(&log, "step\nTIME 3.5\nstep\n")?;
    assert_eq!(job.get_time_and_stop_if_limit_reached()?, 3.5);

    fs::write(&log, "TIME 3.5\nTIME 7.2\n")?;
    assert_eq!(job.get_time_and_stop_if_limit_reached()?, 7.2);
    assert_eq!(job.elapsed(), 7.2);

    fs::write(&log, "TIME 3.5\nTIME 7.2\nTIME 10.0\n")?;
    let result = job.get_time_and_stop_if_limit_reached();
    assert!(matches!(result, Err(JobError::JobComplete { .. })));
    assert_eq!(job.elapsed(), 10.0);

    job.set_end_time(Some(20.0));
    assert_eq!(job.get_time_and_stop_if_limit_reached()?, 10.0);

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn wait_for_process_to_finish_kills_on_timeout() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;

    job.wait_for_process_to_finish(
        Some(0.001),
        Some(Duration::from_millis(10)),
        LivenessCheck::Skip,
    )
    .await?;

    assert!(t.table.alive_pids().is_empty());
    assert!(job.active().is_empty());
    Ok(())
}

#[tokio::test]
async fn wait_for_process_to_finish_returns_when_main_exits() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;

    t.table.exit(t.workers[1]);
    job.wait_for_process_to_finish(Some(1.0), Some(Duration::from_millis(10)), LivenessCheck::Skip)
        .await?;

    assert!(t.table.is_alive(t.parent));
    assert_eq!(job.active().len(), 4);
    job.kill().await?;
    assert!(t.table.alive_pids().is_empty());
    Ok(())
}

#[tokio::test]
async fn wait_for_files_names_the_missing_file() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;

    let present = dir.path().join("CASE.I0001");
    let missing = dir.path().join("CASE.I0002");
    fs::write(&present, "")?;

    job.wait_for_files(&[present.clone()], Some(0.01)).await?;

    let result = job.wait_for_files(&[present, missing.clone()], Some(0.001)).await;
    match result {
        Err(JobError::LoopLimitExceeded { message, .. }) => {
            assert_eq!(message, format!("{} is missing", missing.display()));
        }
        other => panic!("expected LoopLimitExceeded, got {other:?}"),
    }

    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent_and_removes_markers() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let case = dir.path().join("CASE");
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"])
            .case(&case)
            .interface_marker(".I", 4)
            .ok_marker(".OK")
            .keep_alive(5.0),
        &t.table,
    );
    job.attach(t.parent).await?;

    let interface = job.interface_marker().ok_or("no interface marker")?.clone();
    interface.clone().at(1).create()?;
    interface.clone().at(2).create()?;
    job.ok_marker().ok_or("no ok marker")?.create()?;
    let unrelated = dir.path().join("CASE.I12");
    fs::write(&unrelated, "")?;

    job.close().await?;
    job.close().await?;

    assert!(!dir.path().join("CASE.I0001").exists());
    assert!(!dir.path().join("CASE.I0002").exists());
    assert!(!dir.path().join("CASE.OK").exists());
    assert!(unrelated.exists());
    assert!(job.active().is_empty());
    assert!(job.main().is_none());
    assert!(!job.is_running());
    assert_eq!(job.suspend_timer_state(), None);

    // close() never signals processes.
    assert!(t.table.signals().is_empty());
    Ok(())
}

#[tokio::test]
async fn keep_files_preserves_markers() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(
        JobFileBuilder::new("sim", &["runner"])
            .case(dir.path().join("CASE"))
            .ok_marker(".OK")
            .keep_files(true),
        &t.table,
    );
    job.attach(t.parent).await?;
    job.ok_marker().ok_or("no ok marker")?.create()?;

    job.close().await?;
    assert!(dir.path().join("CASE.OK").exists());
    Ok(())
}

#[tokio::test]
async fn kill_tolerates_gone_and_denied_processes() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;

    t.table.exit(t.workers[0]);
    t.table.deny(t.workers[1]);
    job.kill().await?;

    assert_eq!(t.table.alive_pids(), vec![t.workers[1]]);
    assert!(job.active().is_empty());
    Ok(())
}

#[tokio::test]
async fn attach_twice_is_rejected() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(JobFileBuilder::new("sim", &["runner"]).case(dir.path().join("CASE")), &t.table);
    job.attach(t.parent).await?;

    let result = job.attach(t.parent).await;
    assert!(matches!(result, Err(JobError::ConfigError(_))));
    job.close().await?;
    Ok(())
}

#[tokio::test]
async fn step_timer_records_each_suspend() -> TestResult {
    let dir = tempdir()?;
    let t = tree();
    let mut job = supervisor(
        JobFileBuilder::new("Sim", &["runner"])
            .case(dir.path().join("CASE"))
            .step_timer(true),
        &t.table,
    );
    job.attach(t.parent).await?;
    assert_eq!(job.step_timer().map(|s| s.step()), Some(1));

    job.suspend(false).await?;
    job.resume(false).await?;
    job.suspend(false).await?;

    let timings = fs::read_to_string(dir.path().join("sim_timer.dat"))?;
    let steps: Vec<&str> = timings
        .lines()
        .skip(1)
        .filter_map(|line| line.split('\t').next())
        .collect();
    assert_eq!(steps, vec!["1", "2"]);

    job.close().await?;
    Ok(())
}
