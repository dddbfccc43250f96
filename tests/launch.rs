// tests/launch.rs

use std::error::Error;
use std::time::Duration;

use jobvisor::errors::JobError;
use jobvisor::job::launch::{find_launcher, parallel_ranks, resolve_executable, runs_launcher};
use jobvisor::process::MockProcessTable;

type TestResult = Result<(), Box<dyn Error>>;

fn cmd(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parallel_ranks_forms() {
    assert_eq!(parallel_ranks(&cmd(&["sim", "CASE"])), None);
    assert_eq!(parallel_ranks(&cmd(&["mpirun", "--np", "4", "sim"])), Some(4));
    assert_eq!(parallel_ranks(&cmd(&["mpirun", "-np", "8", "sim"])), Some(8));
    assert_eq!(parallel_ranks(&cmd(&["mpirun", "-n", "2", "sim"])), Some(2));
    assert_eq!(parallel_ranks(&cmd(&["mpirun", "--np=16", "sim"])), Some(16));
    assert_eq!(
        parallel_ranks(&cmd(&["mpirun", "--np", "2", "sim", "-n", "6"])),
        Some(6)
    );
    // A flag without a usable value is ignored.
    assert_eq!(parallel_ranks(&cmd(&["mpirun", "--np", "many"])), None);
    assert_eq!(parallel_ranks(&cmd(&["sim", "-n"])), None);
}

#[tokio::test]
async fn launcher_only_searched_for_parallel_runs() -> TestResult {
    let table = MockProcessTable::new();
    table.spawn("mpirun", None);

    let serial = find_launcher(
        &table,
        &cmd(&["sim"]),
        "mpirun",
        3,
        Duration::from_millis(1),
    )
    .await?;
    assert_eq!(serial, None);

    let single_rank = find_launcher(
        &table,
        &cmd(&["mpirun", "--np", "1", "sim"]),
        "mpirun",
        3,
        Duration::from_millis(1),
    )
    .await?;
    assert_eq!(single_rank, None);
    Ok(())
}

#[tokio::test]
async fn rank_flags_of_other_programs_are_not_a_parallel_launch() -> TestResult {
    let table = MockProcessTable::new();
    // Someone else's mpirun is running on the machine.
    table.spawn("mpirun", None);

    for args in [&["sim", "-n", "4"][..], &["./run.sh", "--np", "8"][..]] {
        let found = find_launcher(&table, &cmd(args), "mpirun", 3, Duration::from_millis(1)).await?;
        assert_eq!(found, None, "{args:?}");
    }
    Ok(())
}

#[test]
fn launcher_is_matched_on_file_name() {
    assert!(runs_launcher(&cmd(&["mpirun", "-n", "2", "sim"]), "mpirun"));
    assert!(runs_launcher(&cmd(&["/opt/mpi/bin/mpirun", "sim"]), "mpirun"));
    assert!(!runs_launcher(&cmd(&["sim", "-n", "4"]), "mpirun"));
    assert!(!runs_launcher(&cmd(&["mpirun-wrapper", "sim"]), "mpirun"));
    assert!(!runs_launcher(&[], "mpirun"));
}

#[tokio::test]
async fn launcher_found_or_given_up() -> TestResult {
    let table = MockProcessTable::new();
    let parallel = cmd(&["mpirun", "--np", "4", "sim"]);

    let missing = find_launcher(&table, &parallel, "mpirun", 3, Duration::from_millis(1)).await?;
    assert_eq!(missing, None);

    let pid = table.spawn("mpirun", None);
    let found = find_launcher(&table, &parallel, "mpirun", 3, Duration::from_millis(1)).await?;
    assert_eq!(found, Some(pid));
    Ok(())
}

#[test]
fn missing_executable_is_reported() {
    let result = resolve_executable("definitely-not-a-real-binary-xyz");
    match result {
        Err(JobError::ExecutableNotFound(name)) => {
            assert_eq!(name, "definitely-not-a-real-binary-xyz");
        }
        other => panic!("expected ExecutableNotFound, got {other:?}"),
    }

    let result = resolve_executable("/definitely/not/here/sim");
    assert!(matches!(result, Err(JobError::ExecutableNotFound(_))));
}

#[cfg(unix)]
#[test]
fn executables_resolve_on_path_and_by_location() -> TestResult {
    use jobvisor_test_utils::scripts::{arg, write_script};

    let sh = resolve_executable("sh")?;
    assert!(sh.is_absolute());
    assert!(sh.ends_with("sh"));

    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "sim", "exit 0");
    assert_eq!(resolve_executable(&arg(&script))?, script);

    // Present but not executable.
    let plain = dir.path().join("notes.txt");
    std::fs::write(&plain, "hello")?;
    assert!(matches!(
        resolve_executable(&arg(&plain)),
        Err(JobError::ExecutableNotFound(_))
    ));
    Ok(())
}
