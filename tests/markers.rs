// tests/markers.rs

use std::error::Error;
use std::fs;

use tempfile::tempdir;

use jobvisor::job::MarkerFile;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn numbered_paths_are_zero_padded() {
    let marker = MarkerFile::numbered("/runs/CASE.I", 4);
    assert_eq!(marker.path().to_string_lossy(), "/runs/CASE.I");
    assert_eq!(marker.clone().at(7).path().to_string_lossy(), "/runs/CASE.I0007");
    assert_eq!(marker.at(12345).path().to_string_lossy(), "/runs/CASE.I12345");

    // Numbers are ignored for single markers.
    let ok = MarkerFile::single("/runs/CASE.OK").at(3);
    assert_eq!(ok.path().to_string_lossy(), "/runs/CASE.OK");
}

#[test]
fn create_append_and_delete() -> TestResult {
    let dir = tempdir()?;
    let marker = MarkerFile::single(dir.path().join("CASE.OK"));
    assert!(marker.is_deleted());

    marker.create()?;
    assert!(marker.exists());
    marker.append("step 1\n")?;
    marker.append("step 2\n")?;
    assert_eq!(fs::read_to_string(marker.path())?, "step 1\nstep 2\n");

    marker.create_from_str("fresh")?;
    assert_eq!(fs::read_to_string(marker.path())?, "fresh");

    marker.delete();
    assert!(marker.is_deleted());
    // Deleting twice is fine.
    marker.delete();
    Ok(())
}

#[test]
fn create_from_file_moves_or_copies() -> TestResult {
    let dir = tempdir()?;
    let src = dir.path().join("input.txt");
    fs::write(&src, "payload")?;
    let marker = MarkerFile::numbered(dir.path().join("CASE.I"), 2).at(1);

    let path = marker.create_from_file(&src, false)?;
    assert_eq!(path, dir.path().join("CASE.I01"));
    assert_eq!(fs::read_to_string(&path)?, "payload");
    assert!(src.exists());

    let next = MarkerFile::numbered(dir.path().join("CASE.I"), 2).at(2);
    next.create_from_file(&src, true)?;
    assert!(next.exists());
    assert!(!src.exists());
    Ok(())
}

#[test]
fn delete_all_removes_only_the_family() -> TestResult {
    let dir = tempdir()?;
    let family = MarkerFile::numbered(dir.path().join("CASE.I"), 4);
    for n in [1, 2, 42] {
        family.clone().at(n).create()?;
    }
    let keep = [
        dir.path().join("CASE.I12"),
        dir.path().join("CASE.I0001.bak"),
        dir.path().join("OTHER.I0001"),
        dir.path().join("CASE.OK"),
    ];
    for path in &keep {
        fs::write(path, "")?;
    }

    assert_eq!(family.delete_all()?, 3);

    for n in [1, 2, 42] {
        assert!(family.clone().at(n).is_deleted());
    }
    for path in &keep {
        assert!(path.exists(), "{} was removed", path.display());
    }
    assert_eq!(family.delete_all()?, 0);
    Ok(())
}

#[cfg(unix)]
#[test]
fn delete_all_treats_glob_characters_literally() -> TestResult {
    let dir = tempdir()?;
    let family = MarkerFile::numbered(dir.path().join("run[1]*.I"), 2);
    family.clone().at(5).create()?;
    let lookalike = dir.path().join("run1x.I05");
    fs::write(&lookalike, "")?;

    assert_eq!(family.delete_all()?, 1);
    assert!(lookalike.exists());
    Ok(())
}

#[test]
fn delete_all_in_missing_directory() -> TestResult {
    let dir = tempdir()?;
    let family = MarkerFile::numbered(dir.path().join("gone").join("CASE.I"), 3);
    assert_eq!(family.delete_all()?, 0);

    let single = MarkerFile::single(dir.path().join("CASE.OK"));
    assert_eq!(single.delete_all()?, 0);
    single.create()?;
    assert_eq!(single.delete_all()?, 1);
    Ok(())
}
