use std::fs;

use utils::logging;

#[test]
fn writes_rotated_log_file() {
    let dir = tempfile::tempdir().expect("should create temp dir");

    let guard = logging::init(Some(dir.path()));
    assert!(guard.is_some());

    tracing::info!("hello from the supervisor");
    drop(guard);

    let files: Vec<_> = fs::read_dir(dir.path())
        .expect("should read log dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("supervisor.log"));

    let contents =
        fs::read_to_string(dir.path().join(&files[0])).expect("should read log file");
    assert!(contents.contains("hello from the supervisor"));
}
