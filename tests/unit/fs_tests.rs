//! Unit tests for agent file access.

use std::fmt::Write as _;
use std::path::Path;

use acp_engine::host::fs::{select_lines, FileAccess};
use acp_engine::models::protocol::{ReadTextFileRequest, WriteTextFileRequest};
use acp_engine::AppError;

fn twenty_lines() -> String {
    (1..=20).fold(String::new(), |mut acc, n| {
        let _ = writeln!(acc, "line{n}");
        acc
    })
}

fn read_request(path: &Path) -> ReadTextFileRequest {
    ReadTextFileRequest {
        session_id: None,
        path: path.to_path_buf(),
        start_line: None,
        end_line: None,
        limit: None,
    }
}

#[tokio::test]
async fn reads_inclusive_line_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("f.txt");
    std::fs::write(&path, twenty_lines()).unwrap();

    let mut request = read_request(&path);
    request.start_line = Some(5);
    request.end_line = Some(8);
    let response = FileAccess::unrestricted()
        .read_text_file(&request)
        .await
        .expect("read");

    assert_eq!(response.content, "line5\nline6\nline7\nline8");
    assert_eq!(response.total_lines, 20);
}

#[tokio::test]
async fn limit_form_selects_the_same_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("f.txt");
    std::fs::write(&path, twenty_lines()).unwrap();

    let request: ReadTextFileRequest = serde_json::from_value(serde_json::json!({
        "path": path,
        "line": 5,
        "limit": 4
    }))
    .unwrap();
    let response = FileAccess::unrestricted()
        .read_text_file(&request)
        .await
        .expect("read");

    assert_eq!(response.content, "line5\nline6\nline7\nline8");
}

#[tokio::test]
async fn whole_file_without_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("f.txt");
    std::fs::write(&path, "a\nb\n").unwrap();

    let response = FileAccess::unrestricted()
        .read_text_file(&read_request(&path))
        .await
        .expect("read");

    assert_eq!(response.content, "a\nb\n");
    assert_eq!(response.total_lines, 2);
}

#[test]
fn window_past_the_end_is_clamped() {
    let response = select_lines("a\nb\nc", Some(2), Some(99));
    assert_eq!(response.content, "b\nc");
    assert_eq!(response.total_lines, 3);

    let empty = select_lines("a\nb\nc", Some(3), Some(1));
    assert_eq!(empty.content, "");
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    let err = FileAccess::unrestricted()
        .read_text_file(&read_request(Path::new("/definitely/not/here.txt")))
        .await
        .expect_err("missing");
    assert!(matches!(err, AppError::Io(_)));
}

#[tokio::test]
async fn write_creates_parents_and_replaces_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested/deeper/out.txt");
    let files = FileAccess::unrestricted();

    for content in ["first", "second"] {
        files
            .write_text_file(WriteTextFileRequest {
                session_id: None,
                path: path.clone(),
                content: content.into(),
            })
            .await
            .expect("write");
    }

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(leftovers, 1, "no temporary files left behind");
}

#[tokio::test]
async fn confined_access_rejects_traversal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("root");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(dir.path().join("secret.txt"), "x").unwrap();
    let files = FileAccess::confined_to(&root).expect("root exists");

    let err = files
        .read_text_file(&read_request(&root.join("../secret.txt")))
        .await
        .expect_err("escapes root");
    assert!(matches!(err, AppError::PermissionDenied(_)));

    let err = files
        .write_text_file(WriteTextFileRequest {
            session_id: None,
            path: dir.path().join("outside.txt"),
            content: "x".into(),
        })
        .await
        .expect_err("outside root");
    assert!(matches!(err, AppError::PermissionDenied(_)));
    assert!(!dir.path().join("outside.txt").exists());
}

#[tokio::test]
async fn confined_access_allows_new_files_inside_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = FileAccess::confined_to(dir.path()).expect("root exists");
    let target = dir.path().join("sub/new.txt");

    files
        .write_text_file(WriteTextFileRequest {
            session_id: None,
            path: target.clone(),
            content: "ok".into(),
        })
        .await
        .expect("inside root");

    assert_eq!(std::fs::read_to_string(target).unwrap(), "ok");
}

#[cfg(unix)]
#[tokio::test]
async fn confined_access_rejects_symlink_escape() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("root");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(dir.path().join("secret.txt"), "x").unwrap();
    std::os::unix::fs::symlink(dir.path().join("secret.txt"), root.join("link.txt")).unwrap();
    let files = FileAccess::confined_to(&root).expect("root exists");

    let err = files
        .read_text_file(&read_request(&root.join("link.txt")))
        .await
        .expect_err("symlink escapes root");
    assert!(matches!(err, AppError::PermissionDenied(_)));
}
