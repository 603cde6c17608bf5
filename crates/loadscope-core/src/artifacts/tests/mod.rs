use super::*;
use flate2::read::GzDecoder;
use serde_json::json;
use std::io::Read;

fn gunzip(path: &Path) -> String {
    let mut out = String::new();
    GzDecoder::new(File::open(path).unwrap())
        .read_to_string(&mut out)
        .unwrap();
    out
}

#[test]
fn test_filmstrip_path_padding() {
    assert_eq!(filmstrip_path("/run/video/ms_", 50), "/run/video/ms_000050.jpg");
    assert_eq!(filmstrip_path("/run/video/ms_", 0), "/run/video/ms_000000.jpg");
    assert_eq!(
        filmstrip_path("/run/video/ms_", 1_234_567),
        "/run/video/ms_1234567.jpg"
    );
}

#[test]
fn test_event_log_framing() {
    let dir = tempfile::tempdir().unwrap();
    let path_base = dir.path().join("run1").display().to_string();
    let mut log = EventLog::new(&path_base);
    assert!(!log.is_open());

    log.append(&json!({"method": "Page.loadEventFired", "params": {}}))
        .unwrap();
    log.append(&json!({"method": "Network.dataReceived"})).unwrap();
    log.close().unwrap();

    let text = gunzip(&dir.path().join("run1_devtools.json.gz"));
    assert!(text.starts_with("[{}"));
    assert!(text.ends_with("\n]"));
    let parsed: Vec<Value> = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0], json!({}));
    assert_eq!(parsed[1]["method"], "Page.loadEventFired");
}

#[test]
fn test_event_log_without_events_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path_base = dir.path().join("run1").display().to_string();
    let mut log = EventLog::new(&path_base);
    log.close().unwrap();
    assert!(!dir.path().join("run1_devtools.json.gz").exists());
}

#[test]
fn test_write_json_gz_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json.gz");
    write_json_gz(&path, &json!({"entries": [1, 2, 3]})).unwrap();
    let parsed: Value = serde_json::from_str(&gunzip(&path)).unwrap();
    assert_eq!(parsed["entries"][1], 2);
}

#[test]
fn test_body_archive_member_names() {
    let dir = tempfile::tempdir().unwrap();
    let path_base = dir.path().join("run1").display().to_string();
    let mut archive = BodyArchive::create(&path_base).unwrap();
    let first = archive.add_text_body("1000.1", b"<html></html>").unwrap();
    let second = archive.add_text_body("1000.9", b"body{}").unwrap();
    archive.finish().unwrap();

    assert_eq!(first, "001-1000.1-body.txt");
    assert_eq!(second, "002-1000.9-body.txt");

    let file = File::open(dir.path().join("run1_bodies.zip")).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    assert_eq!(zip.len(), 2);
    let mut contents = String::new();
    zip.by_name("001-1000.1-body.txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "<html></html>");
}
