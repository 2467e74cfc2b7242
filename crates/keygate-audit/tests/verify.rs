//! Sign/verify round trips and tamper detection.

use jiff::Timestamp;
use keygate_audit::{
    AuditEntry, AuditSink, HmacKey, MemoryAuditLog, verify_file, verify_lines,
};

fn key() -> HmacKey {
    HmacKey::new(vec![0x42; 32]).unwrap()
}

fn other_key() -> HmacKey {
    HmacKey::new(vec![0x43; 32]).unwrap()
}

fn t0() -> Timestamp {
    "2026-03-02T10:00:00Z".parse().unwrap()
}

fn sample_entry(n: usize) -> AuditEntry {
    AuditEntry::new("credentials.allow", "alice", t0())
        .with_request_id(format!("{n:016x}"))
        .with_profile("dev")
        .with_status("allowed")
        .with_role_arn("arn:aws:iam::123456789012:role/dev")
        .with_duration_secs(3600)
}

#[test]
fn keys_below_minimum_length_are_refused() {
    let err = HmacKey::new(vec![0x42; 31]).unwrap_err();
    assert!(err.to_string().contains("too short"));
    assert!(HmacKey::new(vec![0x42; 32]).is_ok());
}

#[test]
fn signed_line_ends_with_the_signature_field() {
    let line = sample_entry(1).signed_line(&key()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();

    assert!(value.get("signature").is_some());
    // Trailing field: the raw text ends with the signature.
    let sig = value["signature"].as_str().unwrap();
    assert!(line.ends_with(&format!("\"signature\":\"{sig}\"}}")));
    assert_eq!(sig.len(), 64);
    assert!(sig.bytes().all(|b| b.is_ascii_hexdigit()));
}

#[test]
fn a_clean_log_verifies_completely() {
    let log = MemoryAuditLog::new(key());
    for n in 0..100 {
        log.append(&sample_entry(n)).unwrap();
    }

    let lines = log.lines();
    let report = verify_lines(lines.iter().map(String::as_str), &key());

    assert_eq!(report.scanned, 100);
    assert_eq!(report.verified, 100);
    assert_eq!(report.invalid_signatures, 0);
    assert_eq!(report.parse_errors, 0);
    assert!(report.is_clean());
}

#[test]
fn flipping_one_byte_in_one_line_is_detected_with_its_line_number() {
    let log = MemoryAuditLog::new(key());
    for n in 0..100 {
        log.append(&sample_entry(n)).unwrap();
    }

    let mut lines = log.lines();
    // Flip a character inside line 42's profile value ("dev" -> "dew").
    lines[41] = lines[41].replacen("\"profile\":\"dev\"", "\"profile\":\"dew\"", 1);
    assert!(lines[41].contains("dew"), "tamper target not found");

    let report = verify_lines(lines.iter().map(String::as_str), &key());

    assert_eq!(report.scanned, 100);
    assert_eq!(report.verified, 99);
    assert_eq!(report.invalid_signatures, 1);
    assert_eq!(report.parse_errors, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].line, 42);
}

#[test]
fn tampering_the_signature_itself_is_detected() {
    let log = MemoryAuditLog::new(key());
    log.append(&sample_entry(7)).unwrap();

    let mut lines = log.lines();
    let flipped = if lines[0].ends_with("0\"}") { "1\"}" } else { "0\"}" };
    let len = lines[0].len();
    lines[0].replace_range(len - 3.., flipped);

    let report = verify_lines(lines.iter().map(String::as_str), &key());
    assert_eq!(report.invalid_signatures, 1);
}

#[test]
fn the_wrong_key_verifies_nothing() {
    let log = MemoryAuditLog::new(key());
    for n in 0..5 {
        log.append(&sample_entry(n)).unwrap();
    }

    let lines = log.lines();
    let report = verify_lines(lines.iter().map(String::as_str), &other_key());

    assert_eq!(report.verified, 0);
    assert_eq!(report.invalid_signatures, 5);
}

#[test]
fn garbage_lines_count_as_parse_errors() {
    let log = MemoryAuditLog::new(key());
    log.append(&sample_entry(1)).unwrap();

    let mut lines = log.lines();
    lines.push("not json at all".to_string());
    lines.push("{\"event\":\"x\"}".to_string()); // JSON but unsigned

    let report = verify_lines(lines.iter().map(String::as_str), &key());
    assert_eq!(report.scanned, 3);
    assert_eq!(report.verified, 1);
    assert_eq!(report.parse_errors, 2);
    assert!(!report.is_clean());
}

#[test]
fn blank_lines_are_skipped() {
    let log = MemoryAuditLog::new(key());
    log.append(&sample_entry(1)).unwrap();

    let mut lines = log.lines();
    lines.insert(0, String::new());

    let report = verify_lines(lines.iter().map(String::as_str), &key());
    assert_eq!(report.scanned, 1);
    assert_eq!(report.verified, 1);
}

#[test]
fn file_round_trip_through_the_file_logger() {
    use keygate_audit::FileAuditLogger;

    let dir = std::env::temp_dir().join(format!("keygate-audit-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("audit.log");
    let _ = std::fs::remove_file(&path);

    let logger = FileAuditLogger::new(&path, key());
    for n in 0..10 {
        logger.append(&sample_entry(n)).unwrap();
    }

    let report = verify_file(&path, &key()).unwrap();
    assert_eq!(report.scanned, 10);
    assert_eq!(report.verified, 10);
    assert!(report.is_clean());

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn entries_with_optional_fields_round_trip() {
    let entry = AuditEntry::new("credentials.allow", "alice", t0())
        .with_request_id("aaaabbbbccccdddd")
        .with_profile("production")
        .with_status("allowed")
        .with_source_identity("alice")
        .with_approved_request_id("abc123def4567890")
        .with_details(serde_json::json!({"region": "us-east-1", "attempt": 1}));

    let line = entry.signed_line(&key()).unwrap();
    let report = verify_lines(std::iter::once(line.as_str()), &key());
    assert_eq!(report.verified, 1);
}
