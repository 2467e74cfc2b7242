//! Offline verification of a signed audit log.

use std::fs;
use std::path::Path;

use crate::entry::{AuditEntry, HmacKey};
use crate::error::AuditError;

/// How many failing lines a report carries detail for.
pub const MAX_REPORTED_FAILURES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFailure {
    /// 1-based line number in the file.
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Default, Clone)]
pub struct VerifyReport {
    pub scanned: usize,
    pub verified: usize,
    pub invalid_signatures: usize,
    pub parse_errors: usize,
    /// The first [`MAX_REPORTED_FAILURES`] failing lines.
    pub failures: Vec<LineFailure>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.invalid_signatures == 0 && self.parse_errors == 0
    }

    fn record_failure(&mut self, line: usize, reason: String) {
        if self.failures.len() < MAX_REPORTED_FAILURES {
            self.failures.push(LineFailure { line, reason });
        }
    }
}

/// Verify every line of a log file against `key`.
pub fn verify_file(path: impl AsRef<Path>, key: &HmacKey) -> Result<VerifyReport, AuditError> {
    let contents = fs::read_to_string(path)?;
    Ok(verify_lines(contents.lines(), key))
}

/// Verify an iterator of log lines. Blank lines are skipped.
pub fn verify_lines<'a>(lines: impl Iterator<Item = &'a str>, key: &HmacKey) -> VerifyReport {
    let mut report = VerifyReport::default();

    for (index, line) in lines.enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        report.scanned += 1;

        match check_line(line, key) {
            Ok(()) => report.verified += 1,
            Err(LineError::Parse(reason)) => {
                report.parse_errors += 1;
                report.record_failure(line_no, reason);
            }
            Err(LineError::Signature(reason)) => {
                report.invalid_signatures += 1;
                report.record_failure(line_no, reason);
            }
        }
    }

    report
}

enum LineError {
    Parse(String),
    Signature(String),
}

fn check_line(line: &str, key: &HmacKey) -> Result<(), LineError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| LineError::Parse(format!("invalid JSON: {e}")))?;

    let claimed = value
        .get("signature")
        .and_then(|s| s.as_str())
        .ok_or_else(|| LineError::Parse("missing signature field".to_string()))?
        .to_string();

    // Reconstruct the canonical form through the entry schema; the struct's
    // field order is the wire order the signer used.
    let entry: AuditEntry = serde_json::from_value(value)
        .map_err(|e| LineError::Parse(format!("not an audit entry: {e}")))?;
    let canonical = entry
        .canonical_json()
        .map_err(|e| LineError::Parse(e.to_string()))?;

    let expected = key.sign(canonical.as_bytes());
    if claimed != expected {
        return Err(LineError::Signature("HMAC signature mismatch".to_string()));
    }
    Ok(())
}
