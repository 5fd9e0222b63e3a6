//! Scanning and redaction of JSON documents.
//!
//! Only decoded string values are inspected, so escape sequences in the
//! source text (`\n`, `\"`, `\u00e9`) never end up inside a match and a
//! rewritten document is always re-encoded as valid JSON. Object keys,
//! numbers and booleans are left alone.

use serde_json::Value;

use super::detector::PiiDetector;
use super::redact::redact;
use super::PiiMatch;

/// All findings across the string values of `value`, in document order.
///
/// Offsets are relative to the string value each match was found in.
pub fn scan_value(detector: &PiiDetector, value: &Value) -> Vec<PiiMatch> {
    let mut found = Vec::new();
    collect(detector, value, &mut found);
    found
}

fn collect(detector: &PiiDetector, value: &Value, found: &mut Vec<PiiMatch>) {
    match value {
        Value::String(s) => found.extend(detector.scan(s)),
        Value::Array(items) => {
            for item in items {
                collect(detector, item, found);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect(detector, item, found);
            }
        }
        _ => {}
    }
}

/// Mask every finding in the string values of `value`, in place.
///
/// Returns the number of string values that were rewritten.
pub fn redact_value(detector: &PiiDetector, value: &mut Value) -> usize {
    match value {
        Value::String(s) => {
            let matches = detector.scan(s);
            if matches.is_empty() {
                return 0;
            }
            *s = redact(s, &matches);
            1
        }
        Value::Array(items) => items.iter_mut().map(|v| redact_value(detector, v)).sum(),
        Value::Object(map) => map.values_mut().map(|v| redact_value(detector, v)).sum(),
        _ => 0,
    }
}
