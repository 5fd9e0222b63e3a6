//! Span-preserving redaction.
//!
//! Every byte outside a match span is kept as-is. Each span is replaced by a
//! `[REDACTED:<types>]` placeholder; overlapping spans collapse into one
//! placeholder over their union. Replacements are applied right-to-left so
//! earlier offsets stay valid while the string is rewritten.

use super::PiiMatch;

/// A merged group of overlapping spans.
#[derive(Debug, PartialEq, Eq)]
struct Group {
    start: usize,
    end: usize,
    names: Vec<String>,
}

impl Group {
    fn placeholder(&self) -> String {
        format!("[REDACTED:{}]", self.names.join(","))
    }
}

/// Merge overlapping spans (adjacent spans stay separate).
fn merge_spans(text: &str, matches: &[PiiMatch]) -> Vec<Group> {
    let mut spans: Vec<&PiiMatch> = matches
        .iter()
        .filter(|m| m.start < m.end && text.get(m.start..m.end).is_some())
        .collect();
    spans.sort_by_key(|m| (m.start, m.end));

    let mut groups: Vec<Group> = Vec::new();
    for m in spans {
        match groups.last_mut() {
            Some(group) if m.start < group.end => {
                group.end = group.end.max(m.end);
                if !group.names.contains(&m.pattern_name) {
                    group.names.push(m.pattern_name.clone());
                }
            }
            _ => groups.push(Group {
                start: m.start,
                end: m.end,
                names: vec![m.pattern_name.clone()],
            }),
        }
    }
    groups
}

/// Rewrite `text` with every match span masked.
pub fn redact(text: &str, matches: &[PiiMatch]) -> String {
    let mut result = text.to_string();
    for group in merge_spans(text, matches).iter().rev() {
        result.replace_range(group.start..group.end, &group.placeholder());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pii::detector::PiiDetector;
    use crate::pii::Severity;

    fn span(name: &str, text: &str, start: usize, end: usize) -> PiiMatch {
        PiiMatch {
            pattern_name: name.to_string(),
            matched_text: text[start..end].to_string(),
            start,
            end,
            severity: Severity::Medium,
        }
    }

    #[test]
    fn replaces_each_span_with_tagged_placeholder() {
        let text = "Email me at alice@example.com or call +1-555-123-4567";
        let matches = PiiDetector::with_defaults().scan(text);
        assert_eq!(
            redact(text, &matches),
            "Email me at [REDACTED:email] or call [REDACTED:phone]"
        );
    }

    #[test]
    fn no_matches_returns_input() {
        assert_eq!(redact("nothing here", &[]), "nothing here");
    }

    #[test]
    fn overlapping_spans_collapse_into_union() {
        let text = "id alice@example.com end";
        let matches = vec![span("email", text, 3, 20), span("corp_domain", text, 9, 20)];
        assert_eq!(redact(text, &matches), "id [REDACTED:email,corp_domain] end");
    }

    #[test]
    fn chained_overlaps_extend_the_group() {
        let text = "0123456789";
        let matches = vec![
            span("a", text, 1, 4),
            span("b", text, 3, 6),
            span("c", text, 5, 8),
        ];
        assert_eq!(redact(text, &matches), "0[REDACTED:a,b,c]89");
    }

    #[test]
    fn adjacent_spans_stay_separate() {
        let text = "aaabbb";
        let matches = vec![span("x", text, 0, 3), span("y", text, 3, 6)];
        assert_eq!(redact(text, &matches), "[REDACTED:x][REDACTED:y]");
    }

    #[test]
    fn unsorted_input_is_handled() {
        let text = "one two three";
        let matches = vec![span("w", text, 8, 13), span("w", text, 0, 3)];
        assert_eq!(redact(text, &matches), "[REDACTED:w] two [REDACTED:w]");
    }

    #[test]
    fn multibyte_text_outside_spans_is_preserved() {
        let text = "olá café — ssn 123-45-6789 ✓ fim";
        let matches = PiiDetector::with_defaults().scan(text);
        let out = redact(text, &matches);
        assert_eq!(out, "olá café — ssn [REDACTED:ssn] ✓ fim");
    }

    #[test]
    fn out_of_range_spans_are_ignored() {
        let text = "short";
        let bogus = PiiMatch {
            pattern_name: "x".to_string(),
            matched_text: String::new(),
            start: 3,
            end: 99,
            severity: Severity::Low,
        };
        assert_eq!(redact(text, &[bogus]), "short");
    }

    #[test]
    fn redaction_is_idempotent() {
        let detector = PiiDetector::with_defaults();
        let text = "card 4111 1111 1111 1111, mail bob@corp.io, wallet \
                    0x52908400098527886E0F7030069857D2E4169EE7, cpf 529.982.247-25";
        let once = redact(text, &detector.scan(text));
        assert!(detector.scan(&once).is_empty());
        assert_eq!(redact(&once, &detector.scan(&once)), once);
    }

    #[test]
    fn bytes_outside_spans_are_identical() {
        let text = "pre alice@example.com mid 123-45-6789 post";
        let matches = PiiDetector::with_defaults().scan(text);
        let out = redact(text, &matches);
        assert!(out.starts_with("pre "));
        assert!(out.contains(" mid "));
        assert!(out.ends_with(" post"));
    }
}
