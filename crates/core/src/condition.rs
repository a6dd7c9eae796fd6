//! Status conditions reported on a Fleet `GitRepo` (wrangler generic conditions).

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// RFC-3339 string; not guaranteed to parse.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update_time: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_transition_time: String,
}

impl Condition {
    pub fn updated_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.last_update_time).ok()
    }
}

/// Most recently updated condition, or `None` when nothing has a parseable
/// `lastUpdateTime`. Input order does not matter except on an exact tie,
/// where the first entry seen is kept.
pub fn latest_condition(conditions: &[Condition]) -> Option<&Condition> {
    let mut latest: Option<(&Condition, DateTime<FixedOffset>)> = None;
    for cond in conditions {
        let Some(ts) = cond.updated_at() else { continue };
        match latest {
            Some((_, best)) if ts <= best => {}
            _ => latest = Some((cond, ts)),
        }
    }
    latest.map(|(cond, _)| cond)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(kind: &str, message: &str, ts: &str) -> Condition {
        Condition {
            kind: kind.to_string(),
            status: "True".to_string(),
            message: message.to_string(),
            last_update_time: ts.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_input_has_no_latest() {
        assert!(latest_condition(&[]).is_none());
    }

    #[test]
    fn picks_maximum_timestamp() {
        let conds = vec![
            cond("Ready", "", "2024-05-01T10:00:00Z"),
            cond("Stalled", "stuck", "2024-05-01T12:00:00Z"),
            cond("Accepted", "", "2024-05-01T11:00:00Z"),
        ];
        assert_eq!(latest_condition(&conds).unwrap().kind, "Stalled");
    }

    #[test]
    fn result_is_independent_of_order() {
        let mut conds = vec![
            cond("A", "", "2024-05-01T10:00:00Z"),
            cond("B", "", "2024-05-01T10:00:05Z"),
            cond("C", "", "2024-05-01T09:59:59Z"),
        ];
        let first = latest_condition(&conds).unwrap().kind.clone();
        conds.reverse();
        assert_eq!(latest_condition(&conds).unwrap().kind, first);
        conds.swap(0, 1);
        assert_eq!(latest_condition(&conds).unwrap().kind, first);
        assert_eq!(first, "B");
    }

    #[test]
    fn malformed_timestamps_are_skipped() {
        let conds = vec![
            cond("Garbage", "x", "yesterday"),
            cond("Ready", "", "2024-05-01T10:00:00Z"),
            cond("Empty", "y", ""),
        ];
        assert_eq!(latest_condition(&conds).unwrap().kind, "Ready");
    }

    #[test]
    fn all_malformed_has_no_latest() {
        let conds = vec![cond("A", "", "not-a-time"), cond("B", "", "")];
        assert!(latest_condition(&conds).is_none());
    }

    #[test]
    fn exact_tie_keeps_first_seen() {
        let conds = vec![
            cond("First", "", "2024-05-01T10:00:00Z"),
            cond("Second", "", "2024-05-01T10:00:00Z"),
        ];
        assert_eq!(latest_condition(&conds).unwrap().kind, "First");
    }

    #[test]
    fn offsets_compare_as_instants() {
        // 12:30+02:00 is 10:30Z, which is later than 10:15Z.
        let conds = vec![
            cond("Utc", "", "2024-05-01T10:15:00Z"),
            cond("Offset", "", "2024-05-01T12:30:00+02:00"),
        ];
        assert_eq!(latest_condition(&conds).unwrap().kind, "Offset");
    }

    #[test]
    fn decodes_wrangler_condition_json() {
        let c: Condition = serde_json::from_value(serde_json::json!({
            "type": "Ready",
            "status": "False",
            "message": "NotReady(1) [Bundle demo-web]",
            "lastUpdateTime": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(c.kind, "Ready");
        assert_eq!(c.message, "NotReady(1) [Bundle demo-web]");
        assert!(c.updated_at().is_some());
    }
}
