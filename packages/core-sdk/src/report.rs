use serde::Serialize;
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/**
 * \brief A startup-timing report (the `/actuator/startup` document).
 * \details Kept as raw JSON so the full document can be forwarded untouched.
 */
#[derive(Debug, Clone)]
pub struct StartupReport {
    raw: Value,
    /** \brief Original text when the report was loaded from text */
    source: Option<String>,
}

/**
 * \brief One timeline event, extracted leniently.
 */
#[derive(Debug, Clone, Serialize)]
pub struct StartupEvent {
    pub id: Option<i64>,
    pub name: String,
    pub parent_id: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_ms: f64,
}

/** \brief Aggregate figures shown on the summary cards. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub total_duration: f64,
    pub total_steps: usize,
    pub slow_steps: usize,
    pub critical_issues: usize,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fast,
    Normal,
    Slow,
    Critical,
}

impl StartupReport {
    pub fn new(raw: Value) -> Self {
        Self { raw, source: None }
    }

    /**
     * \brief Load from text; text that is not JSON yields an empty report.
     */
    pub fn parse(text: &str) -> Self {
        let raw = serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::Object(Default::default()));
        Self {
            raw,
            source: Some(text.to_string()),
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /** \brief Pretty-printed document (2-space indent). */
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_default()
    }

    /**
     * \brief Document text for the full-document prompt.
     * \details Text input is forwarded as given; structured input is minified.
     */
    pub fn to_document_text(&self) -> String {
        match &self.source {
            Some(text) => text.clone(),
            None => serde_json::to_string(&self.raw).unwrap_or_default(),
        }
    }

    pub fn events(&self) -> Vec<StartupEvent> {
        let Some(events) = self
            .raw
            .get("timeline")
            .and_then(|t| t.get("events"))
            .and_then(|e| e.as_array())
        else {
            return Vec::new();
        };
        events
            .iter()
            .map(|ev| {
                let step = ev.get("startupStep");
                let id = step.and_then(|s| s.get("id")).and_then(|v| v.as_i64());
                let name = step
                    .and_then(|s| s.get("name"))
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| match id {
                        Some(id) => format!("Step {}", id),
                        None => "Step N/A".to_string(),
                    });
                StartupEvent {
                    id,
                    name,
                    parent_id: step.and_then(|s| s.get("parentId")).and_then(|v| v.as_i64()),
                    start_time: ev.get("startTime").and_then(|v| v.as_str()).map(str::to_string),
                    end_time: ev.get("endTime").and_then(|v| v.as_str()).map(str::to_string),
                    duration_ms: parse_duration(ev.get("duration").unwrap_or(&Value::Null)),
                }
            })
            .collect()
    }
}

/**
 * \brief Duration in milliseconds from a number (ms) or an ISO-8601 `PT<seconds>S` string.
 */
pub fn parse_duration(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_iso_seconds(s).map(|secs| secs * 1000.0).unwrap_or(0.0),
        _ => 0.0,
    }
}

fn parse_iso_seconds(text: &str) -> Option<f64> {
    let lowered = text.to_ascii_lowercase();
    let mut rest = lowered.as_str();
    while let Some(pos) = rest.find("pt") {
        let tail = &rest[pos + 2..];
        let digits_len = tail
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(tail.len());
        if digits_len > 0 && tail[digits_len..].starts_with('s') {
            return leading_float(&tail[..digits_len]);
        }
        rest = &rest[pos + 2..];
    }
    None
}

/** \brief Longest numeric prefix, like `parseFloat` on "1.5.2" giving 1.5. */
fn leading_float(digits: &str) -> Option<f64> {
    let end = match digits.match_indices('.').nth(1) {
        Some((second_dot, _)) => second_dot,
        None => digits.len(),
    };
    digits[..end].parse::<f64>().ok()
}

/** \brief Milliseconds since the epoch for an RFC 3339 timestamp; 0 when unparsable. */
pub fn parse_timestamp_ms(text: Option<&str>) -> f64 {
    text.and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok())
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as f64)
        .unwrap_or(0.0)
}

/**
 * \brief `< 1000` ms renders as integer milliseconds, otherwise as seconds with two decimals.
 */
pub fn format_duration(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{:.0}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

pub fn severity(duration: f64, avg_duration: f64) -> Severity {
    if duration > avg_duration * 3.0 {
        Severity::Critical
    } else if duration > avg_duration * 2.0 {
        Severity::Slow
    } else if duration > 1000.0 {
        Severity::Normal
    } else {
        Severity::Fast
    }
}

/** \brief Wall-clock span from the first event's start to the last event's end, never negative. */
pub fn total_duration(events: &[StartupEvent]) -> f64 {
    let (Some(first), Some(last)) = (events.first(), events.last()) else {
        return 0.0;
    };
    let start = parse_timestamp_ms(first.start_time.as_deref());
    let end = parse_timestamp_ms(last.end_time.as_deref());
    (end - start).max(0.0)
}

pub fn calculate_metrics(events: &[StartupEvent]) -> Metrics {
    let total_steps = events.len();
    let total_ms: f64 = events.iter().map(|e| e.duration_ms).sum();
    let avg_duration = total_ms / total_steps.max(1) as f64;
    Metrics {
        total_duration: total_duration(events),
        total_steps,
        slow_steps: events
            .iter()
            .filter(|e| e.duration_ms > avg_duration * 2.0)
            .count(),
        critical_issues: events
            .iter()
            .filter(|e| e.duration_ms > avg_duration * 3.0)
            .count(),
        avg_duration,
    }
}

/**
 * \brief Events ranked by duration, longest first, keeping at least one entry.
 */
pub fn top_steps(events: &[StartupEvent], top_n: usize) -> Vec<StartupEvent> {
    let mut ranked = events.to_vec();
    ranked.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
    ranked.truncate(top_n.max(1));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report() -> StartupReport {
        StartupReport::new(json!({
            "springBootVersion": "3.2.0",
            "timeline": {
                "startTime": "2024-05-01T10:00:00.000Z",
                "events": [
                    {
                        "startupStep": {"id": 0, "name": "spring.boot.application.starting"},
                        "startTime": "2024-05-01T10:00:00.000Z",
                        "endTime": "2024-05-01T10:00:00.100Z",
                        "duration": "PT0.1S"
                    },
                    {
                        "startupStep": {"id": 1, "name": "spring.beans.instantiate", "parentId": 0},
                        "startTime": "2024-05-01T10:00:00.100Z",
                        "endTime": "2024-05-01T10:00:01.000Z",
                        "duration": 900
                    },
                    {
                        "startupStep": {"id": 2},
                        "startTime": "2024-05-01T10:00:01.000Z",
                        "endTime": "2024-05-01T10:00:02.500Z",
                        "duration": "PT1.5S"
                    }
                ]
            }
        }))
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration(&json!(250)), 250.0);
        assert_eq!(parse_duration(&json!("PT0.123S")), 123.0);
        assert_eq!(parse_duration(&json!("pt2s")), 2000.0);
        assert_eq!(parse_duration(&json!("PT1M")), 0.0);
        assert_eq!(parse_duration(&Value::Null), 0.0);
        assert_eq!(parse_duration(&json!(0)), 0.0);
    }

    #[test]
    fn test_format_duration_boundary() {
        assert_eq!(format_duration(999.0), "999ms");
        assert_eq!(format_duration(1000.0), "1.00s");
        assert_eq!(format_duration(1234.0), "1.23s");
        assert_eq!(format_duration(0.0), "0ms");
    }

    #[test]
    fn test_events_are_extracted_leniently() {
        let events = report().events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].parent_id, Some(0));
        assert_eq!(events[2].name, "Step 2");
        assert_eq!(events[2].duration_ms, 1500.0);
    }

    #[test]
    fn test_metrics_total_duration_spans_first_to_last() {
        let metrics = calculate_metrics(&report().events());
        assert_eq!(metrics.total_steps, 3);
        assert_eq!(metrics.total_duration, 2500.0);
        assert!((metrics.avg_duration - 833.333).abs() < 0.01);
        assert_eq!(metrics.slow_steps, 0);
        assert_eq!(metrics.critical_issues, 0);
    }

    #[test]
    fn test_total_duration_is_clamped_at_zero() {
        let events = vec![StartupEvent {
            id: Some(0),
            name: "backwards".into(),
            parent_id: None,
            start_time: Some("2024-05-01T10:00:05Z".into()),
            end_time: Some("2024-05-01T10:00:01Z".into()),
            duration_ms: 0.0,
        }];
        assert_eq!(total_duration(&events), 0.0);
    }

    #[test]
    fn test_empty_report_has_zero_metrics() {
        let metrics = calculate_metrics(&StartupReport::parse("not json").events());
        assert_eq!(metrics, Metrics::default());
    }

    #[test]
    fn test_severity_and_ranking() {
        assert_eq!(severity(400.0, 100.0), Severity::Critical);
        assert_eq!(severity(250.0, 100.0), Severity::Slow);
        assert_eq!(severity(1500.0, 1000.0), Severity::Normal);
        assert_eq!(severity(10.0, 100.0), Severity::Fast);

        let top = top_steps(&report().events(), 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].name, "Step 2");
        assert_eq!(top[1].name, "spring.beans.instantiate");
        assert_eq!(top_steps(&report().events(), 0).len(), 1);
    }
}
