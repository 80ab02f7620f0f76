use crate::report::{calculate_metrics, top_steps, StartupReport};

pub const DEFAULT_MAX_BYTES: usize = 100 * 1024;
pub const DEFAULT_TOP_N: usize = 10;
const TRUNCATION_MARKER: &str = "\n... [truncated]";

const COMPACT_SYSTEM: &str = "You are an expert performance analyst for Spring Boot startup. Provide a concise analysis with a brief summary, the top bottlenecks, and actionable optimization steps.";
const FULL_SYSTEM: &str = "You are an expert performance analyst for Spring Boot startup. Analyze startup timeline JSON and provide: 1) a brief summary, 2) the top bottlenecks (slow/critical), and 3) actionable optimization suggestions. Keep it concise.";
const PLAIN_TEXT_TAIL: &str = "\n\nReturn only plain text, no markdown tables.";

/**
 * \brief System/user text pair sent to the model.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptOptions {
    /** \brief Byte budget for the embedded JSON payload */
    pub max_bytes: usize,
    pub top_n: usize,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/**
 * \brief Longest prefix of `text` whose UTF-8 size fits in `max_bytes`.
 * \details Binary search over character boundaries, so multi-byte characters are never split.
 */
pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    // boundaries[i] is the byte length of the first i characters
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let (mut low, mut high) = (0usize, boundaries.len() - 1);
    let mut best = 0usize;
    while low <= high {
        let mid = (low + high) / 2;
        if boundaries[mid] <= max_bytes {
            best = mid;
            low = mid + 1;
        } else if mid == 0 {
            break;
        } else {
            high = mid - 1;
        }
    }
    &text[..boundaries[best]]
}

/**
 * \brief Byte-budgeted copy of `text`, marked when something was cut.
 */
pub fn truncate_bytes(text: &str, max_bytes: usize) -> String {
    if text.is_empty() || max_bytes == 0 {
        return String::new();
    }
    if text.len() <= max_bytes {
        return text.to_string();
    }
    format!("{}{}", truncate_to_bytes(text, max_bytes), TRUNCATION_MARKER)
}

/**
 * \brief Compact prompt: summary block, ranked slowest steps, byte-bounded JSON.
 */
pub fn build(report: &StartupReport, options: PromptOptions) -> Prompt {
    let events = report.events();
    let metrics = calculate_metrics(&events);
    let top = top_steps(&events, options.top_n);

    let summary = [
        format!("Total steps: {}", metrics.total_steps),
        format!("Total duration: {} ms", metrics.total_duration),
        format!("Average step duration: {:.2} ms", metrics.avg_duration),
        format!("Slow steps (>2x avg): {}", metrics.slow_steps),
        format!("Critical steps (>3x avg): {}", metrics.critical_issues),
    ]
    .join("\n");

    let top_lines = top
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {} — {:.0}ms", i + 1, step.name, step.duration_ms))
        .collect::<Vec<_>>()
        .join("\n");

    let compact = format!(
        "Summary:\n{}\n\nTop {} slowest/critical steps:\n{}",
        summary,
        top.len(),
        top_lines
    );
    let json = truncate_bytes(&report.to_pretty_json(), options.max_bytes);

    Prompt {
        system: COMPACT_SYSTEM.to_string(),
        user: format!(
            "{}\n\nTruncated JSON (optional, may omit some details):\n{}{}",
            compact, json, PLAIN_TEXT_TAIL
        ),
    }
}

/**
 * \brief Full-document prompt: the whole report, minified, no truncation.
 */
pub fn build_full(report: &StartupReport) -> Prompt {
    Prompt {
        system: FULL_SYSTEM.to_string(),
        user: format!(
            "Here is the /actuator/startup JSON to analyze:\n\n{}{}",
            report.to_document_text(),
            PLAIN_TEXT_TAIL
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_keeps_longest_fitting_prefix() {
        let text = "héllo wörld ✓ done";
        for budget in 0..=text.len() + 2 {
            let prefix = truncate_to_bytes(text, budget);
            assert!(prefix.len() <= budget);
            assert!(text.starts_with(prefix));
            // no longer prefix on a char boundary fits
            let next = text[prefix.len()..].chars().next();
            if let Some(c) = next {
                assert!(prefix.len() + c.len_utf8() > budget);
            }
        }
    }

    #[test]
    fn test_truncate_never_splits_multibyte_chars() {
        let text = "✓✓✓"; // 3 bytes each
        assert_eq!(truncate_to_bytes(text, 5), "✓");
        assert_eq!(truncate_to_bytes(text, 6), "✓✓");
        assert_eq!(truncate_to_bytes(text, 2), "");
    }

    #[test]
    fn test_truncate_bytes_marks_cut_text() {
        assert_eq!(truncate_bytes("short", 100), "short");
        assert_eq!(truncate_bytes("abcdef", 3), "abc\n... [truncated]");
        assert_eq!(truncate_bytes("abc", 0), "");
    }

    #[test]
    fn test_compact_prompt_contains_summary_and_ranking() {
        let report = StartupReport::new(json!({
            "timeline": {"events": [
                {"startupStep": {"id": 1, "name": "fast.step"}, "startTime": "2024-01-01T00:00:00Z", "endTime": "2024-01-01T00:00:00.010Z", "duration": 10},
                {"startupStep": {"id": 2, "name": "slow.step"}, "startTime": "2024-01-01T00:00:00.010Z", "endTime": "2024-01-01T00:00:01Z", "duration": "PT0.99S"}
            ]}
        }));
        let prompt = build(&report, PromptOptions { max_bytes: 64, top_n: 10 });
        assert!(prompt.system.contains("expert performance analyst"));
        assert!(prompt.user.contains("Total steps: 2"));
        assert!(prompt.user.contains("Total duration: 1000 ms"));
        assert!(prompt.user.contains("Top 2 slowest/critical steps:"));
        assert!(prompt.user.contains("1. slow.step — 990ms"));
        assert!(prompt.user.contains("2. fast.step — 10ms"));
        assert!(prompt.user.contains("[truncated]"));
    }

    #[test]
    fn test_empty_report_prompt_has_zero_summary() {
        let prompt = build(&StartupReport::parse("{}"), PromptOptions::default());
        assert!(prompt.user.contains("Total steps: 0"));
        assert!(prompt.user.contains("Average step duration: 0.00 ms"));
        assert!(prompt.user.contains("Top 0 slowest/critical steps:"));
    }

    #[test]
    fn test_full_prompt_embeds_whole_document() {
        let report = StartupReport::new(json!({"timeline": {"events": []}, "pad": "x".repeat(500)}));
        let prompt = build_full(&report);
        assert!(prompt.user.contains(&"x".repeat(500)));
        assert!(!prompt.user.contains("[truncated]"));
        assert_ne!(prompt.system, COMPACT_SYSTEM);
    }
}
