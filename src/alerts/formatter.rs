//! Alert and report rendering
//!
//! All text produced here is Telegram-flavoured HTML: every dynamic value is
//! escaped and markup is limited to `<b>` inside single lines.

use crate::aggregator::Operator;
use crate::events::Timestamp;
use crate::monitor::{CheckEntry, CheckReport};
use crate::triggers::{AlertVerdict, HealthStatus};
use chrono::Local;

/// Regions listed per failure kind in an alert
pub const ALERT_TOP_REGIONS: usize = 5;

/// Reports with at most this many sites list every site
pub const DETAILED_REPORT_SITES: usize = 6;

/// Escape text for inclusion in an HTML message
///
/// # Examples
///
/// ```
/// use teleping::alerts::escape_html;
///
/// assert_eq!(escape_html("<a href='x'>&</a>"), "&lt;a href=&#x27;x&#x27;&gt;&amp;&lt;/a&gt;");
/// ```
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn local_time(timestamp: &Timestamp) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn region_list(regions: &[(&str, usize)]) -> String {
    regions
        .iter()
        .map(|(region, count)| format!("{}({})", escape_html(region), count))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render one triggered verdict as an alert message
pub fn format_alert(verdict: &AlertVerdict) -> String {
    let report = &verdict.report;

    let details: Vec<String> = report
        .failure_types
        .keys()
        .map(|kind| {
            format!(
                "{}: {}",
                escape_html(&kind.to_string()),
                region_list(&report.top_regions_for(*kind, ALERT_TOP_REGIONS))
            )
        })
        .collect();

    let operators = Operator::ALL
        .iter()
        .map(|op| format!("{} {}", op, report.operator_count(*op)))
        .collect::<Vec<_>>()
        .join(" ");

    let mut lines = vec![
        "<b>⚠️ Site failure alert</b>".to_string(),
        format!(
            "Site: {} ({})",
            escape_html(&verdict.site.name),
            escape_html(&verdict.site.url)
        ),
        format!("Fail rate: {:.2}%", verdict.fail_rate() * 100.0),
    ];
    if let Some(reason) = &verdict.trigger_reason {
        lines.push(format!("Trigger: {}", escape_html(reason)));
    }
    lines.push(String::new());
    lines.push("<b>Failure details</b>".to_string());
    lines.extend(details);
    lines.push(String::new());
    lines.push(format!("Affected operators: {}", operators));
    lines.push(format!("Checked at: {}", local_time(&verdict.timestamp)));

    lines.join("\n")
}

/// Join the alerts of one pass into a single message
pub fn join_alerts(verdicts: &[AlertVerdict]) -> String {
    verdicts
        .iter()
        .map(format_alert)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Shorten `text` to at most `max_chars` characters, cutting at a line
/// boundary so no markup is split. A first line longer than the budget is
/// cut at a character boundary instead.
pub fn truncate_message(text: &str, max_chars: usize) -> String {
    const MARKER: &str = "\n...";

    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let budget = max_chars.saturating_sub(MARKER.chars().count());
    let head: String = text.chars().take(budget).collect();
    let cut = head.rfind('\n').unwrap_or(head.len());
    format!("{}{}", &head[..cut], MARKER)
}

fn format_entry(entry: &CheckEntry) -> String {
    let rate = match entry.fail_rate {
        Some(rate) => format!("{:.1}%", rate * 100.0),
        None => "n/a".to_string(),
    };
    let regions = if entry.top_regions.is_empty() {
        String::new()
    } else {
        let pairs: Vec<(&str, usize)> = entry
            .top_regions
            .iter()
            .map(|(region, count)| (region.as_str(), *count))
            .collect();
        format!(" | {}", region_list(&pairs))
    };

    format!(
        "{} <b>{}</b> ({})\n   Fail rate: {} ({}){}",
        entry.status.marker(),
        escape_html(&entry.site.name),
        escape_html(&entry.site.url),
        rate,
        entry.status,
        regions
    )
}

/// Render the graded report of a check pass
///
/// Small reports list every site; larger ones show counts and only the
/// sites that need attention.
pub fn format_check_report(report: &CheckReport) -> String {
    let mut lines = vec![
        "🔍 <b>Check report</b>".to_string(),
        format!("⏰ {}", local_time(&report.started)),
        String::new(),
    ];

    if report.timed_out {
        lines.push(format!(
            "⏱️ Deadline reached, {} of {} sites checked",
            report.entries.len(),
            report.total_sites
        ));
        lines.push(String::new());
    }

    if report.entries.len() <= DETAILED_REPORT_SITES {
        lines.extend(report.entries.iter().map(format_entry));
    } else {
        lines.push("<b>Overview</b>".to_string());
        lines.push(format!(
            "{} Normal: {} | {} Warning: {} | {} Abnormal: {} | {} No data: {}",
            HealthStatus::Normal.marker(),
            report.count(HealthStatus::Normal),
            HealthStatus::Warning.marker(),
            report.count(HealthStatus::Warning),
            HealthStatus::Abnormal.marker(),
            report.count(HealthStatus::Abnormal),
            HealthStatus::ApiFailure.marker(),
            report.count(HealthStatus::NoData) + report.count(HealthStatus::ApiFailure),
        ));
        lines.push(String::new());

        let attention: Vec<String> = report
            .entries
            .iter()
            .filter(|entry| entry.status.is_problem())
            .map(format_entry)
            .collect();
        if attention.is_empty() {
            lines.push("✅ All sites are healthy".to_string());
        } else {
            lines.push("<b>Sites needing attention</b>".to_string());
            lines.extend(attention);
        }
    }

    lines.push(String::new());
    lines.push(format!("📊 Total: {} sites", report.entries.len()));
    lines.join("\n")
}

/// Render the result of probing a single URL
pub fn format_single_check(entry: &CheckEntry, checked_at: &Timestamp) -> String {
    let mut lines = vec![
        "🔍 <b>Single site check</b>".to_string(),
        format!("⏰ {}", local_time(checked_at)),
        String::new(),
        format!("🌐 URL: {}", escape_html(&entry.site.url)),
        match entry.fail_rate {
            Some(rate) => format!("📊 Fail rate: {:.2}%", rate * 100.0),
            None => "📊 Fail rate: n/a".to_string(),
        },
        format!("🏷️ Status: {} {}", entry.status.marker(), entry.status),
        String::new(),
    ];

    if entry.top_regions.is_empty() {
        lines.push("✅ No failing regions".to_string());
    } else {
        lines.push("<b>Affected regions</b>".to_string());
        lines.extend(
            entry
                .top_regions
                .iter()
                .map(|(region, count)| format!("• {}: {} nodes", escape_html(region), count)),
        );
    }

    lines.join("\n")
}
