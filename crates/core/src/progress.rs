//! Progress extraction from pipeline output.
//!
//! The pipeline prints either `Progress: N%` or `Task i/N` lines. Output
//! without a marker carries no progress information.

use std::sync::LazyLock;

use regex::Regex;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)progress:\s*(\d{1,3})\s*%").expect("valid regex"));

static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)task\s+(\d+)\s*/\s*(\d+)").expect("valid regex"));

/// Progress from a single line, if it carries a marker.
///
/// A percentage marker takes precedence over a task counter on the same
/// line. `Task i/N` yields `round(100 * i / N)`; `N == 0` is ignored.
pub fn parse_line(line: &str) -> Option<u8> {
    if let Some(caps) = PERCENT_RE.captures(line) {
        let pct: u32 = caps[1].parse().ok()?;
        return Some(pct.min(100) as u8);
    }

    let caps = TASK_RE.captures(line)?;
    let done: f64 = caps[1].parse().ok()?;
    let total: f64 = caps[2].parse().ok()?;
    if total == 0.0 {
        return None;
    }
    Some((100.0 * done / total).round().clamp(0.0, 100.0) as u8)
}

/// Progress from a chunk of output: the most recent marker wins.
pub fn parse_progress(text: &str) -> Option<u8> {
    text.lines().rev().find_map(parse_line)
}
