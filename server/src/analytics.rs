//! Aggregation helpers for the analytics endpoints: canonical department
//! naming and the zero-filled seven-day activity histogram.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

#[derive(Serialize, Debug, Clone)]
pub struct DepartmentCount {
    pub department: String,
    pub count: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct DailyCount {
    pub date: String,
    pub count: u64,
}

/// Maps a raw stored department value to its canonical display name.
/// Unmapped values are Title-Cased; empty/missing values bucket as "Unknown".
pub fn canonical_department(raw: Option<&str>) -> String {
    let raw = match raw {
        Some(r) => r.trim(),
        None => return "Unknown".to_string(),
    };
    if raw.is_empty() {
        return "Unknown".to_string();
    }
    let key = raw.replace('_', " ").replace("  ", " ").to_lowercase();
    match key.as_str() {
        "computer science" | "cs" => "Computer Science".to_string(),
        "software engineering" | "se" => "Software Engineering".to_string(),
        "artificial intelligence" | "ai" | "ai/ml" => "Artificial Intelligence".to_string(),
        _ => title_case(raw),
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Merges raw grouped counts under their canonical names, largest bucket
/// first (name as tiebreaker).
pub fn merge_department_counts(raw: &HashMap<Option<String>, u64>) -> Vec<DepartmentCount> {
    let mut merged: HashMap<String, u64> = HashMap::new();
    for (dept, count) in raw {
        *merged.entry(canonical_department(dept.as_deref())).or_insert(0) += count;
    }
    let mut out: Vec<DepartmentCount> = merged
        .into_iter()
        .map(|(department, count)| DepartmentCount { department, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.department.cmp(&b.department)));
    out
}

/// Six days ago through today, oldest first. Always seven entries.
pub fn last_seven_days(today: NaiveDate) -> Vec<NaiveDate> {
    (0..7).rev().map(|i| today - Duration::days(i)).collect()
}

/// Weekday labels plus per-day counts, zero-filled for days with no activity.
pub fn activity_histogram(
    days: &[NaiveDate],
    counts: &HashMap<String, u64>,
) -> (Vec<String>, Vec<DailyCount>) {
    let labels: Vec<String> = days.iter().map(|d| d.format("%a").to_string()).collect();
    let data = days
        .iter()
        .map(|d| DailyCount {
            date: d.format("%a").to_string(),
            count: *counts.get(&d.format("%Y-%m-%d").to_string()).unwrap_or(&0),
        })
        .collect();
    (labels, data)
}
