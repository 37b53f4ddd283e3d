//! TUI rendering for webcal-core types.
//!
//! Extension traits that add colored terminal rendering to engine types
//! using owo_colors.

use chrono::{DateTime, Local, Utc};
use owo_colors::OwoColorize;
use webcal_core::sync::{ActionKind, PollSummary, ReconciliationAction, ReconciliationPlan};
use webcal_core::{PollOutcome, Subscription};

/// Extension trait for TUI rendering with colors.
pub trait Render {
    fn render(&self) -> String;
}

impl Render for ActionKind {
    fn render(&self) -> String {
        colorize(*self, &self.to_string())
    }
}

/// Colorize text according to what the action does to the cache
fn colorize(kind: ActionKind, text: &str) -> String {
    match kind {
        ActionKind::Created => text.green().to_string(),
        ActionKind::Modified => text.yellow().to_string(),
        ActionKind::StaleForDeletion => text.red().to_string(),
        ActionKind::Unchanged | ActionKind::ContentIdentical => text.dimmed().to_string(),
    }
}

impl Render for ReconciliationAction {
    fn render(&self) -> String {
        let kind = self.kind();
        format!(
            "{} {} {}",
            kind.render(),
            colorize(kind, self.uid()),
            self.uri().dimmed()
        )
    }
}

impl Render for Subscription {
    fn render(&self) -> String {
        match &self.display_name {
            Some(name) if name != &self.uri => format!("📅 {} {}", self.uri, name.dimmed()),
            _ => format!("📅 {}", self.uri),
        }
    }
}

/// Threshold for compact view (show counts instead of individual objects)
const COMPACT_THRESHOLD: usize = 5;

impl Render for ReconciliationPlan {
    fn render(&self) -> String {
        let changes: Vec<_> = self
            .actions
            .iter()
            .filter(|a| a.kind().is_mutation())
            .collect();

        let mut lines = Vec::new();
        if changes.is_empty() {
            lines.push("   No changes".dimmed().to_string());
        } else if changes.len() <= COMPACT_THRESHOLD {
            lines.extend(changes.iter().map(|a| format!("   {}", a.render())));
        } else {
            lines.extend(count_lines(&self.summary()));
        }

        if self.skipped > 0 {
            let label = format!("({} invalid {} ignored)", self.skipped, pluralize(self.skipped));
            lines.push(format!("   {}", label.yellow()));
        }

        lines.join("\n")
    }
}

impl Render for PollSummary {
    fn render(&self) -> String {
        let mut lines = count_lines(self);
        if lines.is_empty() {
            lines.push("   No changes".dimmed().to_string());
        }
        if self.skipped > 0 {
            let label = format!("({} invalid {} ignored)", self.skipped, pluralize(self.skipped));
            lines.push(format!("   {}", label.yellow()));
        }
        lines.join("\n")
    }
}

fn count_lines(summary: &PollSummary) -> Vec<String> {
    let mut lines = Vec::new();

    if summary.created > 0 {
        let label = format!("({} new {})", summary.created, pluralize(summary.created));
        lines.push(format!("   {} {}", "+".green(), label.green()));
    }
    if summary.modified > 0 {
        let label = format!("({} changed {})", summary.modified, pluralize(summary.modified));
        lines.push(format!("   {} {}", "~".yellow(), label.yellow()));
    }
    if summary.purged > 0 {
        let label = format!("({} removed {})", summary.purged, pluralize(summary.purged));
        lines.push(format!("   {} {}", "-".red(), label.red()));
    }

    lines
}

fn pluralize(count: usize) -> &'static str {
    if count == 1 { "object" } else { "objects" }
}

impl Render for PollOutcome {
    fn render(&self) -> String {
        match self {
            PollOutcome::Skipped { next_due } => {
                format!("   {}", format!("Not due until {}", render_time(*next_due)).dimmed())
            }
            PollOutcome::NoData => {
                format!("   {}", "Feed unavailable, cache left as is".yellow())
            }
            PollOutcome::Aborted => {
                format!("   {}", "Feed could not be parsed, cache left as is".red())
            }
            PollOutcome::Cancelled => format!("   {}", "Cancelled".dimmed()),
            PollOutcome::Synced(summary) => summary.render(),
        }
    }
}

/// Local wall-clock time plus how far away it is, e.g. "2025-03-20 15:00 (in 2h 5m)".
pub fn render_time(time: DateTime<Utc>) -> String {
    let local = time.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let delta = time.signed_duration_since(Utc::now());

    // whole minutes are precise enough for a poll schedule
    let minutes = delta.num_minutes().unsigned_abs();
    if minutes == 0 {
        return format!("{local} (now)");
    }
    let span = humantime::format_duration(std::time::Duration::from_secs(minutes * 60));
    if delta.num_seconds() > 0 {
        format!("{local} (in {span})")
    } else {
        format!("{local} ({span} ago)")
    }
}
