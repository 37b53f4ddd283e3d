//! Typed value conversion shared by the jCal and xCal readers.
//!
//! Both alternative representations carry an explicit value type per property
//! (RFC 7265 §3.6, RFC 6321 §3.6) and write dates with separators. These
//! helpers turn them back into the plain iCalendar text form.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueKind {
    Text,
    Date,
    DateTime,
    Time,
    UtcOffset,
    Period,
    Recur,
    Boolean,
    Binary,
    Other,
}

impl ValueKind {
    pub(crate) fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "text" => ValueKind::Text,
            "date" => ValueKind::Date,
            "date-time" => ValueKind::DateTime,
            "time" => ValueKind::Time,
            "utc-offset" => ValueKind::UtcOffset,
            "period" => ValueKind::Period,
            "recur" => ValueKind::Recur,
            "boolean" => ValueKind::Boolean,
            "binary" => ValueKind::Binary,
            _ => ValueKind::Other,
        }
    }

    /// `VALUE=` parameter to emit for types that are never a property's default.
    pub(crate) fn value_param(self) -> Option<&'static str> {
        match self {
            ValueKind::Date => Some("DATE"),
            ValueKind::Period => Some("PERIOD"),
            ValueKind::Binary => Some("BINARY"),
            _ => None,
        }
    }
}

/// Convert a single scalar value of the given kind to its iCalendar text form.
pub(crate) fn format_scalar(kind: ValueKind, raw: &str) -> String {
    match kind {
        ValueKind::Text => escape_text(raw),
        ValueKind::Date | ValueKind::DateTime => format_date_or_date_time(raw),
        ValueKind::Time | ValueKind::UtcOffset => raw.replace(':', ""),
        ValueKind::Period => format_period(raw),
        ValueKind::Boolean => raw.to_ascii_uppercase(),
        ValueKind::Recur | ValueKind::Binary | ValueKind::Other => raw.to_string(),
    }
}

/// `2024-01-08` → `20240108`, `2024-01-08T10:00:00Z` → `20240108T100000Z`.
pub(crate) fn format_date_or_date_time(raw: &str) -> String {
    match raw.split_once('T') {
        Some((date, time)) => format!("{}T{}", date.replace('-', ""), time.replace(':', "")),
        None => raw.replace('-', ""),
    }
}

fn format_period(raw: &str) -> String {
    match raw.split_once('/') {
        Some((start, end)) => format!(
            "{}/{}",
            format_date_or_date_time(start),
            format_period_end(end)
        ),
        None => format_date_or_date_time(raw),
    }
}

fn format_period_end(end: &str) -> String {
    if end.trim_start_matches(['+', '-']).starts_with('P') {
        end.to_string()
    } else {
        format_date_or_date_time(end)
    }
}

/// Build a PERIOD value from separate start and end/duration parts.
pub(crate) fn format_period_parts(start: &str, end: &str) -> String {
    format!(
        "{}/{}",
        format_date_or_date_time(start),
        format_period_end(end)
    )
}

/// Build a RECUR value from `(part, values)` pairs; FREQ is always written first.
pub(crate) fn format_recur(parts: &[(String, Vec<String>)]) -> String {
    let mut ordered: Vec<&(String, Vec<String>)> = parts
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("freq"))
        .collect();
    ordered.extend(
        parts
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("freq")),
    );

    ordered
        .into_iter()
        .map(|(name, values)| {
            let values: Vec<String> = if name.eq_ignore_ascii_case("until") {
                values.iter().map(|v| format_date_or_date_time(v)).collect()
            } else {
                values.clone()
            };
            format!("{}={}", name.to_ascii_uppercase(), values.join(","))
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Escape TEXT values (RFC 5545 §3.3.11).
pub(crate) fn escape_text(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            _ => escaped.push(ch),
        }
    }
    escaped
}
