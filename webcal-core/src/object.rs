//! Calendar objects on both sides of a reconciliation.
//!
//! A [`RemoteCalendarObject`] is parsed from the feed on every poll and thrown
//! away afterwards. A [`CachedCalendarObject`] is what the object store holds.
//! Before a remote object is written it is denormalized: serialized once,
//! hashed, and indexed by its time range.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ObjectError;
use crate::ics::{Component, Property};

/// Upper bound on expanded occurrences when looking for the end of a rule.
const MAX_OCCURRENCES: u16 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Event,
    Todo,
    Journal,
}

impl ComponentType {
    /// Map a component name (`VEVENT`, ...) to a cacheable type.
    /// `VTIMEZONE` and unknown components have none.
    pub fn from_component_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "VEVENT" => Some(ComponentType::Event),
            "VTODO" => Some(ComponentType::Todo),
            "VJOURNAL" => Some(ComponentType::Journal),
            _ => None,
        }
    }

    pub fn component_name(self) -> &'static str {
        match self {
            ComponentType::Event => "VEVENT",
            ComponentType::Todo => "VTODO",
            ComponentType::Journal => "VJOURNAL",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentType::Event => write!(f, "event"),
            ComponentType::Todo => write!(f, "todo"),
            ComponentType::Journal => write!(f, "journal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    #[default]
    Public,
    Private,
    Confidential,
}

impl Classification {
    /// Unrecognized CLASS values are treated as private (RFC 5545 §3.8.1.3).
    fn from_class(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_uppercase()) {
            None => Classification::Public,
            Some(v) if v == "PUBLIC" => Classification::Public,
            Some(v) if v == "CONFIDENTIAL" => Classification::Confidential,
            Some(_) => Classification::Private,
        }
    }
}

/// One UID's worth of feed data, wrapped in its own `VCALENDAR`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCalendarObject {
    pub uid: String,
    pub component_type: ComponentType,
    pub calendar: Component,
}

impl RemoteCalendarObject {
    pub fn calendar_data(&self) -> String {
        self.calendar.to_string()
    }
}

/// An object as held by the calendar object store.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCalendarObject {
    pub id: i64,
    pub uri: String,
    pub uid: String,
    pub etag: String,
    pub calendar_data: String,
    pub component_type: ComponentType,
    pub size: usize,
    pub first_occurrence: Option<DateTime<Utc>>,
    pub last_occurrence: Option<DateTime<Utc>>,
    pub classification: Classification,
}

impl CachedCalendarObject {
    pub fn from_denormalized(id: i64, uri: &str, object: &DenormalizedObject) -> Self {
        CachedCalendarObject {
            id,
            uri: uri.to_string(),
            uid: object.uid.clone(),
            etag: object.etag.clone(),
            calendar_data: object.calendar_data.clone(),
            component_type: object.component_type,
            size: object.size,
            first_occurrence: object.first_occurrence,
            last_occurrence: object.last_occurrence,
            classification: object.classification,
        }
    }
}

/// Everything the store needs to persist a remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct DenormalizedObject {
    pub uid: String,
    pub component_type: ComponentType,
    pub calendar_data: String,
    pub etag: String,
    pub size: usize,
    pub first_occurrence: Option<DateTime<Utc>>,
    /// `None` when the object recurs without end.
    pub last_occurrence: Option<DateTime<Utc>>,
    pub classification: Classification,
}

/// Lowercase hex SHA-256 of the serialized object.
pub fn etag(calendar_data: &str) -> String {
    format!("{:x}", Sha256::digest(calendar_data.as_bytes()))
}

/// Serialized text with line folding undone, DTSTAMP lines removed and
/// everything lowercased. Two objects with equal keys differ at most in
/// their DTSTAMP.
pub fn comparison_key(calendar_data: &str) -> String {
    let unfolded = calendar_data
        .replace("\r\n ", "")
        .replace("\r\n\t", "")
        .replace("\n ", "")
        .replace("\n\t", "");

    unfolded
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !is_dtstamp_line(line))
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase()
}

fn is_dtstamp_line(line: &str) -> bool {
    let name_end = line.find([':', ';']).unwrap_or(line.len());
    line[..name_end].trim().eq_ignore_ascii_case("DTSTAMP")
}

/// Serialize and index a remote object for storage.
pub fn denormalize(object: &RemoteCalendarObject) -> Result<DenormalizedObject, ObjectError> {
    let components: Vec<&Component> = object
        .calendar
        .components
        .iter()
        .filter(|c| !c.is("VTIMEZONE"))
        .collect();

    if let Some(other) = components
        .iter()
        .find(|c| !c.is(object.component_type.component_name()))
    {
        return Err(ObjectError::MixedComponents(
            object.component_type.component_name().to_string(),
            other.name.clone(),
        ));
    }

    // The master is the instance without RECURRENCE-ID; a feed may only
    // carry overrides, in which case the first one stands in.
    let master = components
        .iter()
        .find(|c| c.find_prop("RECURRENCE-ID").is_none())
        .or_else(|| components.first())
        .copied();

    let (first_occurrence, last_occurrence) = match master {
        Some(master) => occurrence_range(object.component_type, master)?,
        None => (None, None),
    };

    let calendar_data = object.calendar_data();

    Ok(DenormalizedObject {
        uid: object.uid.clone(),
        component_type: object.component_type,
        etag: etag(&calendar_data),
        size: calendar_data.len(),
        calendar_data,
        first_occurrence,
        last_occurrence,
        classification: Classification::from_class(
            master.and_then(|m| m.find_prop("CLASS")).map(|p| p.value.as_str()),
        ),
    })
}

type OccurrenceRange = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

fn occurrence_range(
    component_type: ComponentType,
    master: &Component,
) -> Result<OccurrenceRange, ObjectError> {
    let start = master.find_prop("DTSTART").map(parse_date_time).transpose()?;

    match component_type {
        ComponentType::Event => {
            let Some(start) = start else {
                return Ok((None, None));
            };
            let end = event_end(master, &start)?;

            let last = match master.find_prop("RRULE") {
                Some(rrule) => match last_recurrence(master, rrule, &start) {
                    Some(last_start) => Some(
                        last_start
                            .checked_add_signed(end - start.instant)
                            .ok_or_else(|| ObjectError::InvalidDate {
                                property: rrule.name.clone(),
                                value: rrule.value.clone(),
                            })?,
                    ),
                    None => None,
                },
                None => Some(end),
            };

            Ok((Some(start.instant), last))
        }
        ComponentType::Todo => {
            let due = master.find_prop("DUE").map(parse_date_time).transpose()?;
            let first = start.as_ref().or(due.as_ref()).map(|t| t.instant);
            let last = due.as_ref().or(start.as_ref()).map(|t| t.instant);
            Ok((first, last))
        }
        ComponentType::Journal => {
            let instant = start.map(|t| t.instant);
            Ok((instant, instant))
        }
    }
}

/// A resolved DTSTART/DTEND/DUE value.
struct DateValue {
    instant: DateTime<Utc>,
    is_date: bool,
    tzid: Option<String>,
}

fn event_end(master: &Component, start: &DateValue) -> Result<DateTime<Utc>, ObjectError> {
    if let Some(dtend) = master.find_prop("DTEND") {
        return Ok(parse_date_time(dtend)?.instant);
    }
    if let Some(duration) = master.find_prop("DURATION") {
        return start
            .instant
            .checked_add_signed(parse_duration(&duration.value)?)
            .ok_or_else(|| ObjectError::InvalidDuration(duration.value.clone()));
    }
    if start.is_date {
        return Ok(start.instant + Duration::days(1));
    }
    Ok(start.instant)
}

fn parse_date_time(property: &Property) -> Result<DateValue, ObjectError> {
    let value = property.value.trim();
    let invalid = || ObjectError::InvalidDate {
        property: property.name.clone(),
        value: value.to_string(),
    };

    if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| invalid())?;
        return Ok(DateValue {
            instant: date.and_time(chrono::NaiveTime::MIN).and_utc(),
            is_date: true,
            tzid: None,
        });
    }

    if let Some(utc) = value.strip_suffix(['Z', 'z']) {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").map_err(|_| invalid())?;
        return Ok(DateValue {
            instant: naive.and_utc(),
            is_date: false,
            tzid: None,
        });
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").map_err(|_| invalid())?;
    let tzid = property.param("TZID").map(|t| t.trim_start_matches('/').to_string());
    let instant = match tzid.as_deref().and_then(|t| t.parse::<chrono_tz::Tz>().ok()) {
        Some(tz) => localize(&tz, naive),
        // floating times and unknown zones are read as UTC
        None => naive.and_utc(),
    };

    Ok(DateValue {
        instant,
        is_date: false,
        tzid,
    })
}

/// Resolve a local time, moving forward out of DST gaps.
fn localize<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

fn parse_duration(value: &str) -> Result<Duration, ObjectError> {
    let invalid = || ObjectError::InvalidDuration(value.to_string());
    let trimmed = value.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.trim_start_matches('+')),
    };

    let parsed: std::time::Duration = iso8601::duration(unsigned).map_err(|_| invalid())?.into();
    let duration = Duration::from_std(parsed).map_err(|_| invalid())?;

    Ok(if negative { -duration } else { duration })
}

/// Start of the last occurrence of a finite rule. `None` for rules without
/// COUNT or UNTIL, and for rules the recurrence library rejects.
fn last_recurrence(
    master: &Component,
    rrule: &Property,
    start: &DateValue,
) -> Option<DateTime<Utc>> {
    let rule = rrule.value.to_ascii_uppercase();
    if !rule.contains("COUNT=") && !rule.contains("UNTIL=") {
        return None;
    }

    let known_tz = start
        .tzid
        .as_deref()
        .filter(|t| t.parse::<chrono_tz::Tz>().is_ok());

    let dtstart = match (known_tz, master.find_prop("DTSTART")) {
        (Some(tzid), Some(dtstart)) if !start.is_date => {
            format!("DTSTART;TZID={tzid}:{}", dtstart.value.trim())
        }
        _ => format!("DTSTART:{}", start.instant.format("%Y%m%dT%H%M%SZ")),
    };

    let rrule_str = format!("{dtstart}\nRRULE:{}", rrule.value.trim());
    let rrule_set: RRuleSet = rrule_str.parse().ok()?;
    let result = rrule_set.all(MAX_OCCURRENCES);

    if result.limited {
        return None;
    }
    result.dates.last().map(|dt| dt.with_timezone(&Utc))
}
