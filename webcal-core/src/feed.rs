//! Parsed feeds and splitting them into per-UID calendar objects.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::WebcalResult;
use crate::ics::{self, Component, Property};
use crate::object::{ComponentType, RemoteCalendarObject};

/// Standard refresh hint (RFC 7986).
pub const REFRESH_INTERVAL: &str = "REFRESH-INTERVAL";
/// Vendor refresh hint; takes precedence when present.
pub const PUBLISHED_TTL: &str = "X-PUBLISHED-TTL";

/// A whole feed document in canonical form.
#[derive(Debug, Clone)]
pub struct Feed {
    calendar: Component,
}

impl Feed {
    /// Parse canonical iCalendar text. Failure here is fatal for the poll.
    pub fn parse(canonical: &str) -> WebcalResult<Self> {
        Ok(Feed {
            calendar: ics::parse_calendar(canonical)?,
        })
    }

    pub fn calendar(&self) -> &Component {
        &self.calendar
    }

    /// Raw text of the feed's refresh hint, unvalidated.
    pub fn refresh_hint(&self) -> Option<&str> {
        self.calendar
            .find_prop(PUBLISHED_TTL)
            .or_else(|| self.calendar.find_prop(REFRESH_INTERVAL))
            .map(|p| p.value.trim())
    }

    pub fn into_objects(self) -> FeedSplitter {
        FeedSplitter::new(self.calendar)
    }
}

/// Yields one [`RemoteCalendarObject`] per UID.
///
/// Every object is wrapped in a fresh `VCALENDAR` that also carries all of
/// the feed's `VTIMEZONE` definitions. Components without a UID are dropped.
pub struct FeedSplitter {
    timezones: Vec<Component>,
    groups: std::vec::IntoIter<(String, Vec<Component>)>,
}

impl FeedSplitter {
    fn new(calendar: Component) -> Self {
        let mut timezones = Vec::new();
        let mut groups: Vec<(String, Vec<Component>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for component in calendar.components {
            if component.is("VTIMEZONE") {
                timezones.push(component);
                continue;
            }

            let Some(uid) = component.uid().map(str::to_string) else {
                warn!(component = %component.name, "Dropping component without UID");
                continue;
            };

            match index.get(&uid) {
                Some(&i) => groups[i].1.push(component),
                None => {
                    index.insert(uid.clone(), groups.len());
                    groups.push((uid, vec![component]));
                }
            }
        }

        FeedSplitter {
            timezones,
            groups: groups.into_iter(),
        }
    }

    fn wrap(&self, components: Vec<Component>) -> Component {
        let mut calendar = Component::new("VCALENDAR");
        calendar.push_prop(Property::new("VERSION", "2.0"));
        calendar.push_prop(Property::new("PRODID", ics::PRODID));
        calendar.components = self.timezones.clone();
        calendar.components.extend(components);
        calendar
    }
}

impl Iterator for FeedSplitter {
    type Item = RemoteCalendarObject;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (uid, components) = self.groups.next()?;

            // the type comes from the last component of the group
            let last = components.last().map(|c| c.name.clone()).unwrap_or_default();
            let Some(component_type) = ComponentType::from_component_name(&last) else {
                debug!(uid = %uid, component = %last, "Skipping unsupported component type");
                continue;
            };

            return Some(RemoteCalendarObject {
                uid,
                component_type,
                calendar: self.wrap(components),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Example//Feed//EN\r\n\
REFRESH-INTERVAL;VALUE=DURATION:P1D\r\n\
BEGIN:VTIMEZONE\r\n\
TZID:Europe/Berlin\r\n\
BEGIN:STANDARD\r\n\
DTSTART:19701025T030000\r\n\
TZOFFSETFROM:+0200\r\n\
TZOFFSETTO:+0100\r\n\
END:STANDARD\r\n\
END:VTIMEZONE\r\n\
BEGIN:VEVENT\r\n\
UID:weekly\r\n\
DTSTART;TZID=Europe/Berlin:20240108T090000\r\n\
RRULE:FREQ=WEEKLY\r\n\
END:VEVENT\r\n\
BEGIN:VTODO\r\n\
UID:todo-1\r\n\
SUMMARY:Pay rent\r\n\
END:VTODO\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:No uid here\r\n\
END:VEVENT\r\n\
BEGIN:VFREEBUSY\r\n\
UID:busy\r\n\
END:VFREEBUSY\r\n\
BEGIN:VEVENT\r\n\
UID:weekly\r\n\
RECURRENCE-ID;TZID=Europe/Berlin:20240115T090000\r\n\
DTSTART;TZID=Europe/Berlin:20240115T100000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn test_groups_by_uid_and_drops_unusable_components() {
        let objects: Vec<_> = Feed::parse(FEED).expect("Should parse").into_objects().collect();

        let uids: Vec<_> = objects.iter().map(|o| o.uid.as_str()).collect();
        assert_eq!(uids, ["weekly", "todo-1"]);

        let weekly = &objects[0];
        assert_eq!(weekly.component_type, ComponentType::Event);
        let events = weekly
            .calendar
            .components
            .iter()
            .filter(|c| c.is("VEVENT"))
            .count();
        assert_eq!(events, 2);

        assert_eq!(objects[1].component_type, ComponentType::Todo);
    }

    #[test]
    fn test_timezones_are_embedded_not_emitted() {
        let objects: Vec<_> = Feed::parse(FEED).expect("Should parse").into_objects().collect();

        for object in &objects {
            assert!(object.calendar.components[0].is("VTIMEZONE"));
            let data = object.calendar_data();
            assert!(data.starts_with("BEGIN:VCALENDAR\r\nVERSION:2.0\r\n"));
            assert!(data.contains("TZID:Europe/Berlin"));
        }
    }

    #[test]
    fn test_refresh_hint_prefers_published_ttl() {
        let feed = Feed::parse(FEED).expect("Should parse");
        assert_eq!(feed.refresh_hint(), Some("P1D"));

        let with_ttl = FEED.replacen(
            "REFRESH-INTERVAL",
            "X-PUBLISHED-TTL:PT6H\r\nREFRESH-INTERVAL",
            1,
        );
        let feed = Feed::parse(&with_ttl).expect("Should parse");
        assert_eq!(feed.refresh_hint(), Some("PT6H"));
    }

    #[test]
    fn test_empty_feed_yields_nothing() {
        let feed = Feed::parse("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n")
            .expect("Should parse");
        assert_eq!(feed.refresh_hint(), None);
        assert_eq!(feed.into_objects().count(), 0);
    }

    #[test]
    fn test_garbage_is_a_fatal_error() {
        assert!(Feed::parse("<html>oops</html>").is_err());
    }
}
