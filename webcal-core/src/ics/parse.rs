//! iCalendar text parsing using the icalendar crate's parser.

use icalendar::parser::{self, read_calendar, unfold};

use crate::error::{WebcalError, WebcalResult};
use crate::ics::{Component, Parameter, Property};

/// Parse iCalendar text into a `VCALENDAR` component tree.
///
/// The document must start with `BEGIN:VCALENDAR`; anything else is treated
/// as a feed that is not calendar data at all (HTML error pages, empty bodies).
pub fn parse_calendar(content: &str) -> WebcalResult<Component> {
    let content = content.trim_start_matches('\u{feff}').trim_start();

    let starts_with_vcalendar = content
        .get(..15)
        .is_some_and(|head| head.eq_ignore_ascii_case("BEGIN:VCALENDAR"));
    if !starts_with_vcalendar {
        return Err(WebcalError::IcsParse(
            "Document does not start with BEGIN:VCALENDAR".into(),
        ));
    }

    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(|e| WebcalError::IcsParse(e.to_string()))?;

    let mut root = Component::new("VCALENDAR");
    root.properties = calendar.properties.iter().map(to_property).collect();
    root.components = calendar.components.iter().map(to_component).collect();

    Ok(root)
}

fn to_component(component: &parser::Component<'_>) -> Component {
    let mut owned = Component::new(component.name.as_ref());
    owned.properties = component.properties.iter().map(to_property).collect();
    owned.components = component.components.iter().map(to_component).collect();
    owned
}

fn to_property(property: &parser::Property<'_>) -> Property {
    let mut owned = Property::new(property.name.as_ref(), property.val.as_ref());
    owned.params = property
        .params
        .iter()
        .map(|p| {
            let value = p.val.as_ref().map(|v| v.to_string()).unwrap_or_default();
            Parameter::new(p.key.as_ref(), &value)
        })
        .collect();
    owned
}
