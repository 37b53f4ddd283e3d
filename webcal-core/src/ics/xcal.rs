//! xCal (`application/calendar+xml`, RFC 6321) reader.

use roxmltree::{Document, Node};

use crate::error::{WebcalError, WebcalResult};
use crate::ics::value::{ValueKind, format_period_parts, format_recur, format_scalar};
use crate::ics::{Component, Parameter, Property};

/// Parse an xCal document into a `VCALENDAR` component tree.
pub fn parse_xcal(content: &str) -> WebcalResult<Component> {
    let document = Document::parse(content).map_err(|e| WebcalError::XcalParse(e.to_string()))?;
    let root = document.root_element();

    let vcalendar = if root.tag_name().name().eq_ignore_ascii_case("vcalendar") {
        root
    } else if root.tag_name().name().eq_ignore_ascii_case("icalendar") {
        elements(root)
            .find(|n| n.tag_name().name().eq_ignore_ascii_case("vcalendar"))
            .ok_or_else(|| WebcalError::XcalParse("No vcalendar element".into()))?
    } else {
        return Err(WebcalError::XcalParse(format!(
            "Unexpected root element '{}'",
            root.tag_name().name()
        )));
    };

    Ok(component_from_xml(vcalendar))
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(Node::is_element)
}

fn text_of<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().unwrap_or_default()
}

fn component_from_xml(node: Node<'_, '_>) -> Component {
    let mut component = Component::new(node.tag_name().name());

    for child in elements(node) {
        match child.tag_name().name() {
            "properties" => {
                component.properties = elements(child).map(property_from_xml).collect();
            }
            "components" => {
                component.components = elements(child).map(component_from_xml).collect();
            }
            _ => {}
        }
    }

    component
}

fn property_from_xml(node: Node<'_, '_>) -> Property {
    let mut property = Property::new(node.tag_name().name(), "");
    let mut values = Vec::new();

    for child in elements(node) {
        let tag = child.tag_name().name();

        if tag == "parameters" {
            for param in elements(child) {
                let value = elements(param)
                    .map(|v| text_of(v).to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                property
                    .params
                    .push(Parameter::new(param.tag_name().name(), &value));
            }
            continue;
        }

        let kind = ValueKind::from_name(tag);
        if let Some(value_param) = kind.value_param()
            && property.param("VALUE").is_none()
        {
            property.params.push(Parameter::new("VALUE", value_param));
        }

        values.push(value_to_text(kind, child));
    }

    // GEO and REQUEST-STATUS hold structured parts rather than a value list
    let separator = if property.name == "GEO" || property.name == "REQUEST-STATUS" {
        ";"
    } else {
        ","
    };
    property.value = values.join(separator);
    property
}

fn value_to_text(kind: ValueKind, node: Node<'_, '_>) -> String {
    match kind {
        ValueKind::Recur => {
            let parts: Vec<(String, Vec<String>)> = elements(node)
                .fold(Vec::new(), |mut parts, part| {
                    let name = part.tag_name().name().to_string();
                    let value = text_of(part).to_string();
                    match parts.iter_mut().find(|(n, _)| *n == name) {
                        Some((_, values)) => values.push(value),
                        None => parts.push((name, vec![value])),
                    }
                    parts
                });
            format_recur(&parts)
        }
        ValueKind::Period => {
            let part = |name: &str| {
                elements(node)
                    .find(|n| n.tag_name().name() == name)
                    .map(text_of)
            };
            let start = part("start").unwrap_or_default();
            let end = part("end").or_else(|| part("duration")).unwrap_or_default();
            format_period_parts(start, end)
        }
        _ => format_scalar(kind, text_of(node)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<icalendar xmlns="urn:ietf:params:xml:ns:icalendar-2.0">
  <vcalendar>
    <properties>
      <prodid><text>-//Example//Feed//EN</text></prodid>
      <version><text>2.0</text></version>
      <x-published-ttl><unknown>PT6H</unknown></x-published-ttl>
    </properties>
    <components>
      <vevent>
        <properties>
          <uid><text>ev-1</text></uid>
          <dtstamp><date-time>2024-01-01T00:00:00Z</date-time></dtstamp>
          <dtstart>
            <parameters><tzid><text>America/New_York</text></tzid></parameters>
            <date-time>2024-01-10T10:00:00</date-time>
          </dtstart>
          <summary><text>Review; quarterly</text></summary>
          <rrule><recur><freq>WEEKLY</freq><byday>MO</byday><byday>WE</byday></recur></rrule>
          <geo><latitude>37.386013</latitude><longitude>-122.082932</longitude></geo>
          <rdate><period><start>2024-02-01T10:00:00Z</start><duration>PT1H</duration></period></rdate>
        </properties>
        <components>
          <valarm>
            <properties>
              <action><text>DISPLAY</text></action>
              <trigger><duration>-PT10M</duration></trigger>
            </properties>
          </valarm>
        </components>
      </vevent>
    </components>
  </vcalendar>
</icalendar>"#;

    fn event() -> Component {
        parse_xcal(FEED).expect("Should parse").components.remove(0)
    }

    #[test]
    fn test_parses_structure() {
        let calendar = parse_xcal(FEED).expect("Should parse");

        assert!(calendar.is("VCALENDAR"));
        assert_eq!(
            calendar.find_prop("X-PUBLISHED-TTL").map(|p| p.value.as_str()),
            Some("PT6H")
        );
        let event = &calendar.components[0];
        assert!(event.is("VEVENT"));
        assert_eq!(event.uid(), Some("ev-1"));
        assert!(event.components[0].is("VALARM"));
    }

    #[test]
    fn test_converts_values() {
        let event = event();

        let dtstart = event.find_prop("DTSTART").expect("DTSTART");
        assert_eq!(dtstart.value, "20240110T100000");
        assert_eq!(dtstart.param("TZID"), Some("America/New_York"));

        assert_eq!(
            event.find_prop("SUMMARY").map(|p| p.value.as_str()),
            Some("Review\\; quarterly")
        );
        assert_eq!(
            event.find_prop("RRULE").map(|p| p.value.as_str()),
            Some("FREQ=WEEKLY;BYDAY=MO,WE")
        );
        assert_eq!(
            event.find_prop("GEO").map(|p| p.value.as_str()),
            Some("37.386013;-122.082932")
        );

        let rdate = event.find_prop("RDATE").expect("RDATE");
        assert_eq!(rdate.value, "20240201T100000Z/PT1H");
        assert_eq!(rdate.param("VALUE"), Some("PERIOD"));
    }

    #[test]
    fn test_rejects_malformed_xml() {
        assert!(matches!(
            parse_xcal("<icalendar><vcalendar>"),
            Err(WebcalError::XcalParse(_))
        ));
    }

    #[test]
    fn test_rejects_unexpected_root() {
        assert!(parse_xcal("<html><body/></html>").is_err());
        assert!(parse_xcal("<icalendar/>").is_err());
    }
}
