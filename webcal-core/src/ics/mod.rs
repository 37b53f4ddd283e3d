//! Calendar data parsing and serialization.
//!
//! Feeds arrive as plain iCalendar text (RFC 5545), jCal (RFC 7265) or xCal
//! (RFC 6321). All three are read into the same owned [`Component`] tree and
//! written back out as canonical iCalendar text.

mod component;
mod jcal;
mod parse;
mod value;
mod xcal;

pub use component::{Component, Parameter, Property};
pub use jcal::parse_jcal;
pub use parse::parse_calendar;
pub use xcal::parse_xcal;

/// PRODID written into every canonical document.
pub const PRODID: &str = "-//webcal-sync//webcal-core//EN";
