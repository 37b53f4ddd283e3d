//! Sync engine for subscribed (webcal) calendars.
//!
//! This crate keeps a local read-only cache of remote calendar feeds:
//! - `fetch` downloads a feed and normalizes jCal/xCal to iCalendar text
//! - `feed` splits a feed into one calendar object per UID
//! - `sync` classifies remote objects against the cache and applies the result
//! - `poll` runs the whole pipeline for one subscription, or all that are due

pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod filter;
pub mod ics;
pub mod object;
pub mod poll;
pub mod schedule;
pub mod store;
pub mod subscription;
pub mod sync;

pub use config::WebcalConfig;
pub use error::{WebcalError, WebcalResult};
pub use poll::{PollOutcome, PollReport, Poller};
pub use subscription::Subscription;
