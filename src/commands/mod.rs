pub mod add;
pub mod list;
pub mod remove;
pub mod status;
pub mod sync;

/// Owner recorded on subscriptions created from the command line.
pub const LOCAL_PRINCIPAL: &str = "principals/local";
