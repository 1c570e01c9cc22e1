//! Tracing setup shared by the sitewatch binaries.

mod subscriber;

pub use subscriber::init_tracing;
