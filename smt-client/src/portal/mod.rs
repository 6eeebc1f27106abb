//! Smart Meter Texas portal access.
//!
//! The portal is a browser-facing JSON API: a bearer token from the
//! authenticate endpoint, account identifiers from the dashboard, and two read
//! paths (on-demand register reads and 15-minute interval history).

pub mod client;
pub mod endpoints;
pub mod error;
pub mod session;
pub mod timestamp;

pub use client::{ReadOptions, SmtClient};
pub use error::PortalError;
pub use session::{Credentials, Session, SessionHolder};
