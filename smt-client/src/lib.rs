//! Client library for the Smart Meter Texas portal.
//!
//! `portal` owns the authenticated session and the read endpoints, `domain`
//! holds the normalized reading types and `db` the table queries used by the
//! ingestion service.

pub mod db;
pub mod domain;
pub mod portal;
