pub mod smt_portal;

pub use smt_portal::SmtPortalSource;
