pub mod mqtt;
pub mod pg_table;

pub use mqtt::MqttSink;
pub use pg_table::{PgTableSink, TableRecord};
