pub mod meter_read_queries;

pub use meter_read_queries::{
    ensure_interval_table, ensure_meter_table, insert_interval_reads, insert_meter_read,
    is_valid_table_name, latest_meter_read,
};
