pub mod interval_read;
pub mod meter_read;

pub use interval_read::{IntervalRead, INTERVAL_MINUTES};
pub use meter_read::{MeterRead, StoredMeterRead};
