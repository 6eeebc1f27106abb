use bigdecimal::BigDecimal;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Length of one interval read in minutes.
pub const INTERVAL_MINUTES: u16 = 15;

/// Usage within a single 15-minute window. Not cumulative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalRead {
    pub interval_start: OffsetDateTime,
    pub duration_minutes: u16,
    pub value: BigDecimal,
}

impl IntervalRead {
    pub fn new(interval_start: OffsetDateTime, value: BigDecimal) -> Self {
        Self {
            interval_start,
            duration_minutes: INTERVAL_MINUTES,
            value,
        }
    }

    pub fn naive_start(&self) -> PrimitiveDateTime {
        PrimitiveDateTime::new(self.interval_start.date(), self.interval_start.time())
    }
}
