use bigdecimal::BigDecimal;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Cumulative register value (kWh) as reported by the portal.
///
/// `date` keeps the offset the source reported for its local civil time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterRead {
    pub date: OffsetDateTime,
    pub value: BigDecimal,
}

impl MeterRead {
    pub fn new(date: OffsetDateTime, value: BigDecimal) -> Self {
        Self { date, value }
    }

    /// Source-local civil time with the offset stripped, as stored in the table.
    pub fn naive_date(&self) -> PrimitiveDateTime {
        PrimitiveDateTime::new(self.date.date(), self.date.time())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredMeterRead {
    pub id: i64,
    pub date: PrimitiveDateTime,
    pub value: BigDecimal,
}
