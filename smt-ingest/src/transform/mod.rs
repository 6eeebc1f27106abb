use std::sync::Mutex;

use bigdecimal::BigDecimal;
use smt_client::domain::{IntervalRead, MeterRead};
use time::{macros::datetime, OffsetDateTime};

use crate::pipeline::{Envelope, PipelineError, Transform};

fn check_timestamp(ts: OffsetDateTime) -> Result<(), PipelineError> {
    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if ts < min_ts || ts > max_ts {
        return Err(PipelineError::Transform("timestamp out of allowed range".to_string()));
    }
    Ok(())
}

/// Pure validation of a `MeterRead`.
///
/// Rules:
/// - the register value must be non-negative.
/// - date must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_meter_read(env: Envelope<MeterRead>) -> Result<Envelope<MeterRead>, PipelineError> {
    if env.payload.value < BigDecimal::from(0) {
        return Err(PipelineError::Transform("meter value must be non-negative".to_string()));
    }
    check_timestamp(env.payload.date)?;
    Ok(env)
}

/// Pure validation of an `IntervalRead`; same rules applied to interval usage.
pub fn validate_interval_read(env: Envelope<IntervalRead>) -> Result<Envelope<IntervalRead>, PipelineError> {
    if env.payload.value < BigDecimal::from(0) {
        return Err(PipelineError::Transform("interval usage must be non-negative".to_string()));
    }
    check_timestamp(env.payload.interval_start)?;
    Ok(env)
}

/// Validates hourly reads and remembers the last accepted value.
///
/// The register is cumulative; a lower value than last time is logged but still
/// passed on, since correcting source data is not this service's job.
#[derive(Default)]
pub struct MeterReadValidation {
    last_value: Mutex<Option<BigDecimal>>,
}

#[async_trait::async_trait]
impl Transform<MeterRead, MeterRead> for MeterReadValidation {
    async fn apply(&self, input: Envelope<MeterRead>) -> Result<Envelope<MeterRead>, PipelineError> {
        let env = match validate_meter_read(input) {
            Ok(env) => env,
            Err(e) => {
                metrics::counter!("validation_meter_read_rejected_total").increment(1);
                return Err(e);
            }
        };

        if let Ok(mut last) = self.last_value.lock() {
            if let Some(prev) = last.as_ref() {
                if env.payload.value < *prev {
                    tracing::warn!(
                        previous = %prev,
                        current = %env.payload.value,
                        "meter register went backwards"
                    );
                }
            }
            *last = Some(env.payload.value.clone());
        }

        Ok(env)
    }
}

#[derive(Clone, Default)]
pub struct IntervalReadValidation;

#[async_trait::async_trait]
impl Transform<IntervalRead, IntervalRead> for IntervalReadValidation {
    async fn apply(
        &self,
        input: Envelope<IntervalRead>,
    ) -> Result<Envelope<IntervalRead>, PipelineError> {
        match validate_interval_read(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_interval_read_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
