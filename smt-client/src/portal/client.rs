use std::{str::FromStr, time::Duration};

use bigdecimal::BigDecimal;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use time::{macros::format_description, Date, OffsetDateTime};
use tokio::sync::Mutex;

use super::{
    endpoints::{self, IntervalResponse, LatestReadResponse, OnDemandReadResponse},
    timestamp, Credentials, PortalError, SessionHolder,
};
use crate::domain::{IntervalRead, MeterRead};

/// Pacing of the on-demand read flow.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Attempts at triggering an on-demand read before polling anyway.
    pub trigger_attempts: u32,
    pub trigger_retry_delay: Duration,
    /// Delay before each latest-read poll.
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub request_timeout: Duration,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            trigger_attempts: 5,
            trigger_retry_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            poll_attempts: 90,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Reading fetchers for a single portal account.
pub struct SmtClient {
    holder: SessionHolder,
    options: ReadOptions,
    last_read_at: Mutex<Option<OffsetDateTime>>,
}

impl SmtClient {
    pub fn new(base_url: &str, credentials: Credentials, options: ReadOptions) -> Result<Self, PortalError> {
        let http = Client::builder()
            .timeout(options.request_timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            holder: SessionHolder::new(http, base_url, credentials),
            options,
            last_read_at: Mutex::new(None),
        })
    }

    pub fn session_holder(&self) -> &SessionHolder {
        &self.holder
    }

    /// Request a fresh register read and wait for the portal to publish it.
    pub async fn fetch_hourly_read(&self) -> Result<MeterRead, PortalError> {
        // The portal's web app always loads the dashboard before an on-demand read.
        self.holder
            .authed_post(endpoints::DASHBOARD, "/dashboard/", |_| json!({}))
            .await?;

        self.trigger_on_demand_read().await?;
        self.poll_latest_read().await
    }

    async fn trigger_on_demand_read(&self) -> Result<(), PortalError> {
        for attempt in 1..=self.options.trigger_attempts {
            tracing::info!(attempt, "requesting on-demand meter read");
            let rsp = self
                .holder
                .authed_post(endpoints::ON_DEMAND_READ, "/dashboard/", |s| {
                    json!({ "ESIID": s.esiid, "MeterNumber": s.meter_number })
                })
                .await?;

            let status = rsp.status();
            if status.is_success() {
                let reason = rsp
                    .json::<OnDemandReadResponse>()
                    .await
                    .ok()
                    .and_then(|r| r.data)
                    .and_then(|d| d.status_reason)
                    .unwrap_or_default();

                if reason.starts_with(endpoints::ODR_SUBMITTED) {
                    tracing::info!("on-demand read triggered");
                    return Ok(());
                }
                if reason.starts_with(endpoints::ODR_RATE_LIMITED) {
                    tracing::info!("on-demand read already submitted this hour");
                    return Ok(());
                }
                tracing::warn!(attempt, %reason, "unexpected on-demand read response, retrying");
            } else {
                tracing::warn!(attempt, %status, "on-demand read trigger failed, retrying");
            }

            if attempt < self.options.trigger_attempts {
                tokio::time::sleep(self.options.trigger_retry_delay).await;
            }
        }

        tracing::warn!("on-demand read not confirmed, polling latest read anyway");
        Ok(())
    }

    /// The portal answers with `odrread == 0` until the meter has responded.
    async fn poll_latest_read(&self) -> Result<MeterRead, PortalError> {
        for attempt in 1..=self.options.poll_attempts {
            tokio::time::sleep(self.options.poll_interval).await;

            let rsp = self
                .holder
                .authed_post(endpoints::LATEST_ODR_READ, "/dashboard/", |s| json!({ "ESIID": s.esiid }))
                .await?;

            let status = rsp.status();
            if !status.is_success() {
                tracing::debug!(attempt, %status, "latest read not available");
                continue;
            }

            let data = match rsp.json::<LatestReadResponse>().await {
                Ok(LatestReadResponse { data: Some(data) }) => data,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "unreadable latest read response");
                    continue;
                }
            };

            let value = match data.odrread.as_ref().and_then(decimal_from_json) {
                Some(v) if v != BigDecimal::from(0) => v,
                _ => {
                    tracing::debug!(attempt, status = ?data.odrstatus, "meter read still pending");
                    continue;
                }
            };

            let raw_date = data
                .odrdate
                .ok_or_else(|| PortalError::Fetch("latest read has a value but no odrdate".to_string()))?;
            let mut last_read_at = self.last_read_at.lock().await;
            let date = timestamp::parse_odr_date(&raw_date, *last_read_at)?;
            *last_read_at = Some(date);

            tracing::info!(%date, %value, "meter read received");
            return Ok(MeterRead::new(date, value));
        }

        Err(PortalError::NoData(format!(
            "latest read not published after {} polls",
            self.options.poll_attempts
        )))
    }

    /// 15-minute usage for one calendar day.
    ///
    /// An empty vector means the portal has not (fully) published that day.
    /// Rows are passed through as given, so DST days yield 92 or 100 entries.
    pub async fn fetch_interval_reads(&self, day: Date) -> Result<Vec<IntervalRead>, PortalError> {
        let day_str = day
            .format(format_description!("[month]/[day]/[year]"))
            .map_err(|e| PortalError::Fetch(format!("cannot format {day}: {e}")))?;

        let rsp = self
            .holder
            .authed_post(endpoints::INTERVAL_USAGE, "/dashboard/", |s| {
                json!({
                    "startDate": day_str,
                    "endDate": day_str,
                    "reportFormat": "JSON",
                    "ESIID": [s.esiid],
                    "versionDate": null,
                    "readDate": null,
                    "versionNum": null,
                    "dataType": null,
                })
            })
            .await?;

        let status = rsp.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(PortalError::Fetch(format!("interval usage returned HTTP {status}")));
        }

        let body = rsp
            .json::<IntervalResponse>()
            .await
            .map_err(|e| PortalError::Fetch(format!("invalid interval response: {e}")))?;

        let mut reads = Vec::with_capacity(body.intervaldata.len());
        let mut previous = None;
        for row in &body.intervaldata {
            let Some(value) = row.consumption.as_ref().and_then(decimal_from_json) else {
                tracing::info!(%day, "interval data for day is incomplete");
                return Ok(Vec::new());
            };

            let naive = timestamp::parse_interval_start(&row.date, &row.starttime)?;
            let start = timestamp::localize(naive, previous)?;
            previous = Some(start);
            reads.push(IntervalRead::new(start, value));
        }

        Ok(reads)
    }
}

/// Parse a portal number without going through floating point.
fn decimal_from_json(v: &Value) -> Option<BigDecimal> {
    match v {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}
