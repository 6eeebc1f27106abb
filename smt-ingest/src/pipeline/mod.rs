use std::{sync::Arc, time::{Duration, SystemTime}};

use smt_client::{
    domain::{IntervalRead, MeterRead},
    portal::PortalError,
};
use time::Date;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("auth error: {0}")]
    Auth(String),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("no data: {0}")]
    NoData(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

impl From<PortalError> for PipelineError {
    fn from(e: PortalError) -> Self {
        match e {
            PortalError::Auth(msg) => Self::Auth(msg),
            PortalError::NoData(msg) => Self::NoData(msg),
            PortalError::Fetch(msg) => Self::Fetch(msg),
            PortalError::Http(e) => Self::Fetch(e.to_string()),
        }
    }
}

/// Where readings come from. One account, two shapes.
#[async_trait::async_trait]
pub trait ReadingSource: Send + Sync {
    /// Make sure an authenticated session exists before fetching.
    async fn ensure_session(&self) -> Result<(), PipelineError>;

    async fn fetch_hourly_read(&self) -> Result<Envelope<MeterRead>, PipelineError>;

    /// Empty when the source has not published `day` yet.
    async fn fetch_interval_reads(&self, day: Date) -> Result<Vec<Envelope<IntervalRead>>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, batch: &[Envelope<T>]) -> Result<(), PipelineError>;
}

/// Result of handing one batch to every sink.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Deliver `batch` to each sink exactly once.
///
/// Sinks run concurrently and each is bounded by `timeout`; a failing or hung
/// sink is logged and recorded without affecting the others.
pub async fn deliver_all<T>(sinks: &[Arc<dyn Sink<T>>], batch: &[Envelope<T>], timeout: Duration) -> Delivery
where
    T: Send + Sync,
{
    let attempts = sinks.iter().map(|sink| async move {
        let res = match tokio::time::timeout(timeout, sink.deliver(batch)).await {
            Ok(res) => res,
            Err(_) => Err(PipelineError::Sink(format!("timed out after {timeout:?}"))),
        };
        (sink.name().to_string(), res)
    });

    let mut delivery = Delivery::default();
    for (name, res) in futures::future::join_all(attempts).await {
        match res {
            Ok(()) => {
                metrics::counter!("smt_records_delivered_total", "sink" => name.clone())
                    .increment(batch.len() as u64);
                delivery.succeeded.push(name);
            }
            Err(e) => {
                tracing::error!(sink = %name, error = %e, "sink delivery failed");
                metrics::counter!("smt_sink_errors_total", "sink" => name.clone()).increment(1);
                delivery.failed.push(name);
            }
        }
    }

    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
        if let Ok(dur) = SystemTime::now().duration_since(min_received) {
            metrics::histogram!("smt_fetch_to_delivery_seconds").record(dur.as_secs_f64());
        }
    }

    delivery
}
