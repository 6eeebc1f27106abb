//! The poll loop: two independently aligned cycles sharing one reading source.

pub mod alignment;

use std::{future::Future, sync::Arc, time::Duration};

use smt_client::domain::{IntervalRead, MeterRead};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ScheduleConfig,
    pipeline::{deliver_all, Envelope, PipelineError, ReadingSource, Sink, Transform},
    transform::{IntervalReadValidation, MeterReadValidation},
};

pub use alignment::{interval_target_day, next_fire};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Authenticating,
    Fetching,
    Publishing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Records were handed to every sink; `failed_sinks` names those that errored.
    Delivered { records: usize, failed_sinks: Vec<String> },
    /// Interval data for the target day is not published yet.
    Empty,
    /// The hourly read was not available this hour.
    Skipped,
    Failed,
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Delivered { failed_sinks, .. } if failed_sinks.is_empty() => "delivered",
            Self::Delivered { .. } => "partial",
            Self::Empty => "empty",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cycle {
    Hourly,
    Interval,
}

impl Cycle {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Interval => "interval",
        }
    }
}

fn enter(cycle: Cycle, state: CycleState) {
    tracing::debug!(cycle = cycle.as_str(), ?state, "cycle state");
}

/// Drives fetch-then-deliver cycles for both reading shapes.
///
/// Every cycle absorbs its own failures; the next scheduled tick is the retry.
pub struct Orchestrator {
    source: Arc<dyn ReadingSource>,
    meter_sinks: Vec<Arc<dyn Sink<MeterRead>>>,
    interval_sinks: Vec<Arc<dyn Sink<IntervalRead>>>,
    meter_validation: MeterReadValidation,
    interval_validation: IntervalReadValidation,
    schedule: ScheduleConfig,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn ReadingSource>, schedule: ScheduleConfig) -> Self {
        Self {
            source,
            meter_sinks: Vec::new(),
            interval_sinks: Vec::new(),
            meter_validation: MeterReadValidation::default(),
            interval_validation: IntervalReadValidation,
            schedule,
        }
    }

    pub fn with_meter_sink(mut self, sink: Arc<dyn Sink<MeterRead>>) -> Self {
        self.meter_sinks.push(sink);
        self
    }

    pub fn with_interval_sink(mut self, sink: Arc<dyn Sink<IntervalRead>>) -> Self {
        self.interval_sinks.push(sink);
        self
    }

    fn failed(&self, cycle: Cycle, e: PipelineError) -> CycleOutcome {
        match e {
            PipelineError::NoData(msg) => {
                tracing::warn!(cycle = cycle.as_str(), reason = %msg, "reading not available, will retry next tick");
                CycleOutcome::Skipped
            }
            e => {
                tracing::error!(cycle = cycle.as_str(), error = %e, "cycle failed, will retry next tick");
                CycleOutcome::Failed
            }
        }
    }

    /// One hourly cycle: session, latest register read, every meter sink.
    pub async fn run_hourly_cycle(&self) -> CycleOutcome {
        let cycle = Cycle::Hourly;

        enter(cycle, CycleState::Authenticating);
        if let Err(e) = self.source.ensure_session().await {
            return self.failed(cycle, e);
        }

        enter(cycle, CycleState::Fetching);
        let env = match self.source.fetch_hourly_read().await {
            Ok(env) => env,
            Err(e) => return self.failed(cycle, e),
        };
        let env = match self.meter_validation.apply(env).await {
            Ok(env) => env,
            Err(e) => return self.failed(cycle, e),
        };

        enter(cycle, CycleState::Publishing);
        if self.meter_sinks.is_empty() {
            tracing::info!(date = %env.payload.date, value = %env.payload.value, "no sinks configured for meter reads");
        }
        let delivery = deliver_all(&self.meter_sinks, std::slice::from_ref(&env), self.schedule.sink_timeout).await;

        enter(cycle, CycleState::Idle);
        CycleOutcome::Delivered {
            records: 1,
            failed_sinks: delivery.failed,
        }
    }

    /// One interval cycle for the day before `now`. Interval reads only go to
    /// the interval sinks, never to the bus.
    pub async fn run_interval_cycle(&self, now: OffsetDateTime) -> CycleOutcome {
        let cycle = Cycle::Interval;
        let day = match interval_target_day(now) {
            Ok(day) => day,
            Err(e) => return self.failed(cycle, e),
        };

        enter(cycle, CycleState::Authenticating);
        if let Err(e) = self.source.ensure_session().await {
            return self.failed(cycle, e);
        }

        enter(cycle, CycleState::Fetching);
        let fetched = match self.source.fetch_interval_reads(day).await {
            Ok(reads) => reads,
            Err(e) => return self.failed(cycle, e),
        };
        if fetched.is_empty() {
            tracing::info!(%day, "interval data not published yet");
            enter(cycle, CycleState::Idle);
            return CycleOutcome::Empty;
        }

        let mut batch: Vec<Envelope<IntervalRead>> = Vec::with_capacity(fetched.len());
        for env in fetched {
            match self.interval_validation.apply(env).await {
                Ok(env) => batch.push(env),
                Err(e) => tracing::error!(%day, error = %e, "dropping invalid interval read"),
            }
        }
        if batch.is_empty() {
            tracing::error!(%day, "every interval read for the day was rejected");
            enter(cycle, CycleState::Idle);
            return CycleOutcome::Failed;
        }
        tracing::info!(%day, intervals = batch.len(), "interval data received");

        enter(cycle, CycleState::Publishing);
        let delivery = deliver_all(&self.interval_sinks, &batch, self.schedule.sink_timeout).await;

        enter(cycle, CycleState::Idle);
        CycleOutcome::Delivered {
            records: batch.len(),
            failed_sinks: delivery.failed,
        }
    }

    /// Run both loops until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if self.schedule.read_on_start {
            tracing::info!("reading meter at startup");
            tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = self.run_hourly_cycle() => record(Cycle::Hourly, &outcome),
            }
        }

        let hourly = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let orchestrator: &Orchestrator = &this;
                let period = orchestrator.schedule.hourly_period;
                tick_loop(Cycle::Hourly, period, cancel, move |_| orchestrator.run_hourly_cycle()).await;
            })
        };

        let interval = if self.schedule.interval_enabled {
            tracing::info!("interval data collection enabled");
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                let orchestrator: &Orchestrator = &this;
                let period = orchestrator.schedule.interval_period;
                tick_loop(Cycle::Interval, period, cancel, move |fired_at| {
                    orchestrator.run_interval_cycle(fired_at)
                })
                .await;
            }))
        } else {
            None
        };

        if let Err(e) = hourly.await {
            tracing::error!(error = %e, "hourly loop terminated abnormally");
        }
        if let Some(handle) = interval {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "interval loop terminated abnormally");
            }
        }
    }
}

fn record(cycle: Cycle, outcome: &CycleOutcome) {
    metrics::counter!("smt_cycles_total", "cycle" => cycle.as_str(), "outcome" => outcome.label()).increment(1);
    tracing::debug!(cycle = cycle.as_str(), ?outcome, "cycle finished");
}

/// Fire `run` at every aligned boundary of `period` until cancelled.
///
/// The next boundary is recomputed from the wall clock after each cycle, so a
/// slow cycle never shifts later ticks; boundaries it overran are not replayed.
async fn tick_loop<F, Fut>(cycle: Cycle, period: Duration, cancel: CancellationToken, mut run: F)
where
    F: FnMut(OffsetDateTime) -> Fut,
    Fut: Future<Output = CycleOutcome>,
{
    loop {
        let fire_at = next_fire(OffsetDateTime::now_utc(), period);
        tracing::info!(cycle = cycle.as_str(), next = %fire_at, "next cycle scheduled");

        // Re-check against the wall clock in case it moved while sleeping.
        loop {
            let wait = alignment::until(fire_at, OffsetDateTime::now_utc());
            if wait.is_zero() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = run(fire_at) => record(cycle, &outcome),
        }
    }
}
