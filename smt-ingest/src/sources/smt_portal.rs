use smt_client::{
    domain::{IntervalRead, MeterRead},
    portal::SmtClient,
};
use time::Date;

use crate::pipeline::{Envelope, PipelineError, ReadingSource};

/// Reading fetchers backed by the Smart Meter Texas portal.
pub struct SmtPortalSource {
    client: SmtClient,
}

impl SmtPortalSource {
    pub fn new(client: SmtClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ReadingSource for SmtPortalSource {
    async fn ensure_session(&self) -> Result<(), PipelineError> {
        self.client.session_holder().get_session().await?;
        Ok(())
    }

    async fn fetch_hourly_read(&self) -> Result<Envelope<MeterRead>, PipelineError> {
        let read = self.client.fetch_hourly_read().await.map_err(|e| {
            metrics::counter!("smt_portal_fetch_errors_total", "kind" => "hourly").increment(1);
            PipelineError::from(e)
        })?;
        Ok(Envelope::new(read))
    }

    async fn fetch_interval_reads(&self, day: Date) -> Result<Vec<Envelope<IntervalRead>>, PipelineError> {
        let reads = self.client.fetch_interval_reads(day).await.map_err(|e| {
            metrics::counter!("smt_portal_fetch_errors_total", "kind" => "interval").increment(1);
            PipelineError::from(e)
        })?;
        Ok(reads.into_iter().map(Envelope::new).collect())
    }
}
