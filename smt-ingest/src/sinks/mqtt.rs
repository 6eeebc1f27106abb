use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use serde_json::value::RawValue;
use smt_client::domain::MeterRead;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;

use crate::{
    config::MqttConfig,
    pipeline::{Envelope, PipelineError, Sink},
};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct BusPayload {
    date: String,
    value: Box<RawValue>,
}

/// `{"date": "<RFC 3339 with offset>", "value": <kWh>}`
pub fn meter_read_payload(read: &MeterRead) -> Result<String, PipelineError> {
    let date = read
        .date
        .format(&Rfc3339)
        .map_err(|e| PipelineError::Sink(format!("cannot format read date: {e}")))?;
    let value = RawValue::from_string(read.value.to_string())
        .map_err(|e| PipelineError::Sink(format!("value {} is not a JSON number: {e}", read.value)))?;

    serde_json::to_string(&BusPayload { date, value })
        .map_err(|e| PipelineError::Sink(format!("cannot encode payload: {e}")))
}

/// Publishes each hourly read to one MQTT topic.
///
/// Connection handling lives in a background task driving the rumqttc event
/// loop; `deliver` only enqueues, bounded by `publish_timeout`.
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    publish_timeout: Duration,
}

impl MqttSink {
    pub fn connect(cfg: &MqttConfig, publish_timeout: Duration, cancel: CancellationToken) -> Self {
        let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        opts.set_keep_alive(Duration::from_secs(60));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            opts.set_credentials(user.clone(), pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 16);
        let host = cfg.host.clone();
        let port = cfg.port;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    ev = eventloop.poll() => match ev {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!(%host, port, "connected to MQTT broker");
                        }
                        Ok(Event::Incoming(Packet::PubAck(_))) => {
                            tracing::debug!("meter read acknowledged by MQTT broker");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(%host, port, error = %e, "MQTT connection error, reconnecting");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            }
                        }
                    },
                }
            }
            tracing::debug!("MQTT event loop stopped");
        });

        Self {
            client,
            topic: cfg.topic.clone(),
            publish_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Sink<MeterRead> for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn deliver(&self, batch: &[Envelope<MeterRead>]) -> Result<(), PipelineError> {
        for env in batch {
            let payload = meter_read_payload(&env.payload)?;
            let publish = self
                .client
                .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload.into_bytes());

            tokio::time::timeout(self.publish_timeout, publish)
                .await
                .map_err(|_| PipelineError::Sink("MQTT publish queue full".to_string()))?
                .map_err(|e| PipelineError::Sink(format!("MQTT publish failed: {e}")))?;

            tracing::info!(topic = %self.topic, "meter read published");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use time::macros::datetime;

    #[test]
    fn payload_matches_bus_format() {
        let read = MeterRead::new(
            datetime!(2024-09-01 00:00:00 -05:00),
            BigDecimal::from_str("12345.678").unwrap(),
        );

        let payload = meter_read_payload(&read).unwrap();

        assert_eq!(payload, r#"{"date":"2024-09-01T00:00:00-05:00","value":12345.678}"#);
    }

    #[test]
    fn payload_value_is_the_fetched_value() {
        for raw in ["0.001", "987.5", "42", "31337.125"] {
            let read = MeterRead::new(
                datetime!(2024-01-15 13:00:00 -06:00),
                BigDecimal::from_str(raw).unwrap(),
            );
            let payload: serde_json::Value =
                serde_json::from_str(&meter_read_payload(&read).unwrap()).unwrap();

            assert_eq!(payload["value"].as_f64().unwrap(), raw.parse::<f64>().unwrap());
            assert_eq!(payload["date"], "2024-01-15T13:00:00-06:00");
        }
    }

    #[test]
    fn payload_keeps_every_fetched_digit() {
        let read = MeterRead::new(
            datetime!(2024-09-01 00:00:00 -05:00),
            BigDecimal::from_str("12345.67890123456789").unwrap(),
        );

        let payload = meter_read_payload(&read).unwrap();

        assert_eq!(
            payload,
            r#"{"date":"2024-09-01T00:00:00-05:00","value":12345.67890123456789}"#
        );
    }

    #[tokio::test]
    async fn unreachable_broker_does_not_fail_enqueue() {
        let cfg = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            topic: "smt/meter".to_string(),
            client_id: "smt-ingest-test".to_string(),
            username: None,
            password: None,
        };
        let cancel = CancellationToken::new();
        let sink = MqttSink::connect(&cfg, Duration::from_millis(200), cancel.clone());

        let read = MeterRead::new(datetime!(2024-09-01 00:00:00 -05:00), BigDecimal::from(1));
        let res = sink.deliver(&[Envelope::new(read)]).await;

        cancel.cancel();
        assert!(res.is_ok());
    }
}
