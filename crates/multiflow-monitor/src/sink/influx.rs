//! InfluxDB v2 metrics sink over the HTTP write API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{MetricsSink, Point};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};

/// Connection settings for the write API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub timeout: Duration,
}

impl InfluxConfig {
    /// `None` when no URL is configured.
    pub fn from_monitor(config: &MonitorConfig) -> Option<Self> {
        let url = config.influxdb_url.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            url: url.trim_end_matches('/').to_string(),
            token: config.influxdb_token.clone(),
            org: config.influxdb_org.clone(),
            timeout: Duration::from_secs(10),
        })
    }
}

/// Writes points as line protocol to `{url}/api/v2/write`.
pub struct InfluxSink {
    client: Client,
    config: InfluxConfig,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> MonitorResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn post(&self, bucket: &str, body: String) -> MonitorResult<()> {
        let url = format!("{}/api/v2/write", self.config.url);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", bucket),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(MonitorError::Sink(format!(
                "influx write returned {}: {}",
                status.as_u16(),
                message.trim()
            )))
        }
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn write(&self, bucket: &str, point: &Point) -> MonitorResult<()> {
        self.post(bucket, to_line_protocol(point)).await
    }

    async fn write_batch(&self, bucket: &str, points: &[Point]) -> MonitorResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = points
            .iter()
            .map(to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");
        self.post(bucket, body).await
    }

    fn name(&self) -> &str {
        "influxdb"
    }
}

// ── Line protocol ───────────────────────────────────────────────────────

fn escape(value: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_measurement(value: &str) -> String {
    escape(value, &[',', ' '])
}

fn escape_key(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

/// Render one point as an InfluxDB line. Non-finite fields are left out
/// since the write API rejects them.
pub fn to_line_protocol(point: &Point) -> String {
    let mut line = escape_measurement(&point.measurement);
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    let fields: Vec<String> = point
        .fields
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| format!("{}={}", escape_key(k), v))
        .collect();
    line.push(' ');
    line.push_str(&fields.join(","));

    if let Some(ns) = point.timestamp.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&ns.to_string());
    }
    line
}
