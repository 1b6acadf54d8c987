// InfluxDB store - client/server structured store over the v1 HTTP API
use crate::application::structured_store::{StorageInfo, StructuredStore};
use crate::domain::reading::{ChannelId, Reading, StorageRecord};
use crate::infrastructure::config::InfluxSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat};
use serde::Deserialize;
use std::time::Duration;

const MEASUREMENT: &str = "readings";

#[derive(Debug, Clone)]
pub struct InfluxStore {
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    #[allow(dead_code)]
    name: String,
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    tags: Option<std::collections::HashMap<String, String>>,
}

impl InfluxStore {
    pub fn new(settings: &InfluxSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .context("Failed to build InfluxDB HTTP client")?;

        Ok(Self {
            host: settings.host.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            database: settings.database.clone(),
            retention_policy: settings.retention_policy.clone(),
            client,
        })
    }

    fn build_query_url(&self, query: &str) -> String {
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.host,
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.retention_policy),
            urlencoding::encode(query)
        )
    }

    fn build_write_url(&self) -> String {
        format!(
            "{}/write?db={}&rp={}&precision=ms",
            self.host,
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.retention_policy)
        )
    }

    async fn execute_query(&self, query: &str, mutating: bool) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);
        // statements that change data must be POSTed
        let request = if mutating {
            self.client.post(&url)
        } else {
            self.client.get(&url)
        };

        let response = request
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(result) = data.results.first() {
            if let Some(error) = &result.error {
                anyhow::bail!("InfluxDB query error: {}", error);
            }
        }

        Ok(data)
    }
}

/// Line protocol for one reading, millisecond precision.
fn line_protocol(reading: &Reading) -> String {
    format!(
        "{},channel={} temperature={},raw_temperature={} {}",
        MEASUREMENT,
        reading.channel,
        reading.calibrated_temperature,
        reading.raw_temperature,
        reading.timestamp.timestamp_millis()
    )
}

fn time_literal(ts: &DateTime<Local>) -> String {
    ts.to_utc().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn column(series: &InfluxQLSeries, names: &[&str], fallback: usize) -> usize {
    series
        .columns
        .iter()
        .position(|c| names.contains(&c.as_str()))
        .unwrap_or(fallback)
}

/// Converts series rows to records. The channel comes from a `channel`
/// column when selected, otherwise from the series tags.
fn records_from_response(response: &InfluxQLResponse) -> Vec<StorageRecord> {
    let mut records = Vec::new();
    let Some(result) = response.results.first() else {
        return records;
    };
    let Some(series_list) = &result.series else {
        return records;
    };

    for series in series_list {
        let time_idx = column(series, &["time"], 0);
        let value_idx = column(series, &["temperature", "last", "value"], 1);
        let channel_idx = series.columns.iter().position(|c| c == "channel");
        let tag_channel = series
            .tags
            .as_ref()
            .and_then(|tags| tags.get("channel"))
            .and_then(|c| c.parse::<ChannelId>().ok());

        for row in &series.values {
            let time = row
                .get(time_idx)
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
            let value = row.get(value_idx).and_then(|v| v.as_f64());
            let channel = channel_idx
                .and_then(|idx| row.get(idx))
                .and_then(|v| v.as_str().and_then(|s| s.parse::<ChannelId>().ok()))
                .or(tag_channel);

            if let (Some(time), Some(value), Some(channel)) = (time, value, channel) {
                records.push(StorageRecord::new(
                    None,
                    time.with_timezone(&Local),
                    channel,
                    value,
                ));
            }
        }
    }

    records
}

#[async_trait]
impl StructuredStore for InfluxStore {
    fn name(&self) -> &str {
        "influx"
    }

    async fn insert(&self, reading: &Reading) -> Result<()> {
        let response = self
            .client
            .post(self.build_write_url())
            .header("Authorization", format!("Token {}", self.token))
            .body(line_protocol(reading))
            .send()
            .await
            .context("Failed to send write to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB write failed with status {}: {}", status, body);
        }
        Ok(())
    }

    async fn query_latest(&self) -> Result<Vec<StorageRecord>> {
        let query = format!(
            "SELECT LAST(\"temperature\") AS \"temperature\" FROM \"{}\" GROUP BY \"channel\"",
            MEASUREMENT
        );
        let response = self.execute_query(&query, false).await?;
        let mut records = records_from_response(&response);
        records.sort_by_key(|r| r.channel);
        Ok(records)
    }

    async fn query_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
    ) -> Result<Vec<StorageRecord>> {
        let mut query = format!(
            "SELECT \"temperature\", \"channel\" FROM \"{}\" WHERE time >= '{}' AND time <= '{}'",
            MEASUREMENT,
            time_literal(&start),
            time_literal(&end)
        );
        if let Some(channel) = channel {
            query.push_str(&format!(" AND \"channel\" = '{}'", channel));
        }

        tracing::debug!("Executing range query: {}", query);
        let response = self.execute_query(&query, false).await?;
        let mut records = records_from_response(&response);
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn clear(&self) -> Result<()> {
        let query = format!("DROP MEASUREMENT \"{}\"", MEASUREMENT);
        match self.execute_query(&query, true).await {
            Ok(_) => Ok(()),
            // nothing written yet
            Err(e) if e.to_string().contains("measurement not found") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn storage_info(&self) -> Result<StorageInfo> {
        let query = format!("SELECT COUNT(\"temperature\") FROM \"{}\"", MEASUREMENT);
        let response = self.execute_query(&query, false).await?;

        let record_count = response
            .results
            .first()
            .and_then(|r| r.series.as_ref())
            .and_then(|s| s.first())
            .and_then(|s| {
                let idx = column(s, &["count"], 1);
                s.values.first().and_then(|row| row.get(idx)).and_then(|v| v.as_u64())
            })
            .unwrap_or(0);

        Ok(StorageInfo {
            backend: "InfluxDB".to_string(),
            location: format!("{}/{}", self.host, self.database),
            record_count,
            size_bytes: None,
        })
    }

    async fn disconnect(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_line_protocol() {
        let ts = Local.timestamp_millis_opt(1_705_314_600_123).unwrap();
        let reading = Reading::new(3, 21.25, 21.5, ts);
        assert_eq!(
            line_protocol(&reading),
            "readings,channel=3 temperature=21.5,raw_temperature=21.25 1705314600123"
        );
    }

    #[test]
    fn test_query_url_encodes_statement() {
        let store = InfluxStore::new(&InfluxSettings {
            host: "http://influx:8086/".to_string(),
            ..InfluxSettings::default()
        })
        .unwrap();
        let url = store.build_query_url("SELECT * FROM \"readings\"");
        assert_eq!(
            url,
            "http://influx:8086/query?db=datalogger&rp=autogen&q=SELECT%20%2A%20FROM%20%22readings%22"
        );
        assert_eq!(
            store.build_write_url(),
            "http://influx:8086/write?db=datalogger&rp=autogen&precision=ms"
        );
    }

    #[test]
    fn test_database_and_policy_are_encoded_in_both_urls() {
        let store = InfluxStore::new(&InfluxSettings {
            database: "kiln logs".to_string(),
            retention_policy: "a&b".to_string(),
            ..InfluxSettings::default()
        })
        .unwrap();
        assert_eq!(
            store.build_query_url("SHOW MEASUREMENTS"),
            "http://localhost:8086/query?db=kiln%20logs&rp=a%26b&q=SHOW%20MEASUREMENTS"
        );
        assert_eq!(
            store.build_write_url(),
            "http://localhost:8086/write?db=kiln%20logs&rp=a%26b&precision=ms"
        );
    }

    #[test]
    fn test_latest_rows_use_series_tags() {
        let body = r#"{"results":[{"statement_id":0,"series":[
            {"name":"readings","tags":{"channel":"1"},"columns":["time","temperature"],"values":[["2024-01-15T10:00:05Z",21.0]]},
            {"name":"readings","tags":{"channel":"2"},"columns":["time","temperature"],"values":[["2024-01-15T10:00:01Z",30.0]]}
        ]}]}"#;
        let response: InfluxQLResponse = serde_json::from_str(body).unwrap();
        let records = records_from_response(&response);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].channel, 1);
        assert_eq!(records[0].temperature, 21.0);
        assert_eq!(records[0].id, None);
        assert_eq!(records[1].channel, 2);
    }

    #[test]
    fn test_range_rows_use_channel_column() {
        let body = r#"{"results":[{"statement_id":0,"series":[
            {"name":"readings","columns":["time","temperature","channel"],"values":[
                ["2024-01-15T10:00:00Z",20.5,"4"],
                ["2024-01-15T10:00:05Z",null,"4"],
                ["2024-01-15T10:00:10Z",20.7,"5"]
            ]}
        ]}]}"#;
        let response: InfluxQLResponse = serde_json::from_str(body).unwrap();
        let records = records_from_response(&response);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].channel, 4);
        assert_eq!(records[1].channel, 5);
        assert_eq!(records[1].temperature, 20.7);
    }

    #[test]
    fn test_empty_result_yields_no_records() {
        let response: InfluxQLResponse =
            serde_json::from_str(r#"{"results":[{"statement_id":0}]}"#).unwrap();
        assert!(records_from_response(&response).is_empty());
    }
}
