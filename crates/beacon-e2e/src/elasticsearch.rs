//! [`EventStore`] backed by the Elasticsearch `_count` API

use std::time::Duration;

use async_trait::async_trait;
use beacon_common::Error;
use serde::Deserialize;
use tracing::debug;

use crate::config::ElasticsearchConfig;
use crate::validation::EventStore;

const SYSTEM: &str = "elasticsearch";

/// Per-request timeout; retries are the caller's business
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Counts documents with query-string queries
#[derive(Debug, Clone)]
pub struct ElasticsearchEvents {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchEvents {
    /// Build a client for the given cluster
    pub fn new(config: ElasticsearchConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::external(SYSTEM, format!("failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(client: reqwest::Client, config: ElasticsearchConfig) -> Self {
        Self { client, config }
    }
}

fn count_url(base: &str, index: &str) -> String {
    format!("{}/{}/_count", base.trim_end_matches('/'), index)
}

#[async_trait]
impl EventStore for ElasticsearchEvents {
    async fn count(&self, index: &str, query: &str) -> Result<u64, Error> {
        let url = count_url(&self.config.url, index);
        let mut request = self.client.get(&url).query(&[("q", query)]);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await.map_err(|e| {
            let msg = format!("request to {} failed: {}", url, e);
            if e.is_connect() || e.is_timeout() {
                Error::unavailable(SYSTEM, msg)
            } else {
                Error::external(SYSTEM, msg)
            }
        })?;
        if !response.status().is_success() {
            return Err(Error::external(
                SYSTEM,
                format!("{} returned HTTP {}", url, response.status()),
            ));
        }

        let body: CountResponse = response
            .json()
            .await
            .map_err(|e| Error::external(SYSTEM, format!("invalid count response: {}", e)))?;
        debug!(index = %index, query = %query, count = body.count, "counted events");
        Ok(body.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_url_joins_base_and_index() {
        assert_eq!(
            count_url("https://es.e2e.svc:9200/", "metricbeat-*"),
            "https://es.e2e.svc:9200/metricbeat-*/_count"
        );
        assert_eq!(count_url("http://localhost:9200", "filebeat-*"), "http://localhost:9200/filebeat-*/_count");
    }

    #[test]
    fn count_response_ignores_shard_details() {
        let body: CountResponse = serde_json::from_str(
            r#"{"count":42,"_shards":{"total":1,"successful":1,"skipped":0,"failed":0}}"#,
        )
        .unwrap();
        assert_eq!(body.count, 42);
    }

    #[tokio::test]
    async fn unreachable_cluster_is_retryable() {
        let events = ElasticsearchEvents::new(ElasticsearchConfig {
            url: "http://127.0.0.1:1".to_string(),
            username: None,
            password: None,
        })
        .unwrap();
        let err = events.count("metricbeat-*", "agent.type:metricbeat").await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("elasticsearch"));
    }
}
