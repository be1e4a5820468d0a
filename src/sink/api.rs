use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{RecordSink, SinkError, SinkOutcome};
use crate::config::SinkConfig;
use crate::models::{FieldKey, ProfileRecord};

const API_KEY_HEADER: &str = "X-API-KEY";

/// Flat JSON body in the shape the receiving API expects.
#[derive(Debug, Serialize)]
pub struct ApiPayload<'a> {
    name: &'a str,
    samune: &'a str,
    url: &'a str,
    oneword: &'a str,
    #[serde(flatten)]
    fields: &'a BTreeMap<FieldKey, String>,
}

impl<'a> From<&'a ProfileRecord> for ApiPayload<'a> {
    fn from(record: &'a ProfileRecord) -> Self {
        Self {
            name: &record.name,
            samune: record.thumbnail_url.as_deref().unwrap_or(""),
            url: &record.detail_url,
            oneword: record.one_line_comment.as_deref().unwrap_or(""),
            fields: &record.fields,
        }
    }
}

pub struct ApiSink {
    client: reqwest::Client,
    url: String,
    key: String,
}

impl ApiSink {
    pub fn new(url: &str, key: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            key: key.to_string(),
        })
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        let url = config
            .api_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SinkError::Config("sink.api_url is not set".to_string()))?;
        let key = config
            .api_key
            .as_deref()
            .ok_or_else(|| SinkError::Config("sink.api_key is not set".to_string()))?;
        Self::new(url, key, Duration::from_secs(config.api_timeout_secs))
    }
}

#[async_trait]
impl RecordSink for ApiSink {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn submit(&self, record: &ProfileRecord) -> Result<SinkOutcome, SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.key)
            .json(&ApiPayload::from(record))
            .send()
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(SinkOutcome::Stored)
    }
}
