/// Push readings to a Prometheus push gateway
///
/// Every reading becomes one `POST <base>/<display name>` with the
/// exposition body. Pushes run on their own task and are never retried.
use log::{debug, info, warn};
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::error::PushError;
use crate::metrics::{format_reading, MetricsEmitter};
use crate::models::Reading;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Debug, Clone)]
pub struct PushgatewayEmitter {
    client: Client,
    base_url: Url,
}

impl PushgatewayEmitter {
    /// Create an emitter pushing below `base_url`, e.g. `http://host:9091/metrics/job`
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, PushError> {
        if base_url.cannot_be_a_base() {
            return Err(PushError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Client(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// URL a given sensor's metrics are pushed to
    pub fn job_url(&self, display_name: &str) -> Result<Url, PushError> {
        job_url(&self.base_url, display_name)
    }
}

impl MetricsEmitter for PushgatewayEmitter {
    fn emit(&self, display_name: &str, reading: &Reading) {
        let url = match self.job_url(display_name) {
            Ok(url) => url,
            Err(e) => {
                warn!("Dropping {:?} reading for {}: {}", reading.family(), display_name, e);
                return;
            }
        };
        let body = format_reading(display_name, reading);
        debug!("Metrics for {}:\n{}", display_name, body);

        let client = self.client.clone();
        let display_name = display_name.to_string();
        tokio::spawn(async move {
            match push_metrics(&client, url, body).await {
                Ok(()) => info!("Metrics for {} pushed successfully", display_name),
                Err(e) => warn!("Error pushing metrics for {}: {}", display_name, e),
            }
        });
    }
}

/// Append the display name to the base path as a single encoded segment
pub fn job_url(base_url: &Url, display_name: &str) -> Result<Url, PushError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| PushError::InvalidUrl(base_url.to_string()))?
        .pop_if_empty()
        .push(display_name);
    Ok(url)
}

/// POST an exposition body and check the response status
pub async fn push_metrics(client: &Client, url: Url, body: String) -> Result<(), PushError> {
    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
        .body(body)
        .send()
        .await
        .map_err(|e| PushError::Request(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(PushError::Response {
            status: status.as_u16(),
            body,
        });
    }

    Ok(())
}
