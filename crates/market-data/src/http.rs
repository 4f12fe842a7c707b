use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use trade_core::DataError;

const MAX_ATTEMPTS: u32 = 3;

pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Send a request, retrying on HTTP 429 with a linear backoff.
pub(crate) async fn send_request(
    client: &Client,
    builder: RequestBuilder,
    source: &str,
) -> Result<Response, DataError> {
    let request = builder.build().map_err(|e| DataError::Http(e.to_string()))?;

    for attempt in 1..=MAX_ATTEMPTS {
        let req_clone = request
            .try_clone()
            .ok_or_else(|| DataError::Http("Cannot clone request".to_string()))?;
        let response = client.execute(req_clone).await.map_err(|e| {
            if e.is_timeout() {
                DataError::Timeout(format!("{}: {}", source, e))
            } else {
                DataError::Http(format!("{}: {}", source, e))
            }
        })?;

        if response.status().as_u16() != 429 {
            return Ok(response);
        }

        let wait = Duration::from_millis(1500 * attempt as u64);
        tracing::warn!(
            "{} rate limited, waiting {:.1}s before retry {}/{}",
            source,
            wait.as_secs_f64(),
            attempt,
            MAX_ATTEMPTS
        );
        tokio::time::sleep(wait).await;
    }

    Err(DataError::Http(format!(
        "{}: rate limited after {} attempts",
        source, MAX_ATTEMPTS
    )))
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    builder: RequestBuilder,
    source: &str,
) -> Result<T, DataError> {
    let response = send_request(client, builder, source).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DataError::Http(format!(
            "{}: HTTP {}: {}",
            source,
            status,
            response.text().await.unwrap_or_default()
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| DataError::Decode(format!("{}: {}", source, e)))
}
