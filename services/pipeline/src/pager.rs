//! Pager Client: notifies an external HTTP endpoint of a positive
//! prediction, with a bounded one-retry protocol (spec §4.6).

use crate::metrics::PAGER_REQUESTS_TOTAL;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(200);
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

pub struct PagerClient {
    client: reqwest::Client,
    url: String,
}

impl PagerClient {
    /// Build a client against `address`, applying the URL normalization
    /// rule from `original_source/ml/pager.py`: add an `http://` scheme if
    /// none is given, and append `/page` if the address doesn't already
    /// reference it.
    pub fn new(address: &str) -> Self {
        PagerClient {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client with fixed timeout always builds"),
            url: normalize_url(address),
        }
    }

    /// Notify the pager of a positive prediction for `identity` at
    /// `timestamp`. Retries exactly once, after a 2 second delay, if the
    /// first attempt is a `TransientFailure`.
    pub async fn notify(&self, identity: &str, timestamp: &str) -> PagerOutcome {
        let first = self.send_once(identity, timestamp).await;
        if first != PagerOutcome::TransientFailure {
            return first;
        }
        tracing::warn!(identity, "pager transient failure, retrying after delay");
        tokio::time::sleep(RETRY_DELAY).await;
        self.send_once(identity, timestamp).await
    }

    async fn send_once(&self, identity: &str, timestamp: &str) -> PagerOutcome {
        let body = format!("{identity},{timestamp}");
        let outcome = match self.client.post(&self.url).body(body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() == 200 {
                    PagerOutcome::Success
                } else if status.is_server_error() {
                    PagerOutcome::TransientFailure
                } else {
                    PagerOutcome::PermanentFailure
                }
            }
            Err(_) => PagerOutcome::TransientFailure,
        };
        let label = match outcome {
            PagerOutcome::Success => "success",
            PagerOutcome::TransientFailure | PagerOutcome::PermanentFailure => "error",
        };
        PAGER_REQUESTS_TOTAL.with_label_values(&[label]).inc();
        outcome
    }
}

fn normalize_url(address: &str) -> String {
    let with_scheme = if address.contains("://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    };
    if with_scheme.ends_with("/page") {
        with_scheme
    } else {
        format!("{with_scheme}/page")
    }
}
