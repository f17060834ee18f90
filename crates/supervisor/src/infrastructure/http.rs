//! Blocking HTTP adapters for the pod's web endpoints.

use std::time::Duration;

use api_types::TrainingStatusResponse;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::blocking::Client as BlockingClient;
use reqwest::StatusCode;
use tracing::debug;

use crate::domain::traits::HttpProbe;
use crate::domain::traits::StatusSource;
use crate::error::StatusError;

/// User name the pod's proxy expects for basic auth
pub const BASIC_AUTH_USER: &str = "kasm_user";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(timeout: Duration) -> Result<BlockingClient, reqwest::Error> {
    BlockingClient::builder().timeout(timeout).build()
}

/// Polls `GET {base}/is_training`
pub struct StatusClient {
    http: BlockingClient,
    url: String,
    password: String,
}

impl StatusClient {
    pub fn new(
        base_url: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, Report<StatusError>> {
        let http = build_client(timeout).change_context(StatusError::Transport {
            message: "Failed to create HTTP client".to_string(),
        })?;
        Ok(Self {
            http,
            url: format!("{}/is_training", base_url.trim_end_matches('/')),
            password: password.to_string(),
        })
    }
}

impl StatusSource for StatusClient {
    fn is_training(&self) -> Result<bool, Report<StatusError>> {
        let response = self
            .http
            .get(&self.url)
            .basic_auth(BASIC_AUTH_USER, Some(&self.password))
            .send()
            .map_err(|e| {
                Report::new(StatusError::Transport {
                    message: e.to_string(),
                })
            })
            .attach_printable_lazy(|| format!("url: {}", self.url))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Report::new(StatusError::UnexpectedStatus {
                status: status.as_u16(),
            }));
        }

        let body: TrainingStatusResponse = response.json().map_err(|e| {
            Report::new(StatusError::Protocol {
                message: e.to_string(),
            })
        })?;
        debug!(training = body.training, "Training status");
        Ok(body.training)
    }
}

/// `GET` probe with the pod's basic auth credentials
pub struct BasicAuthProbe {
    http: BlockingClient,
    password: String,
}

impl BasicAuthProbe {
    pub fn new(password: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: build_client(timeout)?,
            password: password.to_string(),
        })
    }
}

impl HttpProbe for BasicAuthProbe {
    fn is_reachable(&self, url: &str) -> bool {
        match self
            .http
            .get(url)
            .basic_auth(BASIC_AUTH_USER, Some(&self.password))
            .send()
        {
            Ok(response) => {
                debug!(%url, status = %response.status(), "Probe answered");
                response.status().is_success()
            }
            Err(e) => {
                debug!(%url, "Probe failed: {e}");
                false
            }
        }
    }
}
