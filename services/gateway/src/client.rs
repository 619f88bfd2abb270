//! Client for the grades service.

use std::time::Duration;

use shared::http::{retry_with_backoff, AttemptError, HttpClient, RemoteCallError, RetryConfig};
use shared::types::AggregateResult;
use tracing::{debug, error, info};

use crate::config::ServiceBConfig;

pub struct GradeClient {
    http: HttpClient,
    retry: RetryConfig,
    health_timeout: Duration,
}

impl GradeClient {
    pub fn new(http: HttpClient, retry: RetryConfig, health_timeout: Duration) -> Self {
        Self {
            http,
            retry,
            health_timeout,
        }
    }

    pub fn from_config(config: &ServiceBConfig) -> anyhow::Result<Self> {
        let http = HttpClient::new(
            &config.base_url,
            config.connect_timeout(),
            config.response_timeout(),
        )?;
        Ok(Self::new(http, config.retry_config()?, config.health_timeout()))
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Fetches the aggregate for `course_name`, retrying transient failures.
    ///
    /// A 2xx body that does not decode, or decodes to a result that breaks
    /// the contract or names another course, is a protocol failure and is not
    /// retried.
    pub async fn fetch_average_grade(
        &self,
        course_name: &str,
    ) -> Result<AggregateResult, RemoteCallError> {
        info!(course = %course_name, "Requesting average grade");

        let url = self
            .http
            .url(&["api", "grades", "average", course_name])
            .map_err(RemoteCallError::terminal)?;

        let outcome = retry_with_backoff(&self.retry, "average_grade", |attempt| {
            let url = url.clone();
            async move {
                debug!(course = %course_name, attempt, "Calling grades service");
                let result: AggregateResult = self.http.get_json(url).await?;
                result
                    .validate_for(course_name)
                    .map_err(|violation| AttemptError::Malformed(violation.to_string()))?;
                Ok(result)
            }
        })
        .await;

        match &outcome {
            Ok(result) => info!(
                course = %course_name,
                processing_time_ms = result.processing_time_ms(),
                "Received average grade"
            ),
            Err(e) => error!(
                course = %course_name,
                kind = e.kind(),
                error = %e,
                "Failed to fetch average grade"
            ),
        }
        outcome
    }

    /// Single liveness probe against the grades service, no retries.
    pub async fn check_health(&self) -> Result<String, AttemptError> {
        let url = self.http.url(&["api", "grades", "health"])?;
        match self.http.get_text(url, self.health_timeout).await {
            Ok(body) => {
                info!("Service B health check: OK");
                Ok(body)
            }
            Err(e) => {
                error!(error = %e, "Service B health check: FAILED");
                Err(e)
            }
        }
    }
}
