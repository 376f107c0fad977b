// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, StatusCode};

use crate::errors::UploadResultsError;

use super::{CollectedArtifacts, RemoteApiDetailedError, ResultWithContext as _, http_client, join_url};

const UPLOAD_RETRIES: u8 = 3;
const ACCEPTED_MARKER: &str = "added to queue";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Response body as returned by the results server, eg. `Task 4920384 added to queue`.
    pub message: String,
    pub run_id: Option<String>,
}

impl UploadReceipt {
    fn from_response_body(body: String) -> Result<UploadReceipt, UploadResultsError> {
        if !body.contains(ACCEPTED_MARKER) {
            return Err(UploadResultsError::UnexpectedResponse(body));
        }
        let run_id = body.split_whitespace().nth(1).map(String::from);
        Ok(UploadReceipt {
            message: body,
            run_id,
        })
    }
}

/// Where the progress of an accepted upload can be followed.
#[must_use]
pub fn status_url(server_url: &str, run_id: &str) -> String {
    format!("{}/results/?run_id={run_id}", server_url.trim_end_matches('/'))
}

pub struct ResultsServerClient {
    server_url: String,
    user: String,
    password: String,
    retry_delay: Duration,
    client: Client,
}

impl ResultsServerClient {
    pub fn new(
        server_url: &str,
        user: &str,
        password: &str,
    ) -> Result<ResultsServerClient, RemoteApiDetailedError> {
        Ok(ResultsServerClient {
            server_url: String::from(server_url),
            user: String::from(user),
            password: String::from(password),
            retry_delay: Duration::from_secs(2),
            client: http_client()?,
        })
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Submit the artifact URLs as a form to the server's upload endpoint.  Server errors (5xx) are retried a few times;
    /// any other status besides 200 rejects the upload.
    pub async fn upload(&self, artifacts: &CollectedArtifacts) -> Result<UploadReceipt, UploadResultsError> {
        self.internal_upload(artifacts, UPLOAD_RETRIES).await
    }

    async fn internal_upload(
        &self,
        artifacts: &CollectedArtifacts,
        retries_available: u8,
    ) -> Result<UploadReceipt, UploadResultsError> {
        Box::pin(async move {
            let url = join_url(&self.server_url, "api/results/upload")
                .context("building results upload URL")?;
            debug!("HTTP request POST {url}");

            let response = self
                .client
                .post(url)
                .basic_auth(&self.user, Some(&self.password))
                .form(&artifacts.form_fields())
                .send()
                .await
                .context("sending request for results upload")?;

            debug!("HTTP response: {response:?}");
            let status = response.status();
            if status.is_server_error() && retries_available > 0 {
                warn!(
                    "HTTP response {status} received from results server; retrying in {:?}",
                    self.retry_delay
                );
                tokio::time::sleep(self.retry_delay).await;
                return self.internal_upload(artifacts, retries_available - 1).await;
            }

            let body = response
                .text()
                .await
                .context("reading response body for results upload")?;
            if status != StatusCode::OK {
                return Err(UploadResultsError::UploadRejected {
                    status: status.as_u16(),
                    body,
                });
            }
            UploadReceipt::from_response_body(body)
        })
        .await
    }
}
