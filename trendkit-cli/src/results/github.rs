// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{collections::BTreeSet, fs, path::Path};

use log::{debug, trace, warn};
use reqwest::{Client, header};
use serde::Deserialize;

use crate::errors::UploadResultsError;

use super::{RemoteApiDetailedError, RemoteApiError, ResultWithContext as _, http_client, join_url};

const STATUSES_PER_PAGE: usize = 100;

#[derive(Deserialize, Debug, Clone)]
pub struct CommitStatus {
    pub context: String,
    pub state: String,
    pub target_url: Option<String>,
}

pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
    client: Client,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: Option<String>) -> Result<GitHubClient, RemoteApiDetailedError> {
        Ok(GitHubClient {
            api_url: String::from(api_url),
            token,
            client: http_client()?,
        })
    }

    /// Every commit status reported against `git_ref`, following pagination until a short page.
    pub async fn commit_statuses(
        &self,
        repo_name: &str,
        git_ref: &str,
    ) -> Result<Vec<CommitStatus>, RemoteApiDetailedError> {
        let mut url = join_url(&self.api_url, "repos").context("building commit statuses URL")?;
        // each piece is pushed as its own segment, so characters like `#` or `?` in a ref are percent-encoded
        match url.path_segments_mut() {
            Ok(mut segments) => {
                segments
                    .pop_if_empty()
                    .extend(repo_name.split('/'))
                    .extend(["commits", git_ref, "statuses"]);
            }
            Err(()) => {
                return Err(RemoteApiError::InvalidUrl(
                    url::ParseError::RelativeUrlWithCannotBeABaseBase,
                ))
                .context("building commit statuses URL");
            }
        }

        let mut statuses = Vec::new();
        for page in 1.. {
            url.query_pairs_mut()
                .clear()
                .append_pair("per_page", &STATUSES_PER_PAGE.to_string())
                .append_pair("page", &page.to_string());
            debug!("HTTP request GET {url}");

            let mut request = self
                .client
                .get(url.clone())
                .header(header::ACCEPT, "application/vnd.github+json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .context("sending request for commit statuses")?;

            debug!("HTTP response: {response:?}");
            if !response.status().is_success() {
                return Err(RemoteApiError::UnexpectedStatus(response.status()))
                    .context("reading response for commit statuses");
            }

            let body = response
                .json::<Vec<CommitStatus>>()
                .await
                .context("parsing response body for commit statuses")?;
            trace!("HTTP response deserialized: {body:?}");

            let last_page = body.len() < STATUSES_PER_PAGE;
            statuses.extend(body);
            if last_page {
                break;
            }
        }
        Ok(statuses)
    }
}

/// Task group identifiers of every finished CI run among `statuses`, sorted and without duplicates.
///
/// A run counts when its status context starts with `context_prefix` and it is no longer `pending`; the task group is
/// the last path segment of the status' target URL.
#[must_use]
pub fn completed_task_groups(statuses: &[CommitStatus], context_prefix: &str) -> Vec<String> {
    statuses
        .iter()
        .filter(|status| status.context.starts_with(context_prefix) && status.state != "pending")
        .filter_map(|status| {
            let group = status
                .target_url
                .as_deref()
                .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
                .unwrap_or_default();
            if group.is_empty() {
                warn!("status {:?} has no task group in its target URL; ignoring", status.context);
                None
            } else {
                Some(String::from(group))
            }
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn read_token_file(path: &Path) -> Result<String, UploadResultsError> {
    let token = fs::read_to_string(path).map_err(|error| UploadResultsError::TokenFile {
        path: path.display().to_string(),
        error,
    })?;
    Ok(String::from(token.trim()))
}
