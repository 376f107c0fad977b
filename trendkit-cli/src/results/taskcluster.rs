// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use log::{debug, info, trace};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{Instrument as _, info_span};

use crate::{cmd::ui::UiStage, util::spawn_limited_concurrency};

use super::{
    ArtifactKind, CollectedArtifact, CollectedArtifacts, RemoteApiDetailedError, RemoteApiError,
    ResultWithContext as _, http_client, join_url,
};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TaskGroupListing {
    tasks: Vec<TaskGroupEntry>,
    continuation_token: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TaskGroupEntry {
    pub status: TaskStatus,
    pub task: TaskDefinition,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_id: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TaskDefinition {
    pub metadata: TaskMetadata,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TaskMetadata {
    pub name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ArtifactListing {
    artifacts: Vec<Artifact>,
    continuation_token: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Artifact {
    pub name: String,
}

trait Paginated {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Paginated for TaskGroupListing {
    type Item = TaskGroupEntry;
    fn into_parts(self) -> (Vec<TaskGroupEntry>, Option<String>) {
        (self.tasks, self.continuation_token)
    }
}

impl Paginated for ArtifactListing {
    type Item = Artifact;
    fn into_parts(self) -> (Vec<Artifact>, Option<String>) {
        (self.artifacts, self.continuation_token)
    }
}

pub struct TaskClusterClient {
    queue_url: String,
    client: Client,
}

impl TaskClusterClient {
    pub fn new(queue_url: &str) -> Result<TaskClusterClient, RemoteApiDetailedError> {
        Ok(TaskClusterClient {
            queue_url: String::from(queue_url.trim_end_matches('/')),
            client: http_client()?,
        })
    }

    async fn get_all<T>(&self, path: &str, what: &str) -> Result<Vec<T::Item>, RemoteApiDetailedError>
    where
        T: Paginated + DeserializeOwned + std::fmt::Debug,
    {
        let base = join_url(&self.queue_url, path).context("building queue URL")?;
        let mut items = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut url = base.clone();
            if let Some(token) = &continuation_token {
                url.query_pairs_mut()
                    .append_pair("continuationToken", token);
            }
            debug!("HTTP request GET {url}");
            let response = self
                .client
                .get(url)
                .send()
                .await
                .context(&format!("sending request for {what}"))?;

            debug!("HTTP response: {response:?}");
            if !response.status().is_success() {
                return Err(RemoteApiError::UnexpectedStatus(response.status()))
                    .context(&format!("reading response for {what}"));
            }

            let body = response
                .json::<T>()
                .await
                .context(&format!("parsing response body for {what}"))?;
            trace!("HTTP response deserialized: {body:?}");

            let (page, next) = body.into_parts();
            items.extend(page);
            match next {
                Some(token) if !token.is_empty() => continuation_token = Some(token),
                _ => break,
            }
        }
        Ok(items)
    }

    pub async fn task_group_tasks(
        &self,
        task_group: &str,
    ) -> Result<Vec<TaskGroupEntry>, RemoteApiDetailedError> {
        self.get_all::<TaskGroupListing>(&format!("task-group/{task_group}/list"), "task group listing")
            .await
    }

    pub async fn task_artifacts(&self, task_id: &str) -> Result<Vec<Artifact>, RemoteApiDetailedError> {
        self.get_all::<ArtifactListing>(&self.artifacts_path(task_id), "task artifacts")
            .await
    }

    fn artifacts_path(&self, task_id: &str) -> String {
        format!("task/{task_id}/artifacts")
    }

    /// Public download URL of a task's artifact.
    #[must_use]
    pub fn artifact_url(&self, task_id: &str, artifact_name: &str) -> String {
        format!(
            "{}/{}/{artifact_name}",
            self.queue_url,
            self.artifacts_path(task_id)
        )
    }
}

/// Lists the tasks of each task group, then the artifacts of every task whose name contains `filter_artifact` (all
/// tasks when `None`), keeping the result and screenshot artifacts.
///
/// Artifact listings are requested with up to `jobs` in flight; the returned artifacts are ordered by task group, then
/// task listing order, then artifact listing order, regardless of which request finished first.
pub async fn collect_artifacts(
    client: &TaskClusterClient,
    task_groups: &[String],
    filter_artifact: Option<&str>,
    jobs: usize,
) -> Result<CollectedArtifacts, RemoteApiDetailedError> {
    let mut tasks = Vec::new();
    for task_group in task_groups {
        let entries = client
            .task_group_tasks(task_group)
            .instrument(info_span!(
                "list_task_group",
                ui_stage = Into::<u64>::into(UiStage::ListTaskGroup),
                task_group = task_group.as_str(),
            ))
            .await?;
        for entry in entries {
            let name = entry.task.metadata.name;
            if let Some(filter) = filter_artifact {
                if !name.contains(filter) {
                    debug!("Skipping artifacts for {name}");
                    continue;
                }
            }
            tasks.push((entry.status.task_id, name));
        }
    }

    let futures = tasks
        .iter()
        .enumerate()
        .map(|(index, (task_id, name))| async move {
            info!("Collecting artifacts for {name}");
            let artifacts = client
                .task_artifacts(task_id)
                .instrument(info_span!(
                    "list_task_artifacts",
                    ui_stage = Into::<u64>::into(UiStage::ListTaskArtifacts),
                    task_name = name.as_str(),
                ))
                .await;
            (index, artifacts)
        })
        .collect::<Vec<_>>();

    let mut listings = spawn_limited_concurrency(jobs, futures)
        .instrument(info_span!(
            "collect_artifacts",
            ui_stage = Into::<u64>::into(UiStage::CollectArtifacts),
            task_count = tasks.len(),
        ))
        .await;
    listings.sort_by_key(|(index, _)| *index);

    let mut collected = CollectedArtifacts::default();
    for (index, artifacts) in listings {
        let (task_id, name) = &tasks[index];
        for artifact in artifacts? {
            if let Some(kind) = ArtifactKind::from_artifact_name(&artifact.name) {
                collected.push(CollectedArtifact {
                    kind,
                    task_name: name.clone(),
                    url: client.artifact_url(task_id, &artifact.name),
                });
            }
        }
    }
    Ok(collected)
}
