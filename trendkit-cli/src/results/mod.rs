// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument as _, info_span};

use crate::{cmd::ui::UiStage, errors::UploadResultsError};

pub mod github;
pub mod server;
pub mod taskcluster;

pub use github::{CommitStatus, GitHubClient, completed_task_groups, read_token_file};
pub use server::{ResultsServerClient, UploadReceipt, status_url};
pub use taskcluster::{TaskClusterClient, collect_artifacts};

pub const DEFAULT_SERVER_URL: &str = "https://staging.wpt.fyi";
pub const DEFAULT_REPO_NAME: &str = "web-platform-tests/wpt";
pub const DEFAULT_GIT_REF: &str = "master";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_QUEUE_URL: &str = "https://queue.taskcluster.net/v1";
pub const DEFAULT_STATUS_CONTEXT_PREFIX: &str = "Taskcluster ";
pub const MANIFEST_FILE_NAME: &str = "artifacts.csv";

pub(crate) fn http_client() -> Result<reqwest::Client, RemoteApiDetailedError> {
    reqwest::ClientBuilder::new()
        .zstd(true)
        .gzip(true)
        .user_agent(format!("trendkit ({})", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .context("building HTTP client")
}

/// Joins `path` onto a configured base URL, tolerating a trailing `/` on the base.
pub(crate) fn join_url(base: &str, path: &str) -> Result<url::Url, RemoteApiError> {
    Ok(url::Url::parse(&format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))?)
}

#[derive(Error, Debug)]
pub enum RemoteApiError {
    #[error("HTTP error: `{0}`")]
    Http(#[from] reqwest::Error),
    #[error("remote server returned unexpected status {0}")]
    UnexpectedStatus(reqwest::StatusCode),
    #[error("invalid URL: `{0}`")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Error, Debug)]
pub struct RemoteApiDetailedError {
    pub error: RemoteApiError,
    pub context: Option<String>,
}

impl fmt::Display for RemoteApiDetailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.error, context),
            None => write!(f, "{}", self.error),
        }
    }
}

impl From<RemoteApiError> for RemoteApiDetailedError {
    fn from(value: RemoteApiError) -> Self {
        RemoteApiDetailedError {
            error: value,
            context: None,
        }
    }
}

pub(crate) trait ResultWithContext<T> {
    fn context(self, context: &str) -> Result<T, RemoteApiDetailedError>;
}

impl<Res, Err> ResultWithContext<Res> for Result<Res, Err>
where
    Err: Into<RemoteApiError>,
{
    fn context(self, context: &str) -> Result<Res, RemoteApiDetailedError> {
        self.map_err(|e| RemoteApiDetailedError {
            error: e.into(),
            context: Some(String::from(context)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Result,
    Screenshot,
}

impl ArtifactKind {
    /// Classify an artifact by its name; `None` for artifacts that aren't uploaded.
    #[must_use]
    pub fn from_artifact_name(name: &str) -> Option<ArtifactKind> {
        if name.ends_with("wpt_report.json.gz") {
            Some(ArtifactKind::Result)
        } else if name.ends_with("wpt_screenshot.txt.gz") {
            Some(ArtifactKind::Screenshot)
        } else {
            None
        }
    }

    /// Form field the results server expects for this kind of artifact.
    #[must_use]
    pub fn field_name(self) -> &'static str {
        match self {
            ArtifactKind::Result => "result_url",
            ArtifactKind::Screenshot => "screenshot_url",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedArtifact {
    pub kind: ArtifactKind,
    pub task_name: String,
    pub url: String,
}

#[derive(Debug, Default)]
pub struct CollectedArtifacts {
    artifacts: Vec<CollectedArtifact>,
}

impl CollectedArtifacts {
    pub fn push(&mut self, artifact: CollectedArtifact) {
        self.artifacts.push(artifact);
    }

    #[must_use]
    pub fn artifacts(&self) -> &[CollectedArtifact] {
        &self.artifacts
    }

    fn count(&self, kind: ArtifactKind) -> usize {
        self.artifacts.iter().filter(|a| a.kind == kind).count()
    }

    #[must_use]
    pub fn result_count(&self) -> usize {
        self.count(ArtifactKind::Result)
    }

    #[must_use]
    pub fn screenshot_count(&self) -> usize {
        self.count(ArtifactKind::Screenshot)
    }

    /// The `(field, url)` pairs posted to the results server, in collection order.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, &str)> {
        self.artifacts
            .iter()
            .map(|a| (a.kind.field_name(), a.url.as_str()))
            .collect()
    }
}

pub struct UploadOptions {
    pub git_ref: String,
    pub repo_name: String,
    pub user: String,
    pub password: String,
    pub server_url: String,
    pub filter_artifact: Option<String>,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub queue_url: String,
    pub status_context_prefix: String,
    pub out_dir: PathBuf,
    pub jobs: usize,
}

pub struct UploadOutcome {
    pub artifacts: CollectedArtifacts,
    pub receipt: UploadReceipt,
}

fn prepare_out_dir(out_dir: &Path) -> Result<(), UploadResultsError> {
    if !fs::exists(out_dir)? {
        debug!("creating output directory {}", out_dir.display());
        fs::create_dir_all(out_dir)?;
    }
    Ok(())
}

pub fn write_manifest(
    out_dir: &Path,
    artifacts: &CollectedArtifacts,
) -> Result<PathBuf, UploadResultsError> {
    let path = out_dir.join(MANIFEST_FILE_NAME);
    let mut wtr = csv::Writer::from_path(&path)?;
    for artifact in artifacts.artifacts() {
        wtr.serialize(artifact)?;
    }
    wtr.flush()?;
    Ok(path)
}

/// Find the completed CI runs for a commit, gather their result artifacts, and submit them to the results server.
pub async fn upload_results(options: &UploadOptions) -> Result<UploadOutcome, UploadResultsError> {
    prepare_out_dir(&options.out_dir)?;

    let github = GitHubClient::new(&options.github_api_url, options.github_token.clone())?;
    let statuses = github
        .commit_statuses(&options.repo_name, &options.git_ref)
        .instrument(info_span!(
            "find_task_groups",
            ui_stage = Into::<u64>::into(UiStage::FindTaskGroups),
        ))
        .await?;
    let task_groups = completed_task_groups(&statuses, &options.status_context_prefix);
    if task_groups.is_empty() {
        return Err(UploadResultsError::NoCompletedRuns(options.git_ref.clone()));
    }
    debug!("completed task groups: {task_groups:?}");

    let taskcluster = TaskClusterClient::new(&options.queue_url)?;
    let artifacts = collect_artifacts(
        &taskcluster,
        &task_groups,
        options.filter_artifact.as_deref(),
        options.jobs,
    )
    .await?;

    let manifest = write_manifest(&options.out_dir, &artifacts)?;
    debug!("wrote artifact manifest to {}", manifest.display());

    if artifacts.result_count() == 0 {
        return Err(UploadResultsError::NoResultArtifacts);
    }
    info!(
        "Sending a total of {} results and {} screenshots to {}",
        artifacts.result_count(),
        artifacts.screenshot_count(),
        options.server_url
    );

    let server = ResultsServerClient::new(&options.server_url, &options.user, &options.password)?;
    let receipt = server
        .upload(&artifacts)
        .instrument(info_span!(
            "upload_results",
            ui_stage = Into::<u64>::into(UiStage::UploadResults),
        ))
        .await?;

    Ok(UploadOutcome { artifacts, receipt })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use actix_test::TestServer;
    use actix_web::{App, HttpRequest, HttpResponse, http::StatusCode, web};
    use serde_json::json;

    use super::*;

    #[test]
    fn classify_artifacts() {
        assert_eq!(
            ArtifactKind::from_artifact_name("public/results/wpt_report.json.gz"),
            Some(ArtifactKind::Result)
        );
        assert_eq!(
            ArtifactKind::from_artifact_name("public/results/wpt_screenshot.txt.gz"),
            Some(ArtifactKind::Screenshot)
        );
        assert_eq!(
            ArtifactKind::from_artifact_name("public/logs/live_backing.log"),
            None
        );
    }

    #[test]
    fn form_fields_keep_order() {
        let mut artifacts = CollectedArtifacts::default();
        artifacts.push(CollectedArtifact {
            kind: ArtifactKind::Result,
            task_name: String::from("a"),
            url: String::from("https://q/a/report"),
        });
        artifacts.push(CollectedArtifact {
            kind: ArtifactKind::Screenshot,
            task_name: String::from("a"),
            url: String::from("https://q/a/screenshot"),
        });
        artifacts.push(CollectedArtifact {
            kind: ArtifactKind::Result,
            task_name: String::from("b"),
            url: String::from("https://q/b/report"),
        });
        assert_eq!(artifacts.result_count(), 2);
        assert_eq!(artifacts.screenshot_count(), 1);
        assert_eq!(
            artifacts.form_fields(),
            vec![
                ("result_url", "https://q/a/report"),
                ("screenshot_url", "https://q/a/screenshot"),
                ("result_url", "https://q/b/report"),
            ]
        );
    }

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(
            join_url("https://example.com/v1/", "/task/abc/artifacts")
                .unwrap()
                .as_str(),
            "https://example.com/v1/task/abc/artifacts"
        );
        assert!(join_url("not a url", "x").is_err());
    }

    #[test]
    fn manifest_lists_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifacts = CollectedArtifacts::default();
        artifacts.push(CollectedArtifact {
            kind: ArtifactKind::Result,
            task_name: String::from("wpt-firefox-nightly-testharness-1"),
            url: String::from("https://q/report"),
        });
        let path = write_manifest(dir.path(), &artifacts).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(
            content,
            "kind,task_name,url\nresult,wpt-firefox-nightly-testharness-1,https://q/report\n"
        );
    }

    /// State behind the fake GitHub + TaskCluster + results server used by the tests in this module tree.
    pub(crate) struct FakeCiState {
        pub statuses: serde_json::Value,
        pub tasks: serde_json::Value,
        pub upload_reply: (StatusCode, String),
        pub next_upload_fail: Mutex<Option<StatusCode>>,
        pub uploads: Mutex<Vec<(Option<String>, String)>>,
        pub authorization_seen: Mutex<Vec<Option<String>>>,
    }

    impl FakeCiState {
        pub(crate) fn new(statuses: serde_json::Value, tasks: serde_json::Value) -> Self {
            FakeCiState {
                statuses,
                tasks,
                upload_reply: (
                    StatusCode::OK,
                    String::from("Task 4920384 added to queue"),
                ),
                next_upload_fail: Mutex::new(None),
                uploads: Mutex::new(Vec::new()),
                authorization_seen: Mutex::new(Vec::new()),
            }
        }
    }

    fn header(req: &HttpRequest, name: &str) -> Option<String> {
        req.headers()
            .get(name)
            .map(|v| String::from(v.to_str().expect("decoding HTTP header as string")))
    }

    async fn statuses(
        req: HttpRequest,
        data: web::Data<FakeCiState>,
        query: web::Query<std::collections::HashMap<String, String>>,
    ) -> HttpResponse {
        data.authorization_seen
            .lock()
            .unwrap()
            .push(header(&req, "authorization"));
        let page: usize = query.get("page").map_or(1, |p| p.parse().unwrap());
        let per_page: usize = query.get("per_page").map_or(30, |p| p.parse().unwrap());
        let all = data.statuses.as_array().unwrap();
        let slice: Vec<_> = all
            .iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .cloned()
            .collect();
        HttpResponse::Ok().json(slice)
    }

    async fn task_group_list(
        data: web::Data<FakeCiState>,
        path: web::Path<String>,
        query: web::Query<std::collections::HashMap<String, String>>,
    ) -> HttpResponse {
        let group = path.into_inner();
        let tasks = data.tasks.get(&group).cloned().unwrap_or(json!([]));
        // Serve one task per page to exercise continuation tokens.
        let index: usize = query
            .get("continuationToken")
            .map_or(0, |t| t.parse().unwrap());
        let all = tasks.as_array().unwrap();
        let mut body = json!({
            "taskGroupId": group,
            "tasks": all.get(index).map(|t| vec![t.clone()]).unwrap_or_default(),
        });
        if index + 1 < all.len() {
            body["continuationToken"] = json!((index + 1).to_string());
        }
        HttpResponse::Ok().json(body)
    }

    async fn task_artifacts(path: web::Path<String>) -> HttpResponse {
        let task_id = path.into_inner();
        if task_id.starts_with("broken") {
            return HttpResponse::InternalServerError().body("queue unavailable");
        }
        HttpResponse::Ok().json(json!({
            "artifacts": [
                {"name": "public/logs/live.log"},
                {"name": format!("public/results/{task_id}/wpt_report.json.gz")},
                {"name": format!("public/results/{task_id}/wpt_screenshot.txt.gz")},
            ]
        }))
    }

    async fn upload(req: HttpRequest, data: web::Data<FakeCiState>, body: String) -> HttpResponse {
        {
            let mut lock = data.next_upload_fail.lock().unwrap();
            if let Some(status) = lock.take() {
                return HttpResponse::build(status).body("try again later");
            }
        }
        data.uploads
            .lock()
            .unwrap()
            .push((header(&req, "authorization"), body));
        let (status, reply) = &data.upload_reply;
        HttpResponse::build(*status).body(reply.clone())
    }

    pub(crate) fn create_fake_ci(state: FakeCiState) -> (TestServer, web::Data<FakeCiState>) {
        let state = web::Data::new(state);
        let app_state = state.clone();
        let srv = actix_test::start(move || {
            App::new()
                .app_data(app_state.clone())
                .route(
                    "/github/repos/{owner}/{repo}/commits/{git_ref}/statuses",
                    web::get().to(statuses),
                )
                .route(
                    "/queue/task-group/{group}/list",
                    web::get().to(task_group_list),
                )
                .route(
                    "/queue/task/{task_id}/artifacts",
                    web::get().to(task_artifacts),
                )
                .route("/api/results/upload", web::post().to(upload))
        });
        (srv, state)
    }

    pub(crate) fn task(task_id: &str, name: &str) -> serde_json::Value {
        json!({
            "status": {"taskId": task_id, "state": "completed"},
            "task": {"metadata": {"name": name, "description": "", "owner": "ci@example.com"}},
        })
    }

    pub(crate) fn status(context: &str, state: &str, target_url: &str) -> serde_json::Value {
        json!({
            "context": context,
            "state": state,
            "target_url": target_url,
            "description": "",
        })
    }

    fn options(srv: &TestServer, out_dir: &Path) -> UploadOptions {
        UploadOptions {
            git_ref: String::from("abc123"),
            repo_name: String::from("web-platform-tests/wpt"),
            user: String::from("uploader"),
            password: String::from("hunter2"),
            server_url: srv.url("/").trim_end_matches('/').to_string(),
            filter_artifact: None,
            github_token: Some(String::from("gh-token")),
            github_api_url: srv.url("/github"),
            queue_url: srv.url("/queue"),
            status_context_prefix: String::from(DEFAULT_STATUS_CONTEXT_PREFIX),
            out_dir: out_dir.to_path_buf(),
            jobs: 2,
        }
    }

    fn standard_ci() -> FakeCiState {
        FakeCiState::new(
            json!([
                status("Taskcluster (push)", "success", "https://tc.example/task-group/GROUP1"),
                status("Taskcluster (pull_request)", "failure", "https://tc.example/task-group/GROUP2"),
                status("Taskcluster (other)", "pending", "https://tc.example/task-group/GROUP3"),
                status("continuous-integration/other", "success", "https://ci.example/build/9"),
            ]),
            json!({
                "GROUP1": [task("t1", "wpt-firefox-nightly-testharness-1"), task("t2", "wpt-chrome-dev-reftest-1")],
                "GROUP2": [task("t3", "wpt-firefox-nightly-testharness-2")],
                "GROUP3": [task("never", "should not be read")],
            }),
        )
    }

    #[tokio::test]
    async fn upload_full_pipeline() {
        let (srv, state) = create_fake_ci(standard_ci());
        let out_dir = tempfile::tempdir().unwrap();
        let nested = out_dir.path().join("logs");

        let outcome = upload_results(&options(&srv, &nested)).await.unwrap();

        assert_eq!(outcome.artifacts.result_count(), 3);
        assert_eq!(outcome.artifacts.screenshot_count(), 3);
        assert_eq!(outcome.receipt.run_id.as_deref(), Some("4920384"));
        assert!(nested.join(MANIFEST_FILE_NAME).exists());

        let uploads = state.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let (auth, body) = &uploads[0];
        // base64("uploader:hunter2")
        assert_eq!(auth.as_deref(), Some("Basic dXBsb2FkZXI6aHVudGVyMg=="));
        let fields: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        let queue = srv.url("/queue");
        assert_eq!(
            fields,
            vec![
                (
                    String::from("result_url"),
                    format!("{queue}/task/t1/artifacts/public/results/t1/wpt_report.json.gz")
                ),
                (
                    String::from("screenshot_url"),
                    format!("{queue}/task/t1/artifacts/public/results/t1/wpt_screenshot.txt.gz")
                ),
                (
                    String::from("result_url"),
                    format!("{queue}/task/t2/artifacts/public/results/t2/wpt_report.json.gz")
                ),
                (
                    String::from("screenshot_url"),
                    format!("{queue}/task/t2/artifacts/public/results/t2/wpt_screenshot.txt.gz")
                ),
                (
                    String::from("result_url"),
                    format!("{queue}/task/t3/artifacts/public/results/t3/wpt_report.json.gz")
                ),
                (
                    String::from("screenshot_url"),
                    format!("{queue}/task/t3/artifacts/public/results/t3/wpt_screenshot.txt.gz")
                ),
            ]
        );

        assert!(
            state
                .authorization_seen
                .lock()
                .unwrap()
                .iter()
                .all(|a| a.as_deref() == Some("Bearer gh-token"))
        );
    }

    #[tokio::test]
    async fn filter_artifact_limits_tasks() {
        let (srv, state) = create_fake_ci(standard_ci());
        let out_dir = tempfile::tempdir().unwrap();
        let mut opts = options(&srv, out_dir.path());
        opts.filter_artifact = Some(String::from("chrome"));

        let outcome = upload_results(&opts).await.unwrap();
        assert_eq!(outcome.artifacts.result_count(), 1);
        assert!(
            outcome
                .artifacts
                .artifacts()
                .iter()
                .all(|a| a.task_name == "wpt-chrome-dev-reftest-1")
        );
        assert_eq!(state.uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_completed_runs() {
        let (srv, state) = create_fake_ci(FakeCiState::new(
            json!([status("Taskcluster (push)", "pending", "https://tc.example/task-group/G")]),
            json!({}),
        ));
        let out_dir = tempfile::tempdir().unwrap();
        let err = upload_results(&options(&srv, out_dir.path()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UploadResultsError::NoCompletedRuns(ref r) if r == "abc123"));
        assert!(state.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_sent_without_results() {
        let (srv, state) = create_fake_ci(standard_ci());
        let out_dir = tempfile::tempdir().unwrap();
        let mut opts = options(&srv, out_dir.path());
        opts.filter_artifact = Some(String::from("safari"));

        let err = upload_results(&opts).await.err().unwrap();
        assert!(matches!(err, UploadResultsError::NoResultArtifacts));
        assert!(state.uploads.lock().unwrap().is_empty());
        // the (empty) manifest is still written for inspection
        assert!(out_dir.path().join(MANIFEST_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn rejected_upload() {
        let mut ci = standard_ci();
        ci.upload_reply = (StatusCode::UNAUTHORIZED, String::from("bad credentials"));
        let (srv, _state) = create_fake_ci(ci);
        let out_dir = tempfile::tempdir().unwrap();

        let err = upload_results(&options(&srv, out_dir.path()))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            UploadResultsError::UploadRejected { status: 401, ref body } if body == "bad credentials"
        ));
    }

    #[tokio::test]
    async fn unexpected_upload_response() {
        let mut ci = standard_ci();
        ci.upload_reply = (StatusCode::OK, String::from("maybe later"));
        let (srv, _state) = create_fake_ci(ci);
        let out_dir = tempfile::tempdir().unwrap();

        let err = upload_results(&options(&srv, out_dir.path()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UploadResultsError::UnexpectedResponse(ref b) if b == "maybe later"));
    }

    #[tokio::test]
    async fn artifact_listing_failure_is_reported() {
        let (srv, state) = create_fake_ci(FakeCiState::new(
            json!([status("Taskcluster (push)", "success", "https://tc.example/task-group/G")]),
            json!({"G": [task("t1", "ok"), task("broken-1", "broken")]}),
        ));
        let out_dir = tempfile::tempdir().unwrap();
        let err = upload_results(&options(&srv, out_dir.path()))
            .await
            .err()
            .unwrap();
        match err {
            UploadResultsError::RemoteApi(detailed) => {
                assert!(matches!(
                    detailed.error,
                    RemoteApiError::UnexpectedStatus(reqwest::StatusCode::INTERNAL_SERVER_ERROR)
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(state.uploads.lock().unwrap().is_empty());
    }
}
