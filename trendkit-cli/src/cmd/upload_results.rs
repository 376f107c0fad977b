// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{path::Path, process::ExitCode};

use anyhow::Result;
use log::{Log, error, info};
use tracing::instrument::WithSubscriber as _;
use tracing_subscriber::layer::SubscriberExt as _;

use crate::{
    cmd::upload_results_ui::UploadResultsConsole,
    config::get_repo_config,
    errors::UploadResultsError,
    results::{
        DEFAULT_GITHUB_API_URL, DEFAULT_QUEUE_URL, DEFAULT_REPO_NAME, DEFAULT_SERVER_URL,
        DEFAULT_STATUS_CONTEXT_PREFIX, UploadOptions, read_token_file, status_url, upload_results,
    },
};

use super::cli::{CommonOptions, UploadResultsOptions};

#[allow(clippy::print_stdout, clippy::print_stderr)]
pub async fn cli(
    logger: Box<dyn Log>,
    common_opts: &CommonOptions,
    options: &UploadResultsOptions,
) -> ExitCode {
    let terminal_output = match UploadResultsConsole::new(common_opts.no_progress, logger) {
        Ok(terminal_output) => terminal_output,
        Err(e) => {
            eprintln!("unable to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::registry::Registry::default().with(terminal_output);

    let upload_options = match upload_options(common_opts.config.as_deref(), options) {
        Ok(upload_options) => upload_options,
        Err(e) => {
            error!("upload-results failed: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    match upload_results(&upload_options)
        .with_subscriber(subscriber)
        .await
    {
        Ok(outcome) => {
            info!(
                "uploaded {} results and {} screenshots",
                outcome.artifacts.result_count(),
                outcome.artifacts.screenshot_count()
            );
            println!("{}", outcome.receipt.message);
            if let Some(run_id) = &outcome.receipt.run_id {
                println!(
                    "Check status in: {}",
                    status_url(&upload_options.server_url, run_id)
                );
            }
            ExitCode::SUCCESS
        }
        Err(UploadResultsError::NoCompletedRuns(git_ref)) => {
            error!("No complete TaskCluster runs found for ref {git_ref}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("upload-results failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Merge command-line flags, the config file and built-in defaults into the pipeline's options.
pub fn upload_options(
    override_config: Option<&Path>,
    options: &UploadResultsOptions,
) -> Result<UploadOptions> {
    let config = get_repo_config(override_config)?;
    let config = config.upload_results();

    let pick = |flag: &Option<String>, configured: &Option<String>, default: &str| {
        flag.as_ref()
            .or(configured.as_ref())
            .map_or_else(|| String::from(default), String::clone)
    };

    let github_token = match &options.token_file {
        Some(path) => Some(read_token_file(path)?),
        None => None,
    };

    Ok(UploadOptions {
        git_ref: options.git_ref.clone(),
        repo_name: pick(&options.repo_name, &config.repo_name, DEFAULT_REPO_NAME),
        user: options.user.clone(),
        password: options.password.clone(),
        server_url: pick(&options.server_url, &config.server_url, DEFAULT_SERVER_URL),
        filter_artifact: options.filter_artifact.clone(),
        github_token,
        github_api_url: pick(
            &options.github_api_url,
            &config.github_api_url,
            DEFAULT_GITHUB_API_URL,
        ),
        queue_url: pick(&options.queue_url, &config.queue_url, DEFAULT_QUEUE_URL),
        status_context_prefix: config
            .status_context_prefix
            .clone()
            .unwrap_or_else(|| String::from(DEFAULT_STATUS_CONTEXT_PREFIX)),
        out_dir: options.out_dir.clone(),
        jobs: if options.jobs == 0 {
            num_cpus::get()
        } else {
            options.jobs
        },
    })
}
