// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{path::Path, process::ExitCode};

use anyhow::Result;
use log::{Log, debug, error};
use tracing::info_span;
use tracing_subscriber::layer::SubscriberExt as _;

use crate::{
    cmd::{rev_list_ui::RevListConsole, ui::UiStage},
    config::get_repo_config,
    revisions::{
        DEFAULT_HEAD_REVISION, DEFAULT_TAG_PREFIX, EpochUntil, SampleOptions, TaggedRevision,
        format_revision, open_history, sample_tagged_revisions, source::DEFAULT_REV_LIST_PAGE_SIZE,
    },
    scm::git::GitScm,
};

use super::cli::{CommonOptions, RevListOptions};

// Design note: the `cli` function of each command performs the interactive output, while delegating as much actual
// functionality as possible to library methods that don't do interactive output but instead return data structures.
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn cli(logger: Box<dyn Log>, common_opts: &CommonOptions, options: &RevListOptions) -> ExitCode {
    let terminal_output = match RevListConsole::new(common_opts.no_progress, logger) {
        Ok(terminal_output) => terminal_output,
        Err(e) => {
            eprintln!("unable to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::registry::Registry::default().with(terminal_output);

    let result = tracing::subscriber::with_default(subscriber, || {
        rev_list(common_opts.config.as_deref(), options)
    });

    match result {
        Ok(revisions) => {
            for revision in &revisions {
                println!("{}", format_revision(revision, options.detailed));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("rev-list failed: {e:?}");
            ExitCode::FAILURE
        }
    }
}

/// Resolve the effective settings (flags, then config file, then defaults) and sample the repository's history.
pub fn rev_list(override_config: Option<&Path>, options: &RevListOptions) -> Result<Vec<TaggedRevision>> {
    let config = get_repo_config(override_config)?;
    let config = config.rev_list();

    let head_revision = options
        .head_revision
        .as_deref()
        .or(config.head_revision.as_deref())
        .unwrap_or(DEFAULT_HEAD_REVISION);
    let tag_prefix = options
        .tag_prefix
        .as_deref()
        .or(config.tag_prefix.as_deref())
        .unwrap_or(DEFAULT_TAG_PREFIX);
    let history_source = options
        .history_source
        .or(config.history_source)
        .unwrap_or_default();
    let page_size = config
        .rev_list_page_size
        .unwrap_or(DEFAULT_REV_LIST_PAGE_SIZE);

    // resolved once, so the history source and the sampler agree on `now`
    let until = options.epoch_until.resolve();
    debug!(
        "sampling {history_source:?} history of {head_revision} until {until} every {}s",
        options.epoch_step.seconds()
    );

    let _span = info_span!(
        "sample_revisions",
        ui_stage = Into::<u64>::into(UiStage::SampleRevisions),
    )
    .entered();

    let scm = GitScm::new(options.repo_dir.clone());
    let mut history = open_history(
        &scm,
        history_source,
        head_revision,
        until,
        tag_prefix,
        page_size,
    );
    let sample_options = SampleOptions {
        epoch_step: options.epoch_step,
        epoch_until: EpochUntil::Timestamp(until),
        num_revisions: options.num_revisions,
        duplicate_policy: options.duplicate_policy,
    };
    Ok(sample_tagged_revisions(history.as_mut(), &sample_options)?)
}
