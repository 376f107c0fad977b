// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::set_max_level;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::{fmt::Debug, path::PathBuf, process::ExitCode};

use crate::{
    results::DEFAULT_GIT_REF,
    revisions::{DuplicatePolicy, EpochStep, EpochUntil, HistorySource},
};

use super::{rev_list, upload_results};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    common: CommonOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
pub struct CommonOptions {
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,

    /// Disable progress bars and spinners, even if the terminal supports them.
    #[arg(short, long, global = true)]
    pub no_progress: bool,

    /// Read defaults from this TOML file instead of `.config/trendkit.toml`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print tagged revisions sampled at regular intervals back through history, newest first
    RevList(RevListOptions),

    /// Submit the results of completed CI runs for a commit to a results server
    UploadResults(UploadResultsOptions),
}

#[derive(Args, Debug)]
pub struct RevListOptions {
    /// Only consider revisions committed at or before this UNIX timestamp; `now` uses the current time
    #[arg(long, default_value_t = EpochUntil::Now)]
    pub epoch_until: EpochUntil,

    /// Width of each sampling interval: three-hourly, six-hourly, eight-hourly, twelve-hourly, daily, weekly, or a
    /// number of seconds
    #[arg(long, default_value_t = EpochStep::DAILY)]
    pub epoch_step: EpochStep,

    /// Number of revisions to print
    #[arg(long, default_value_t = 1)]
    pub num_revisions: usize,

    /// Revision whose history is walked [default: origin/master]
    #[arg(long)]
    pub head_revision: Option<String>,

    /// Only tags starting with this prefix mark a revision [default: merge_pr_]
    #[arg(long)]
    pub tag_prefix: Option<String>,

    /// Where tagged revisions are read from [default: rev-list]
    #[arg(value_enum, long)]
    pub history_source: Option<HistorySource>,

    /// How to treat an interval whose newest revision was already printed
    #[arg(value_enum, long, default_value_t = DuplicatePolicy::Skip)]
    pub duplicate_policy: DuplicatePolicy,

    /// Print the commit time and tag alongside each commit
    #[arg(long)]
    pub detailed: bool,

    /// Git repository to read
    #[arg(long, default_value = ".")]
    pub repo_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct UploadResultsOptions {
    /// User name for the results server
    #[arg(long)]
    pub user: String,

    /// Password for the results server
    #[arg(long)]
    pub password: String,

    /// Git reference (branch, tag or commit) whose CI runs are uploaded
    #[arg(long = "ref", default_value = DEFAULT_GIT_REF)]
    pub git_ref: String,

    /// Results server base URL [default: https://staging.wpt.fyi]
    #[arg(long)]
    pub server_url: Option<String>,

    /// Only upload artifacts of tasks whose name contains this string
    #[arg(long)]
    pub filter_artifact: Option<String>,

    /// GitHub repository, as owner/name [default: web-platform-tests/wpt]
    #[arg(long)]
    pub repo_name: Option<String>,

    /// File containing a GitHub token, used to authenticate status requests
    #[arg(long)]
    pub token_file: Option<PathBuf>,

    /// Directory receiving the artifact manifest; created if missing
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// GitHub REST API base URL [default: https://api.github.com]
    #[arg(long)]
    pub github_api_url: Option<String>,

    /// TaskCluster queue API base URL [default: https://queue.taskcluster.net/v1]
    #[arg(long)]
    pub queue_url: Option<String>,

    /// Number of concurrent artifact listing requests; defaults to # of CPUs
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,
}

pub async fn run_cli() -> ExitCode {
    let cli = Cli::parse();
    let logger = TermLogger::new(
        cli.common.verbose.log_level_filter(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    set_max_level(cli.common.verbose.log_level_filter());

    match &cli.command {
        Commands::RevList(options) => rev_list::cli(logger, &cli.common, options),
        Commands::UploadResults(options) => upload_results::cli(logger, &cli.common, options).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn rev_list_defaults() {
        let cli = Cli::try_parse_from(["trendkit", "rev-list"]).unwrap();
        let Commands::RevList(options) = cli.command else {
            panic!("expected rev-list");
        };
        assert_eq!(options.epoch_until, EpochUntil::Now);
        assert_eq!(options.epoch_step, EpochStep::DAILY);
        assert_eq!(options.num_revisions, 1);
        assert_eq!(options.duplicate_policy, DuplicatePolicy::Skip);
        assert_eq!(options.history_source, None);
        assert!(!options.detailed);
        assert!(!cli.common.no_progress);
    }

    #[test]
    fn rev_list_flags() {
        let cli = Cli::try_parse_from([
            "trendkit",
            "rev-list",
            "--epoch-until",
            "1570345200",
            "--epoch-step",
            "weekly",
            "--num-revisions",
            "4",
            "--history-source",
            "tags",
            "--duplicate-policy",
            "advance",
            "--detailed",
            "--no-progress",
            "--config",
            "ci/trendkit.toml",
        ])
        .unwrap();
        let Commands::RevList(options) = cli.command else {
            panic!("expected rev-list");
        };
        assert_eq!(options.epoch_until, EpochUntil::Timestamp(1_570_345_200));
        assert_eq!(options.epoch_step, EpochStep::WEEKLY);
        assert_eq!(options.num_revisions, 4);
        assert_eq!(options.history_source, Some(HistorySource::Tags));
        assert_eq!(options.duplicate_policy, DuplicatePolicy::Advance);
        assert!(options.detailed);
        assert!(cli.common.no_progress);
        assert_eq!(cli.common.config, Some(PathBuf::from("ci/trendkit.toml")));
    }

    #[test]
    fn rev_list_rejects_bad_step() {
        assert!(Cli::try_parse_from(["trendkit", "rev-list", "--epoch-step", "0"]).is_err());
        assert!(Cli::try_parse_from(["trendkit", "rev-list", "--epoch-step", "hourly"]).is_err());
        assert!(Cli::try_parse_from(["trendkit", "rev-list", "--epoch-until", "soon"]).is_err());
    }

    #[test]
    fn upload_results_requires_credentials() {
        assert!(Cli::try_parse_from(["trendkit", "upload-results"]).is_err());

        let cli = Cli::try_parse_from([
            "trendkit",
            "upload-results",
            "--user",
            "u",
            "--password",
            "p",
            "--ref",
            "refs/pull/42/head",
        ])
        .unwrap();
        let Commands::UploadResults(options) = cli.command else {
            panic!("expected upload-results");
        };
        assert_eq!(options.git_ref, "refs/pull/42/head");
        assert_eq!(options.out_dir, PathBuf::from("."));
        assert_eq!(options.jobs, 0);
        assert_eq!(options.server_url, None);
    }
}
