// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::{Context as _, Result, anyhow};
use serde::Deserialize;

use crate::revisions::HistorySource;

pub const DEFAULT_CONFIG_PATH: &str = ".config/trendkit.toml";

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RepoConfig {
    #[serde(default)]
    rev_list: RevListConfig,
    #[serde(default)]
    upload_results: UploadResultsConfig,
}

impl RepoConfig {
    pub fn rev_list(&self) -> &RevListConfig {
        &self.rev_list
    }

    pub fn upload_results(&self) -> &UploadResultsConfig {
        &self.upload_results
    }
}

/// Defaults for `rev-list`; command-line flags take precedence.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RevListConfig {
    pub head_revision: Option<String>,
    pub tag_prefix: Option<String>,
    pub history_source: Option<HistorySource>,
    pub rev_list_page_size: Option<usize>,
}

/// Defaults for `upload-results`; command-line flags take precedence.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UploadResultsConfig {
    pub server_url: Option<String>,
    pub repo_name: Option<String>,
    pub github_api_url: Option<String>,
    pub queue_url: Option<String>,
    pub status_context_prefix: Option<String>,
}

pub fn get_repo_config(override_config: Option<&Path>) -> Result<RepoConfig> {
    let path = override_config.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    if fs::exists(path)? {
        toml::from_str(&fs::read_to_string(path)?)
            .with_context(|| format!("parsing config file {}", path.display()))
    } else {
        if let Some(override_config) = override_config {
            return Err(anyhow!(
                "override config path {} could not be opened",
                override_config.display()
            ));
        }
        Ok(RepoConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn parse_full_config() {
        let config: RepoConfig = toml::from_str(
            r#"
            [rev-list]
            head-revision = "origin/main"
            tag-prefix = "epochs/daily/"
            history-source = "tags"
            rev-list-page-size = 500

            [upload-results]
            server-url = "https://wpt.fyi"
            repo-name = "example/wpt"
            github-api-url = "https://github.example.com/api/v3"
            queue-url = "https://tc.example.com/api/queue/v1"
            status-context-prefix = "Community-TC "
            "#,
        )
        .unwrap();
        assert_eq!(config.rev_list().head_revision.as_deref(), Some("origin/main"));
        assert_eq!(config.rev_list().tag_prefix.as_deref(), Some("epochs/daily/"));
        assert_eq!(config.rev_list().history_source, Some(HistorySource::Tags));
        assert_eq!(config.rev_list().rev_list_page_size, Some(500));
        assert_eq!(
            config.upload_results().server_url.as_deref(),
            Some("https://wpt.fyi")
        );
        assert_eq!(
            config.upload_results().status_context_prefix.as_deref(),
            Some("Community-TC ")
        );
    }

    #[test]
    fn sections_are_optional() {
        let config: RepoConfig = toml::from_str("[rev-list]\ntag-prefix = \"x\"\n").unwrap();
        assert_eq!(config.rev_list().tag_prefix.as_deref(), Some("x"));
        assert!(config.upload_results().server_url.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<RepoConfig>("[rev-list]\nhead = \"x\"\n").is_err());
    }

    #[test]
    fn override_config_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[upload-results]\nrepo-name = \"someone/else\"").unwrap();
        let config = get_repo_config(Some(file.path())).unwrap();
        assert_eq!(
            config.upload_results().repo_name.as_deref(),
            Some("someone/else")
        );
    }

    #[test]
    fn missing_override_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(get_repo_config(Some(&missing)).is_err());
    }
}
