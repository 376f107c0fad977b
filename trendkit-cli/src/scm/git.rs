// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::errors::SubcommandErrors;
use crate::revisions::TaggedRevision;
use crate::scm::{RevListPage, Scm};
use anyhow::Result;
use log::{debug, trace};
use std::path::PathBuf;
use std::process::Command;
use tracing::info_span;

const REV_LIST_FORMAT: &str = "--format=epoch:%ct:commit:%H:%D";
const FOR_EACH_REF_FORMAT: &str = "--format=%(objectname):%(*objectname):%(committerdate:unix):%(*committerdate:unix):%(refname:strip=2)";

pub struct GitScm {
    repo_dir: PathBuf,
}

impl GitScm {
    #[must_use]
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    fn git(&self, args: &[String]) -> Result<String, SubcommandErrors> {
        let command = format!("git {}", args.join(" "));
        debug!("{command}");

        let _span = info_span!(
            "git",
            subcommand = true,
            subcommand_binary = "git",
            subcommand_args = ?args,
        )
        .entered();

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .map_err(|e| SubcommandErrors::UnableToStart {
                command: command.clone(),
                error: e,
            })?;

        if !output.status.success() {
            return Err(SubcommandErrors::SubcommandFailed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| SubcommandErrors::SubcommandOutputParseFailed {
            command,
            error: e.to_string(),
            output: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

impl Scm for GitScm {
    fn rev_list_tagged(
        &self,
        head_revision: &str,
        min_age: i64,
        skip: usize,
        max_count: usize,
        tag_prefix: &str,
    ) -> Result<RevListPage> {
        let args = vec![
            String::from("rev-list"),
            String::from("--date-order"),
            format!("--skip={skip}"),
            format!("--max-count={max_count}"),
            format!("--min-age={min_age}"),
            String::from(REV_LIST_FORMAT),
            String::from(head_revision),
        ];
        let stdout = self.git(&args)?;
        Ok(parse_rev_list_output(&stdout, tag_prefix)?)
    }

    fn tags_by_date(&self, tag_prefix: &str, until: i64) -> Result<Vec<TaggedRevision>> {
        let args = vec![
            String::from("for-each-ref"),
            String::from(FOR_EACH_REF_FORMAT),
            format!("refs/tags/{tag_prefix}*"),
        ];
        let stdout = self.git(&args)?;
        let mut tags = parse_for_each_ref_output(&stdout)?;
        tags.retain(|rev| rev.epoch <= until);
        tags.sort_by(|a, b| b.epoch.cmp(&a.epoch));
        Ok(tags)
    }
}

/// Finds the first tag in a `%D` decoration list (eg. `HEAD -> main, tag: merge_pr_12, origin/main`) that starts with
/// `tag_prefix`.
fn matching_tag<'a>(decorations: &'a str, tag_prefix: &str) -> Option<&'a str> {
    decorations
        .split(", ")
        .filter_map(|decoration| decoration.trim().strip_prefix("tag: "))
        .find(|tag| tag.starts_with(tag_prefix))
}

fn parse_error(command: &str, error: String, output: &str) -> SubcommandErrors {
    SubcommandErrors::SubcommandOutputParseFailed {
        command: String::from(command),
        error,
        output: String::from(output),
    }
}

/// Parses `git rev-list --format=epoch:%ct:commit:%H:%D` output.
///
/// `rev-list` prints a `commit <sha>` header before each formatted line; only the formatted lines are read.
pub fn parse_rev_list_output(
    output: &str,
    tag_prefix: &str,
) -> Result<RevListPage, SubcommandErrors> {
    let mut page = RevListPage::default();
    for line in output.lines().filter(|l| l.starts_with("epoch:")) {
        page.commits_scanned += 1;

        let fields: Vec<&str> = line.splitn(5, ':').collect();
        if fields.len() != 5 || fields[2] != "commit" {
            return Err(parse_error(
                "git rev-list",
                String::from("expected epoch:<timestamp>:commit:<sha>:<decorations>"),
                line,
            ));
        }
        let epoch = fields[1].parse::<i64>().map_err(|e| {
            parse_error("git rev-list", format!("invalid commit timestamp: {e}"), line)
        })?;

        if let Some(tag) = matching_tag(fields[4], tag_prefix) {
            let revision = TaggedRevision {
                epoch,
                commit: String::from(fields[3].trim()),
                tag: String::from(tag),
            };
            trace!("tagged revision {revision:?}");
            page.tagged.push(revision);
        }
    }
    Ok(page)
}

/// Parses `git for-each-ref` output written with [`FOR_EACH_REF_FORMAT`].
///
/// Annotated tags report the tag object in the first two fields and the tagged commit in the `*` fields; lightweight
/// tags leave the `*` fields empty.  Tags that don't point at a commit (no committer date) are skipped.
pub fn parse_for_each_ref_output(output: &str) -> Result<Vec<TaggedRevision>, SubcommandErrors> {
    let mut tags = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.splitn(5, ':').collect();
        if fields.len() != 5 {
            return Err(parse_error(
                "git for-each-ref",
                String::from("expected five ':'-separated fields"),
                line,
            ));
        }
        let (object, deref_object, date, deref_date, name) =
            (fields[0], fields[1], fields[2], fields[3], fields[4]);

        let (commit, date) = if deref_object.is_empty() {
            (object, date)
        } else {
            (deref_object, deref_date)
        };
        if date.is_empty() {
            debug!("tag {name} doesn't point at a commit; ignoring");
            continue;
        }
        let epoch = date.parse::<i64>().map_err(|e| {
            parse_error("git for-each-ref", format!("invalid committer date: {e}"), line)
        })?;

        tags.push(TaggedRevision {
            epoch,
            commit: String::from(commit),
            tag: String::from(name),
        });
    }
    Ok(tags)
}
