// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;

use crate::revisions::TaggedRevision;

pub mod git;

/// One window of commit history, as returned by [`Scm::rev_list_tagged`].
#[derive(Debug, Default)]
pub struct RevListPage {
    /// Number of commits in the window, tagged or not.  Fewer than requested means history is exhausted.
    pub commits_scanned: usize,
    pub tagged: Vec<TaggedRevision>,
}

pub trait Scm {
    /// Walk the history of `head_revision`, skipping the first `skip` commits committed at or before `min_age`, and
    /// returning at most `max_count` commits, keeping only the commits carrying a tag that starts with `tag_prefix`.
    fn rev_list_tagged(
        &self,
        head_revision: &str,
        min_age: i64,
        skip: usize,
        max_count: usize,
        tag_prefix: &str,
    ) -> Result<RevListPage>;

    /// All commits that have a tag starting with `tag_prefix` and were committed at or before `until`.  Annotated tags
    /// are resolved to the commit they point at.  There's one entry per tag, so a commit may appear more than once.
    fn tags_by_date(&self, tag_prefix: &str, until: i64) -> Result<Vec<TaggedRevision>>;
}
