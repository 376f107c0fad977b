// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use clap::ValueEnum;
use log::debug;
use serde::Deserialize;

use crate::scm::Scm;

use super::{TaggedRevision, TaggedRevisionSource};

/// Number of commits requested per `git rev-list` invocation.
pub const DEFAULT_REV_LIST_PAGE_SIZE: usize = 10_000;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistorySource {
    /// Walk the commit history of the head revision, reading each commit's tag decorations
    #[default]
    RevList,

    /// Read tag refs matching the tag prefix directly, regardless of which branch they're reachable from
    Tags,
}

fn sort_newest_first(revisions: &mut [TaggedRevision]) {
    revisions.sort_by(|a, b| b.epoch.cmp(&a.epoch));
}

/// In-memory history.
pub struct VecRevisionSource {
    revisions: VecDeque<TaggedRevision>,
}

impl VecRevisionSource {
    #[must_use]
    pub fn new(mut revisions: Vec<TaggedRevision>) -> Self {
        sort_newest_first(&mut revisions);
        VecRevisionSource {
            revisions: revisions.into(),
        }
    }
}

impl TaggedRevisionSource for VecRevisionSource {
    fn next_revision(&mut self) -> Result<Option<TaggedRevision>> {
        Ok(self.revisions.pop_front())
    }
}

/// Pages through `git rev-list` output for a head revision.
///
/// `rev-list` lists a child before its parent even when the parent's committer date is newer, so a newer tagged commit
/// can turn up on any later page. Every page is read on the first request and the tagged commits merged newest first,
/// which keeps the result independent of the page size.
pub struct RevListSource<'a, S: Scm> {
    scm: &'a S,
    head_revision: String,
    until: i64,
    tag_prefix: String,
    page_size: usize,
    revisions: Option<VecDeque<TaggedRevision>>,
}

impl<'a, S: Scm> RevListSource<'a, S> {
    pub fn new(
        scm: &'a S,
        head_revision: &str,
        until: i64,
        tag_prefix: &str,
        page_size: usize,
    ) -> Self {
        RevListSource {
            scm,
            head_revision: String::from(head_revision),
            until,
            tag_prefix: String::from(tag_prefix),
            page_size: page_size.max(1),
            revisions: None,
        }
    }

    fn load(&self) -> Result<VecDeque<TaggedRevision>> {
        let mut tagged = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.scm.rev_list_tagged(
                &self.head_revision,
                self.until,
                skip,
                self.page_size,
                &self.tag_prefix,
            )?;
            debug!(
                "rev-list page at offset {skip}: {} commits scanned, {} tagged",
                page.commits_scanned,
                page.tagged.len()
            );
            skip += page.commits_scanned;
            tagged.extend(page.tagged);

            // A page without any tagged commit doesn't end the walk; only running out of commits does.
            if page.commits_scanned < self.page_size {
                break;
            }
        }
        // stable, so commits sharing a timestamp keep their rev-list order
        sort_newest_first(&mut tagged);
        debug!("read {} tagged commits from {skip} commits", tagged.len());
        Ok(tagged.into())
    }
}

impl<S: Scm> TaggedRevisionSource for RevListSource<'_, S> {
    fn next_revision(&mut self) -> Result<Option<TaggedRevision>> {
        if self.revisions.is_none() {
            self.revisions = Some(self.load()?);
        }
        Ok(self.revisions.as_mut().and_then(VecDeque::pop_front))
    }
}

/// Reads every tag matching the prefix in one pass.
pub struct TagRefSource<'a, S: Scm> {
    scm: &'a S,
    until: i64,
    tag_prefix: String,
    revisions: Option<VecDeque<TaggedRevision>>,
}

impl<'a, S: Scm> TagRefSource<'a, S> {
    pub fn new(scm: &'a S, until: i64, tag_prefix: &str) -> Self {
        TagRefSource {
            scm,
            until,
            tag_prefix: String::from(tag_prefix),
            revisions: None,
        }
    }

    fn load(&self) -> Result<VecDeque<TaggedRevision>> {
        let mut tags = self.scm.tags_by_date(&self.tag_prefix, self.until)?;
        // Tag name order decides which tag represents a commit that carries several.
        tags.sort_by(|a, b| a.tag.cmp(&b.tag));
        let mut seen = HashSet::new();
        tags.retain(|rev| seen.insert(rev.commit.clone()));
        sort_newest_first(&mut tags);
        debug!("read {} tagged commits from tag refs", tags.len());
        Ok(tags.into())
    }
}

impl<S: Scm> TaggedRevisionSource for TagRefSource<'_, S> {
    fn next_revision(&mut self) -> Result<Option<TaggedRevision>> {
        if self.revisions.is_none() {
            self.revisions = Some(self.load()?);
        }
        Ok(self.revisions.as_mut().and_then(VecDeque::pop_front))
    }
}

pub fn open_history<'a, S: Scm>(
    scm: &'a S,
    history_source: HistorySource,
    head_revision: &str,
    until: i64,
    tag_prefix: &str,
    page_size: usize,
) -> Box<dyn TaggedRevisionSource + 'a> {
    match history_source {
        HistorySource::RevList => Box::new(RevListSource::new(
            scm,
            head_revision,
            until,
            tag_prefix,
            page_size,
        )),
        HistorySource::Tags => Box::new(TagRefSource::new(scm, until, tag_prefix)),
    }
}
