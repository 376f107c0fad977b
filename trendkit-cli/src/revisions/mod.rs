// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fmt, str::FromStr};

use anyhow::Result;
use clap::ValueEnum;
use log::{debug, trace};
use time::OffsetDateTime;

use crate::errors::{EpochParseError, SampleError};

pub mod source;

pub use source::{HistorySource, RevListSource, TagRefSource, VecRevisionSource, open_history};

pub const WEEKLY_EPOCH_SIZE: u64 = 604_800;
/// Monday, 29 December 1969 0:00:00 UTC; weekly buckets start on Mondays.
pub const WEEKLY_EPOCH_OFFSET: i64 = -259_200;

pub const DEFAULT_HEAD_REVISION: &str = "origin/master";
pub const DEFAULT_TAG_PREFIX: &str = "merge_pr_";

/// A commit carrying a tag that matched the tag prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRevision {
    /// Committer timestamp, in seconds since the UNIX epoch.
    pub epoch: i64,
    pub commit: String,
    pub tag: String,
}

/// Source of tagged revisions, newest first.
///
/// Implementations are expected to return revisions in non-increasing `epoch` order; the sampler only ever moves
/// forward through the source.
pub trait TaggedRevisionSource {
    fn next_revision(&mut self) -> Result<Option<TaggedRevision>>;
}

/// Width of one sampling bucket, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochStep(u64);

impl EpochStep {
    pub const THREE_HOURLY: EpochStep = EpochStep(10_800);
    pub const SIX_HOURLY: EpochStep = EpochStep(21_600);
    pub const EIGHT_HOURLY: EpochStep = EpochStep(28_800);
    pub const TWELVE_HOURLY: EpochStep = EpochStep(43_200);
    pub const DAILY: EpochStep = EpochStep(86_400);
    pub const WEEKLY: EpochStep = EpochStep(WEEKLY_EPOCH_SIZE);

    pub fn new(seconds: u64) -> Result<Self, EpochParseError> {
        if seconds == 0 {
            return Err(EpochParseError::ZeroEpochStep);
        }
        Ok(EpochStep(seconds))
    }

    #[must_use]
    pub fn seconds(self) -> u64 {
        self.0
    }
}

impl Default for EpochStep {
    fn default() -> Self {
        EpochStep::DAILY
    }
}

impl FromStr for EpochStep {
    type Err = EpochParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "three-hourly" => Ok(EpochStep::THREE_HOURLY),
            "six-hourly" => Ok(EpochStep::SIX_HOURLY),
            "eight-hourly" => Ok(EpochStep::EIGHT_HOURLY),
            "twelve-hourly" => Ok(EpochStep::TWELVE_HOURLY),
            "daily" => Ok(EpochStep::DAILY),
            "weekly" => Ok(EpochStep::WEEKLY),
            other => {
                let seconds = other
                    .parse::<u64>()
                    .map_err(|_| EpochParseError::InvalidEpochStep(String::from(s)))?;
                EpochStep::new(seconds)
            }
        }
    }
}

impl fmt::Display for EpochStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EpochStep::THREE_HOURLY => write!(f, "three-hourly"),
            EpochStep::SIX_HOURLY => write!(f, "six-hourly"),
            EpochStep::EIGHT_HOURLY => write!(f, "eight-hourly"),
            EpochStep::TWELVE_HOURLY => write!(f, "twelve-hourly"),
            EpochStep::DAILY => write!(f, "daily"),
            EpochStep::WEEKLY => write!(f, "weekly"),
            EpochStep(seconds) => write!(f, "{seconds}"),
        }
    }
}

/// Upper limit of the sampled history: revisions newer than this are never selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpochUntil {
    #[default]
    Now,
    Timestamp(i64),
}

impl EpochUntil {
    /// Resolve into a UNIX timestamp; `Now` is read from the system clock on every call.
    #[must_use]
    pub fn resolve(self) -> i64 {
        match self {
            EpochUntil::Now => OffsetDateTime::now_utc().unix_timestamp(),
            EpochUntil::Timestamp(ts) => ts,
        }
    }
}

impl FromStr for EpochUntil {
    type Err = EpochParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("now") {
            return Ok(EpochUntil::Now);
        }
        trimmed
            .parse::<i64>()
            .map(EpochUntil::Timestamp)
            .map_err(|_| EpochParseError::InvalidEpochUntil(String::from(s)))
    }
}

impl fmt::Display for EpochUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochUntil::Now => write!(f, "now"),
            EpochUntil::Timestamp(ts) => write!(f, "{ts}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketAlignment {
    /// Boundaries fall on `until`, `until - step`, `until - 2*step`, ...
    Until,
    /// Boundaries fall on `offset + k*step` for any integer `k`.
    Offset(i64),
}

impl BucketAlignment {
    #[must_use]
    pub fn for_step(step: EpochStep) -> Self {
        if step.seconds() == WEEKLY_EPOCH_SIZE {
            BucketAlignment::Offset(WEEKLY_EPOCH_OFFSET)
        } else {
            BucketAlignment::Until
        }
    }
}

/// The set of bucket boundaries for one sampling run.
#[derive(Debug, Clone, Copy)]
pub struct BucketGrid {
    anchor: i64,
    step: i64,
    until: i64,
}

impl BucketGrid {
    pub fn new(step: EpochStep, until: i64) -> Result<Self, SampleError> {
        let anchor = match BucketAlignment::for_step(step) {
            BucketAlignment::Until => until,
            BucketAlignment::Offset(offset) => offset,
        };
        Ok(BucketGrid {
            anchor,
            step: i64::try_from(step.seconds())
                .map_err(|_| SampleError::EpochStepOutOfRange(step.seconds()))?,
            until,
        })
    }

    /// Newest boundary at or before `timestamp`.
    fn floor(&self, timestamp: i64) -> i64 {
        let anchor = i128::from(self.anchor);
        let step = i128::from(self.step);
        let floored = anchor + (i128::from(timestamp) - anchor).div_euclid(step) * step;
        // floored is within (timestamp - step, timestamp], which always fits unless timestamp is near i64::MIN
        i64::try_from(floored).unwrap_or(i64::MIN)
    }

    #[must_use]
    pub fn first_boundary(&self) -> i64 {
        self.floor(self.until)
    }

    /// Newest boundary strictly before `timestamp`.
    #[must_use]
    pub fn boundary_before(&self, timestamp: i64) -> i64 {
        self.floor(timestamp.saturating_sub(1))
    }

    /// The boundary one bucket older than `boundary`, if it can be represented.
    #[must_use]
    pub fn previous_boundary(&self, boundary: i64) -> Option<i64> {
        boundary.checked_sub(self.step)
    }
}

/// What to do when the newest candidate for a boundary was already selected for the previous boundary.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum DuplicatePolicy {
    /// Suppress the repeated revision and keep stepping one bucket at a time; suppressed buckets don't count towards
    /// the number of revisions requested.
    #[default]
    Skip,

    /// Move the next boundary to just before the selected revision, jumping over any empty buckets.
    Advance,
}

#[derive(Debug, Clone, Copy)]
pub struct SampleOptions {
    pub epoch_step: EpochStep,
    pub epoch_until: EpochUntil,
    pub num_revisions: usize,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for SampleOptions {
    fn default() -> Self {
        SampleOptions {
            epoch_step: EpochStep::default(),
            epoch_until: EpochUntil::default(),
            num_revisions: 1,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// Select one tagged revision per bucket, walking from the newest bucket backwards.
///
/// For each bucket boundary the newest revision with `epoch <= boundary` is selected.  The walk ends once
/// `num_revisions` revisions were selected, the source has no more revisions, or the boundary drops below zero.
/// ```text
///   Fri   Sat   Sun   Mon   Tue   Wed   Thu   Fri   Sat
///    |     |     |     |     |     |     |     |     |
/// -A---B-C---DEF---G---H--I-----------J-----K-L----M--N--
///                                                       ^
///                                                     until
/// ```
/// No revision landed between I and J, so two consecutive boundaries find I as their newest candidate; I is only
/// selected once.
pub fn sample_tagged_revisions<S>(
    source: &mut S,
    options: &SampleOptions,
) -> Result<Vec<TaggedRevision>, SampleError>
where
    S: TaggedRevisionSource + ?Sized,
{
    let mut selected = Vec::new();
    if options.num_revisions == 0 {
        return Ok(selected);
    }

    let until = options.epoch_until.resolve();
    let grid = BucketGrid::new(options.epoch_step, until)?;
    let mut boundary = grid.first_boundary();
    debug!(
        "sampling {} revision(s) every {}s until {until} (first boundary {boundary}, {:?})",
        options.num_revisions, options.epoch_step, options.duplicate_policy
    );

    let mut cursor = source.next_revision()?;
    let mut previous_commit: Option<String> = None;
    while selected.len() < options.num_revisions {
        if boundary < 0 {
            debug!("boundary {boundary} is before the UNIX epoch; stopping");
            break;
        }

        while cursor.as_ref().is_some_and(|rev| rev.epoch > boundary) {
            cursor = source.next_revision()?;
        }
        let Some(revision) = cursor.as_ref() else {
            debug!("no more tagged revisions at or before {boundary}; stopping");
            break;
        };

        if previous_commit.as_deref() == Some(revision.commit.as_str()) {
            trace!(
                "boundary {boundary}: {} was already selected; not counted",
                revision.commit
            );
        } else {
            trace!("boundary {boundary}: selected {revision:?}");
            previous_commit = Some(revision.commit.clone());
            selected.push(revision.clone());
        }

        boundary = match options.duplicate_policy {
            DuplicatePolicy::Skip => match grid.previous_boundary(boundary) {
                Some(b) => b,
                None => break,
            },
            DuplicatePolicy::Advance => grid.boundary_before(revision.epoch),
        };
    }

    Ok(selected)
}

#[must_use]
pub fn format_revision(revision: &TaggedRevision, detailed: bool) -> String {
    if detailed {
        format!(
            "epoch: {} commit: {} tag: {}",
            revision.epoch, revision.commit, revision.tag
        )
    } else {
        revision.commit.clone()
    }
}
