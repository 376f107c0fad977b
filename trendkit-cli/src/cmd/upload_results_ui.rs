// SPDX-FileCopyrightText: 2025 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Mutex;

use console::{Emoji, style};
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget};
use indicatif_log_bridge::LogWrapper;
use log::{Log, SetLoggerError, warn};
use tracing::Subscriber;
use tracing::span::{Attributes, Id};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use super::ui::{RawUiInformation, UiStage, elapsed_line, progress_style};

static DISCOVER: Emoji<'_, '_> = Emoji("🔍  ", "");
static COLLECT: Emoji<'_, '_> = Emoji("📦  ", "");
static UPLOAD: Emoji<'_, '_> = Emoji("📤  ", "");

#[derive(Default)]
struct SpanData {
    message_bar: Option<ProgressBar>,
    transient: bool,
    was_task_listing: bool,
}

pub struct UploadResultsConsole {
    root: MultiProgress,
    ongoing_spans: DashMap<Id, SpanData>,
    collect_artifacts: Mutex<Option<ProgressBar>>,
}

impl UploadResultsConsole {
    pub fn new<T: Log + 'static>(no_progress: bool, logger: T) -> Result<Self, SetLoggerError> {
        let root = MultiProgress::new();
        if no_progress {
            root.set_draw_target(ProgressDrawTarget::hidden());
        }
        LogWrapper::new(root.clone(), logger).try_init()?;
        Ok(Self {
            root,
            ongoing_spans: DashMap::new(),
            collect_artifacts: Mutex::new(None),
        })
    }

    #[allow(clippy::literal_string_with_formatting_args)]
    fn add_message_bar(&self) -> ProgressBar {
        // must add to the `MultiProgress` before calling any method on the bar which might cause a draw
        let progress_bar = self.root.add(ProgressBar::new_spinner());
        progress_bar.enable_steady_tick(std::time::Duration::from_millis(250));
        progress_bar.set_style(progress_style("{spinner:.blue} [{elapsed_precise}] {msg}"));
        progress_bar
    }
}

impl<S> Layer<S> for UploadResultsConsole
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    #[allow(clippy::literal_string_with_formatting_args)] // templates look like format args, but aren't
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: Context<'_, S>) {
        let mut info = RawUiInformation::default();
        attrs.record(&mut info);

        let Some(step) = info.ui_stage else {
            return;
        };

        let mut span_data = SpanData::default();
        let progress_bar = self.add_message_bar();
        match step {
            UiStage::FindTaskGroups => {
                progress_bar.set_message(format!(
                    "{} {DISCOVER}Finding completed CI runs ...",
                    style("[1/3]").bold().dim(),
                ));
            }
            UiStage::ListTaskGroup => {
                progress_bar.set_message(format!(
                    "          listing task group {} ...",
                    style(info.task_group.as_deref().unwrap_or("?")).bold().dim()
                ));
                span_data.transient = true;
            }
            UiStage::CollectArtifacts => {
                progress_bar.set_message(format!(
                    "{} {COLLECT}Collecting artifacts ...",
                    style("[2/3]").bold().dim(),
                ));
                if let Some(task_count) = info.task_count {
                    progress_bar.set_length(task_count);
                    progress_bar.set_style(progress_style(
                        "{spinner:.blue} [{elapsed_precise}] {msg} {wide_bar:.cyan/blue} {pos}/{len}",
                    ));
                }
                if let Ok(mut collect_artifacts) = self.collect_artifacts.lock() {
                    *collect_artifacts = Some(progress_bar.clone());
                }
            }
            UiStage::ListTaskArtifacts => {
                progress_bar.set_message(format!(
                    "          {} ...",
                    style(info.task_name.as_deref().unwrap_or("unknown task")).bold().dim()
                ));
                span_data.transient = true;
                span_data.was_task_listing = true;
            }
            UiStage::UploadResults => {
                progress_bar.set_message(format!(
                    "{} {UPLOAD}Uploading results ...",
                    style("[3/3]").bold().dim(),
                ));
            }
            other @ UiStage::SampleRevisions => {
                warn!("upload-results didn't expect to encounter ui_stage {other:?}");
                self.root.remove(&progress_bar);
                return;
            }
        }
        span_data.message_bar = Some(progress_bar);

        self.ongoing_spans.insert(id.clone(), span_data);
    }

    fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
        let Some((_, span_data)) = self.ongoing_spans.remove(&id) else {
            return;
        };

        if let Some(message_bar) = span_data.message_bar {
            // progress bars are hidden when stderr isn't a terminal; still report how long each stage took
            #[allow(clippy::print_stderr)]
            if !console::Term::stderr().is_term() && !span_data.transient {
                eprintln!("{}", elapsed_line(&message_bar));
            }
            if span_data.transient {
                // many of these run concurrently; drop them once complete
                self.root.remove(&message_bar);
            } else {
                message_bar.finish();
            }
        }

        if span_data.was_task_listing {
            if let Ok(collect_artifacts) = self.collect_artifacts.lock() {
                if let Some(collect_artifacts) = &*collect_artifacts {
                    collect_artifacts.inc(1);
                }
            }
        }
    }
}
