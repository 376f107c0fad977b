// SPDX-FileCopyrightText: 2025 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

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

static HISTORY: Emoji<'_, '_> = Emoji("🕰️  ", "");

#[derive(Default)]
struct SpanData {
    message_bar: Option<ProgressBar>,
    subcommand_bar: Option<ProgressBar>,
}

/// Console output for `rev-list`.  Progress goes to stderr so that stdout only carries the selected revisions.
pub struct RevListConsole {
    root: MultiProgress,
    ongoing_spans: DashMap<Id, SpanData>,
}

impl RevListConsole {
    pub fn new<T: Log + 'static>(no_progress: bool, logger: T) -> Result<Self, SetLoggerError> {
        let root = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        if no_progress {
            root.set_draw_target(ProgressDrawTarget::hidden());
        }
        LogWrapper::new(root.clone(), logger).try_init()?;
        Ok(Self {
            root,
            ongoing_spans: DashMap::new(),
        })
    }
}

impl<S> Layer<S> for RevListConsole
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    #[allow(clippy::literal_string_with_formatting_args)] // templates look like format args, but aren't
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: Context<'_, S>) {
        let mut info = RawUiInformation::default();
        attrs.record(&mut info);

        let mut span_data = SpanData::default();

        if let Some(step) = info.ui_stage {
            let progress_bar = self.root.add(ProgressBar::new_spinner());
            progress_bar.enable_steady_tick(std::time::Duration::from_millis(250));
            progress_bar.set_style(progress_style("{spinner:.blue} [{elapsed_precise}] {msg}"));
            if step == UiStage::SampleRevisions {
                progress_bar.set_message(format!(
                    "{} {HISTORY}Sampling tagged revisions ...",
                    style("[1/1]").bold().dim(),
                ));
                span_data.message_bar = Some(progress_bar);
            } else {
                warn!("rev-list didn't expect to encounter ui_stage {step:?}");
                self.root.remove(&progress_bar);
            }
        }

        if info.is_subcommand {
            let progress_bar = self.root.add(ProgressBar::new_spinner());
            progress_bar.enable_steady_tick(std::time::Duration::from_millis(100));
            progress_bar.set_style(progress_style(
                "{spinner:.blue} [{elapsed_precise}]       cmd: {msg}",
            ));
            let mut msg = String::with_capacity(64);
            if let Some(bin) = &info.subcommand_binary {
                msg += bin;
            }
            if let Some(args) = &info.subcommand_args {
                msg += " ";
                msg.extend(args.chars().take(50));
            }
            progress_bar.set_message(msg);
            span_data.subcommand_bar = Some(progress_bar);
        }

        if span_data.message_bar.is_some() || span_data.subcommand_bar.is_some() {
            self.ongoing_spans.insert(id.clone(), span_data);
        }
    }

    fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
        let Some((_, span_data)) = self.ongoing_spans.remove(&id) else {
            return;
        };

        if let Some(subcommand_bar) = span_data.subcommand_bar {
            self.root.remove(&subcommand_bar);
        }
        if let Some(message_bar) = span_data.message_bar {
            // progress bars are hidden when stderr isn't a terminal; still report how long the stage took
            #[allow(clippy::print_stderr)]
            if !console::Term::stderr().is_term() {
                eprintln!("{}", elapsed_line(&message_bar));
            }
            // sampling is usually quick; don't leave a finished bar behind on stderr
            self.root.remove(&message_bar);
        }
    }
}
