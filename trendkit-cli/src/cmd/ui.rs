// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use indicatif::{ProgressBar, ProgressStyle};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::Debug;
use tracing::field::Visit;

/// Progress style from an indicatif template, falling back to a plain spinner if the template doesn't parse.
pub fn progress_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Summary printed for a finished stage when stderr isn't a terminal and its progress bar was never drawn.
pub fn elapsed_line(bar: &ProgressBar) -> String {
    format!("{} [elapsed: {:.3}s]", bar.message(), bar.elapsed().as_secs_f64())
}

#[derive(Default, Debug)]
pub struct RawUiInformation {
    pub ui_stage: Option<UiStage>,
    pub is_subcommand: bool,
    pub subcommand_binary: Option<String>,
    pub subcommand_args: Option<String>,
    pub task_count: Option<u64>,
    pub task_group: Option<String>,
    pub task_name: Option<String>,
}

impl Visit for RawUiInformation {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "subcommand_args" => self.subcommand_args = Some(format!("{value:?}")),
            "task_group" => self.task_group = Some(format!("{value:?}")),
            "task_name" => self.task_name = Some(format!("{value:?}")),
            _ => {}
        }
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        match field.name() {
            "ui_stage" => self.ui_stage = UiStage::try_from(value).ok(),
            "task_count" => self.task_count = Some(value),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "subcommand_binary" => self.subcommand_binary = Some(String::from(value)),
            "subcommand_args" => self.subcommand_args = Some(String::from(value)),
            "task_group" => self.task_group = Some(String::from(value)),
            "task_name" => self.task_name = Some(String::from(value)),
            _ => {}
        }
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        if field.name() == "subcommand" {
            self.is_subcommand = value;
        }
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy, TryFromPrimitive, IntoPrimitive)]
#[repr(u64)]
pub enum UiStage {
    // RevList...
    SampleRevisions,

    // UploadResults...
    FindTaskGroups,
    ListTaskGroup,
    CollectArtifacts,
    ListTaskArtifacts,
    UploadResults,
}
