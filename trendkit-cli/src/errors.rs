// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

use crate::results::RemoteApiDetailedError;

#[derive(Error, Debug)]
pub enum SubcommandErrors {
    #[error("sub-command '{command:?}' could not be started: {error:?}")]
    UnableToStart {
        command: String,
        error: std::io::Error,
    },

    #[error("sub-command '{command:?}' failed with exit code {status:?} and stderr {stderr:?})")]
    SubcommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("sub-command '{command:?}' had unparseable output; error: {error:?} output: {output:?})")]
    SubcommandOutputParseFailed {
        command: String,
        error: String,
        output: String,
    },
}

#[derive(Error, Debug)]
pub enum EpochParseError {
    #[error("epoch step {0:?} is not a named interval or a number of seconds")]
    InvalidEpochStep(String),

    #[error("epoch step must be greater than zero")]
    ZeroEpochStep,

    #[error("epoch until {0:?} is not `now` or a UNIX timestamp")]
    InvalidEpochUntil(String),
}

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("epoch step {0} is too large to compute bucket boundaries")]
    EpochStepOutOfRange(u64),

    #[error("failed to read tagged revision history: {0:?}")]
    History(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum UploadResultsError {
    #[error("no complete TaskCluster runs found for ref {0}")]
    NoCompletedRuns(String),

    #[error("not sending data, collected artifacts contained no test results")]
    NoResultArtifacts,

    #[error("the results server returned an unexpected status {status}; content: {body:?}")]
    UploadRejected { status: u16, body: String },

    #[error("the results server returned unexpected content: {0:?}")]
    UnexpectedResponse(String),

    #[error("unable to read GitHub token file {path:?}: {error:?}")]
    TokenFile {
        path: String,
        error: std::io::Error,
    },

    #[error("unable to prepare output directory: {0:?}")]
    OutputDirectory(#[from] std::io::Error),

    #[error("unable to write artifact manifest: {0:?}")]
    Manifest(#[from] csv::Error),

    #[error(transparent)]
    RemoteApi(#[from] RemoteApiDetailedError),
}
