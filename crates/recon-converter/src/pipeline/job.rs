//! Per-file conversion job
//!
//! Fetch -> Parse -> Validate -> Transform -> Upload -> Verify. Each step
//! either advances or ends the job with a [`JobError`] that maps onto exactly
//! one [`FailureKind`]. Archiving and notification happen in the caller, once
//! the outcome is known.

use recon_common::FailureKind;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::staging::{Phase, StagingArea, StagingFile};
use crate::convert::{self, ConversionRules, ConvertError};
use crate::remote::{remote_path, RemoteError, RemoteSession};
use crate::workbook::{Workbook, WorkbookError};

/// Why a file did not make it through
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Source file no longer exists: {0}")]
    SourceMissing(#[source] RemoteError),

    #[error("Failed to fetch source file: {0}")]
    Fetch(#[source] RemoteError),

    #[error("Staging directory {path} unavailable: {source}")]
    StagingDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Staging I/O error: {0}")]
    Staging(#[source] io::Error),

    #[error("Failed to read workbook: {0}")]
    Workbook(#[from] WorkbookError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("Failed to upload {path}: {message}")]
    Upload { path: String, message: String },

    #[error("Failed to re-read uploaded file {path}: {message}")]
    Verify { path: String, message: String },

    #[error("Cancelled before upload")]
    Cancelled,
}

impl JobError {
    /// Failure kind reported to operators
    ///
    /// `Cancelled` is never reported; it maps to `Internal` only so the
    /// mapping stays total.
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::SourceMissing(_) => FailureKind::NotExists,
            JobError::StagingDir { .. } | JobError::Upload { .. } => FailureKind::Directory,
            JobError::Convert(ConvertError::HeaderMismatch { .. }) => FailureKind::InvalidFile,
            JobError::Convert(ConvertError::Empty) => FailureKind::EmptyFile,
            JobError::Verify { .. } => FailureKind::InvalidFile,
            JobError::Fetch(_)
            | JobError::Staging(_)
            | JobError::Workbook(_)
            | JobError::Convert(_)
            | JobError::Cancelled => FailureKind::Internal,
        }
    }
}

/// A delivered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub output_name: String,
    pub rows_before: usize,
    pub rows_after: usize,
}

/// One source file moving through the pipeline
pub struct ConversionJob<'a> {
    pub file_name: &'a str,
    pub source_dir: &'a str,
    pub destination_dir: &'a str,
    pub rules: &'a ConversionRules,
    pub staging: &'a StagingArea,
}

impl ConversionJob<'_> {
    /// Run the job up to and including verification
    ///
    /// Cancellation is honoured between the steps before the upload. Once
    /// the upload starts the job runs to completion. Staging files are
    /// removed when this returns, whatever the result.
    pub fn run(
        &self,
        source: &dyn RemoteSession,
        destination: &dyn RemoteSession,
        cancel: &CancellationToken,
    ) -> Result<Delivery, JobError> {
        let fetched = self.fetch(source)?;
        checkpoint(cancel)?;

        let rows = read_rows(fetched.path(), self.rules)?;
        let prepared = convert::prepare_rows(rows, self.rules)?;
        checkpoint(cancel)?;

        let output_name = self.rules.rename.output_name(self.file_name);
        let converted = self.transform(&output_name, &prepared.rows)?;
        checkpoint(cancel)?;

        let remote = remote_path(self.destination_dir, &output_name);
        upload(destination, converted.path(), &remote)?;
        let rows_after = verify(destination, &remote)?;

        Ok(Delivery {
            output_name,
            rows_before: prepared.data_rows,
            rows_after,
        })
    }

    fn fetch(&self, source: &dyn RemoteSession) -> Result<StagingFile, JobError> {
        let remote = remote_path(self.source_dir, self.file_name);
        let mut reader = source.open(&remote).map_err(|e| {
            if e.is_not_found() {
                JobError::SourceMissing(e)
            } else {
                JobError::Fetch(e)
            }
        })?;

        let dir = self.prepare(Phase::Before)?;
        let (staged, mut file) =
            StagingFile::create(dir.join(self.file_name)).map_err(JobError::Staging)?;
        let bytes = io::copy(&mut reader, &mut file).map_err(JobError::Staging)?;
        file.flush().map_err(JobError::Staging)?;

        debug!(remote = %remote, bytes, "Fetched source file");
        Ok(staged)
    }

    fn transform(&self, output_name: &str, rows: &[Vec<String>]) -> Result<StagingFile, JobError> {
        let bytes = convert::serialize(rows)?;

        let dir = self.prepare(Phase::After)?;
        let (staged, mut file) =
            StagingFile::create(dir.join(output_name)).map_err(JobError::Staging)?;
        file.write_all(&bytes).map_err(JobError::Staging)?;
        file.flush().map_err(JobError::Staging)?;

        debug!(output = %output_name, bytes = bytes.len(), "Converted workbook");
        Ok(staged)
    }

    fn prepare(&self, phase: Phase) -> Result<PathBuf, JobError> {
        self.staging
            .prepare(phase)
            .map_err(|source| JobError::StagingDir {
                path: self.staging.dir(phase),
                source,
            })
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        Ok(())
    }
}

/// Read the profile's sheet from a local workbook
pub fn read_rows(path: &Path, rules: &ConversionRules) -> Result<Vec<Vec<String>>, JobError> {
    let file = File::open(path).map_err(JobError::Staging)?;
    let mut workbook = Workbook::open(BufReader::new(file))?;
    Ok(workbook.rows(&rules.sheet)?)
}

fn upload(destination: &dyn RemoteSession, local: &Path, remote: &str) -> Result<(), JobError> {
    let upload_err = |message: String| JobError::Upload {
        path: remote.to_string(),
        message,
    };

    let mut input = File::open(local).map_err(|e| upload_err(e.to_string()))?;
    let mut output = destination
        .create(remote)
        .map_err(|e| upload_err(e.to_string()))?;
    let bytes = io::copy(&mut input, &mut output).map_err(|e| upload_err(e.to_string()))?;
    output.flush().map_err(|e| upload_err(e.to_string()))?;

    debug!(remote = %remote, bytes, "Uploaded converted file");
    Ok(())
}

fn verify(destination: &dyn RemoteSession, remote: &str) -> Result<usize, JobError> {
    let verify_err = |message: String| JobError::Verify {
        path: remote.to_string(),
        message,
    };

    let reader = destination
        .open(remote)
        .map_err(|e| verify_err(e.to_string()))?;
    convert::count_data_rows(reader).map_err(|e| verify_err(e.to_string()))
}

/// Result of an offline conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConversion {
    pub output: PathBuf,
    pub rows_before: usize,
    pub rows_after: usize,
}

/// Convert a local workbook into `output_dir`, with the same rules and
/// verification as the remote pipeline
pub fn convert_local(
    input: &Path,
    rules: &ConversionRules,
    output_dir: &Path,
) -> Result<LocalConversion, JobError> {
    let rows = read_rows(input, rules)?;
    let prepared = convert::prepare_rows(rows, rules)?;

    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = output_dir.join(rules.rename.output_name(&file_name));

    std::fs::create_dir_all(output_dir).map_err(|source| JobError::StagingDir {
        path: output_dir.to_path_buf(),
        source,
    })?;
    std::fs::write(&output, convert::serialize(&prepared.rows)?).map_err(JobError::Staging)?;

    let written = File::open(&output).map_err(JobError::Staging)?;
    let rows_after = convert::count_data_rows(BufReader::new(written)).map_err(|e| {
        JobError::Verify {
            path: output.display().to_string(),
            message: e.to_string(),
        }
    })?;

    Ok(LocalConversion {
        output,
        rows_before: prepared.data_rows,
        rows_after,
    })
}
