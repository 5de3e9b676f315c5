//! Batch driver
//!
//! Walks the input records in order, generates the passes each run mode asks
//! for and persists them. A failing person is logged and counted; the run
//! goes on with the next one.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::hashing::sha256_hex;
use crate::identity::{is_eligible, IdentityMode, OutputStream};
use crate::person::Person;
use crate::pipeline::{PassGenerator, PassRequest, PassResult, PipelineError};
use crate::signing::ManifestSigner;

pub const PASS_DIR: &str = "pass";
pub const QR_DIR: &str = "qr";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Cannot write {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot serialize run summary: {0}")]
    Summary(#[from] serde_json::Error),
}

fn persistence(path: &Path) -> impl FnOnce(std::io::Error) -> BatchError + '_ {
    move |source| BatchError::Persistence {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    ByEmail,
    ByAccreditation,
    Both,
}

impl RunMode {
    /// Passes to attempt for one person; empty means the person is skipped.
    ///
    /// In combined runs the badge comes first, then the entry pass. Entry
    /// passes carry the accreditation field only when `accreditation_on_entries`.
    pub fn passes_for<'p>(&self, person: &'p Person, accreditation_on_entries: bool) -> Vec<PassRequest<'p>> {
        match self {
            RunMode::ByEmail => vec![PassRequest::new(person, IdentityMode::ByEmail)],
            RunMode::ByAccreditation if is_eligible(person, IdentityMode::ByAccreditation) => {
                vec![PassRequest::new(person, IdentityMode::ByAccreditation)]
            }
            RunMode::ByAccreditation => vec![],
            RunMode::Both => {
                let mut requests = vec![];
                if person.accreditation().is_some() {
                    requests.push(PassRequest::new(person, IdentityMode::ByAccreditation));
                }
                requests.push(
                    PassRequest::new(person, IdentityMode::ByEmail)
                        .with_accreditation_field(accreditation_on_entries),
                );
                requests
            }
        }
    }
}

/// `<root>/pass/<stream>/` and `<root>/qr/<stream>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pass_dir(&self, stream: OutputStream) -> PathBuf {
        self.root.join(PASS_DIR).join(stream.dir_name())
    }

    pub fn qr_dir(&self, stream: OutputStream) -> PathBuf {
        self.root.join(QR_DIR).join(stream.dir_name())
    }

    pub fn archive_path(&self, stream: OutputStream, stem: &str) -> PathBuf {
        self.pass_dir(stream).join(format!("{}.pkpass", stem))
    }

    pub fn qr_path(&self, stream: OutputStream, stem: &str) -> PathBuf {
        self.qr_dir(stream).join(format!("{}.png", stem))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    /// Create every output directory for both streams.
    pub fn prepare(&self) -> Result<(), BatchError> {
        for stream in [OutputStream::Entries, OutputStream::Badges] {
            for dir in [self.pass_dir(stream), self.qr_dir(stream)] {
                fs::create_dir_all(&dir).map_err(persistence(&dir))?;
            }
        }
        Ok(())
    }

    /// Write the archive and QR image. If the QR write fails the archive is
    /// removed again so no half-written pass stays on disk.
    pub fn persist(&self, result: &PassResult) -> Result<PassRecord, BatchError> {
        let archive_path = self.archive_path(result.stream, &result.file_stem);
        let qr_path = self.qr_path(result.stream, &result.file_stem);

        fs::write(&archive_path, &result.signed_archive).map_err(persistence(&archive_path))?;
        if let Err(source) = fs::write(&qr_path, &result.qr_png) {
            if let Err(e) = fs::remove_file(&archive_path) {
                warn!(path = %archive_path.display(), error = %e, "cannot remove partial archive");
            }
            // a partial QR file may exist too
            let _ = fs::remove_file(&qr_path);
            return Err(persistence(&qr_path)(source));
        }

        Ok(PassRecord {
            identifier: result.identifier.clone(),
            stream: result.stream,
            archive_path,
            qr_path,
            archive_sha256: sha256_hex(&result.signed_archive),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRecord {
    pub identifier: String,
    pub stream: OutputStream,
    pub archive_path: PathBuf,
    pub qr_path: PathBuf,
    pub archive_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassFailure {
    pub contact_id: String,
    pub identity: IdentityMode,
    pub error: String,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub mode: RunMode,
    pub people: usize,
    pub skipped: usize,
    pub generated: Vec<PassRecord>,
    pub failed: Vec<PassFailure>,
}

impl BatchSummary {
    fn new(mode: RunMode, people: usize) -> Self {
        Self {
            mode,
            people,
            skipped: 0,
            generated: vec![],
            failed: vec![],
        }
    }

    pub fn success_count(&self) -> usize {
        self.generated.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> Result<(), BatchError> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).map_err(persistence(path))
    }
}

pub struct BatchDriver<'g, 'a, S: ManifestSigner> {
    generator: &'g PassGenerator<'a, S>,
    layout: &'g OutputLayout,
    mode: RunMode,
    accreditation_on_entries: bool,
}

impl<'g, 'a, S: ManifestSigner> BatchDriver<'g, 'a, S> {
    pub fn new(generator: &'g PassGenerator<'a, S>, layout: &'g OutputLayout, mode: RunMode) -> Self {
        Self {
            generator,
            layout,
            mode,
            accreditation_on_entries: false,
        }
    }

    pub fn accreditation_on_entries(mut self, enabled: bool) -> Self {
        self.accreditation_on_entries = enabled;
        self
    }

    /// Generate and persist one pass.
    pub fn process(&self, request: &PassRequest<'_>) -> Result<PassRecord, BatchError> {
        let result = self.generator.generate(request)?;
        self.layout.persist(&result)
    }

    pub fn run(&self, people: &[Person]) -> BatchSummary {
        let total = people.len();
        let mut summary = BatchSummary::new(self.mode, total);
        info!(mode = ?self.mode, people = total, "starting batch");

        for (i, person) in people.iter().enumerate() {
            let n = i + 1;
            let requests = self.mode.passes_for(person, self.accreditation_on_entries);
            if requests.is_empty() {
                info!("[{}/{}] skipped {}: no accreditation code", n, total, person.contact_id);
                summary.skipped += 1;
                continue;
            }

            for request in &requests {
                let stream = request.identity.stream();
                match self.process(request) {
                    Ok(record) => {
                        info!(
                            "[{}/{}] {} -> {}",
                            n,
                            total,
                            person.display_name,
                            record.archive_path.display()
                        );
                        summary.generated.push(record);
                    }
                    Err(e) => {
                        error!("[{}/{}] {} ({}) failed: {}", n, total, person.contact_id, stream, e);
                        summary.failed.push(PassFailure {
                            contact_id: person.contact_id.clone(),
                            identity: request.identity,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            generated = summary.success_count(),
            failed = summary.failure_count(),
            skipped = summary.skipped,
            "batch finished"
        );
        summary
    }
}
