use std::path::{Path, PathBuf};

use sieve_core::CandidateRecord;

use crate::persist::{AtomicFileWriter, PersistError};
use crate::verify::verified_identifiers;
use crate::VerificationResult;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub candidates_filename: String,
    pub results_filename: String,
    pub verified_filename: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            candidates_filename: "candidates.jsonl".to_string(),
            results_filename: "verification.jsonl".to_string(),
            verified_filename: "verified.txt".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crawled candidates as JSON lines, in acceptance order.
pub fn export_candidates(
    output_dir: &Path,
    options: &ExportOptions,
    records: &[CandidateRecord],
) -> Result<PathBuf, ExportError> {
    let lines = json_lines(records)?;
    let writer = AtomicFileWriter::new(output_dir.to_path_buf());
    Ok(writer.write_lines(&options.candidates_filename, lines)?)
}

/// Every verification result as JSON lines plus the bare verified list.
/// Returns `(results_path, verified_path)`.
pub fn export_verification(
    output_dir: &Path,
    options: &ExportOptions,
    results: &[VerificationResult],
) -> Result<(PathBuf, PathBuf), ExportError> {
    let writer = AtomicFileWriter::new(output_dir.to_path_buf());
    let results_path = writer.write_lines(&options.results_filename, json_lines(results)?)?;
    let verified_path =
        writer.write_lines(&options.verified_filename, verified_identifiers(results))?;
    Ok((results_path, verified_path))
}

fn json_lines<T: serde::Serialize>(items: &[T]) -> Result<Vec<String>, serde_json::Error> {
    items.iter().map(serde_json::to_string).collect()
}
