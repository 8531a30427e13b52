//! Turns one picked image file into a data URI.
//!
//! Publishing the URI as the active reference is the caller's job; the
//! daemon's reference state is what shows whether an upload is in effect.

use crate::reference::encode_data_uri;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("no file selected")]
    NoFile,
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("{0} is not an image")]
    NotAnImage(String),
}

/// Data URI for the first file of a selection.
///
/// Extra files are ignored with a warning.
pub fn pick_first(files: &[PathBuf]) -> Result<String, UploadError> {
    let (first, rest) = files.split_first().ok_or(UploadError::NoFile)?;
    if !rest.is_empty() {
        tracing::warn!(ignored = rest.len(), "only the first file of a selection is used");
    }
    read_as_data_uri(first)
}

/// Read an image file and encode it as a data URI with its sniffed MIME type.
pub fn read_as_data_uri(path: &Path) -> Result<String, UploadError> {
    let bytes = std::fs::read(path).map_err(|source| UploadError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let format = image::guess_format(&bytes)
        .map_err(|_| UploadError::NotAnImage(path.display().to_string()))?;
    Ok(encode_data_uri(format.to_mime_type(), &bytes))
}
