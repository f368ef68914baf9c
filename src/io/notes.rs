//! Note-file ingestion.
//!
//! Loads progress notes from a directory, sorted by file name for a
//! stable batch order. Files that are not valid UTF-8 fall back to a
//! Latin-1 read with a warning rather than failing the batch.

use std::path::{Path, PathBuf};

use crate::models::Note;
use crate::pipeline::error::PipelineError;

/// List note files in a directory, sorted by file name.
pub fn iter_note_files(notes_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !notes_dir.is_dir() {
        return Err(PipelineError::Ingestion(format!(
            "Notes directory not found: {}",
            notes_dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(notes_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort_by_key(|path| path.file_name().map(|n| n.to_owned()));
    Ok(files)
}

/// Read one note's text, falling back to Latin-1 for non-UTF-8 bytes.
pub fn load_note_text(note_path: &Path) -> Result<String, PipelineError> {
    let bytes = std::fs::read(note_path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            tracing::warn!(path = %note_path.display(), "Falling back to Latin-1 decoding");
            // Latin-1 maps each byte to the code point of the same value.
            Ok(err.into_bytes().iter().map(|&b| b as char).collect())
        }
    }
}

/// Load every note in a directory as `Note` values with
/// `source = File`; the note id is the file name.
pub fn load_notes_dir(notes_dir: &Path) -> Result<Vec<Note>, PipelineError> {
    let mut notes = Vec::new();
    for path in iter_note_files(notes_dir)? {
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let text = load_note_text(&path)?;
        notes.push(Note::from_file(id, text));
    }
    Ok(notes)
}
