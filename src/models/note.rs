//! A unit of pipeline input: one clinical progress note.

use serde::{Deserialize, Serialize};

/// Where a note's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteSource {
    File,
    PastedText,
}

impl NoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::PastedText => "pasted_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "pasted_text" => Some(Self::PastedText),
            _ => None,
        }
    }
}

impl std::fmt::Display for NoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One progress note accepted by the orchestrator. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub raw_text: String,
    pub source: NoteSource,
}

impl Note {
    pub fn from_file(id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_text: raw_text.into(),
            source: NoteSource::File,
        }
    }

    pub fn from_pasted_text(id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_text: raw_text.into(),
            source: NoteSource::PastedText,
        }
    }
}
