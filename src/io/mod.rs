pub mod notes;

pub use notes::{iter_note_files, load_note_text, load_notes_dir};
