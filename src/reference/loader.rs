//! HCC reference table loading and indexing.
//!
//! The table is read once at startup and shared read-only across
//! workers; lookups never lock. Malformed rows are skipped and
//! counted, an empty table is fatal.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::models::ReferenceEntry;
use crate::pipeline::error::PipelineError;
use crate::pipeline::text::{is_valid_icd10_code, normalize_description, normalize_icd10_code};

/// Immutable lookup structure over the reference table.
#[derive(Debug)]
pub struct ReferenceIndex {
    entries: Vec<ReferenceEntry>,
    by_code: HashMap<String, usize>,
    by_description: HashMap<String, usize>,
    by_code_prefix: HashMap<String, Vec<usize>>,
    skipped_rows: usize,
}

impl ReferenceIndex {
    /// Load from a CSV file. Expects a code column and a description
    /// column (`ICD-10-CM Codes`, `Description`, optional `Tags` —
    /// matched case-insensitively, falling back to any header
    /// containing "code"/"desc"/"tag").
    pub fn from_csv_path(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::Reference(format!(
                "Reference CSV not found: {}",
                path.display()
            )));
        }
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, PipelineError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| PipelineError::Reference(format!("Cannot read CSV header: {e}")))?
            .clone();

        let code_idx = find_column(&headers, "ICD-10-CM Codes", "code").ok_or_else(|| {
            PipelineError::Reference("Reference CSV has no code column".to_string())
        })?;
        let desc_idx = find_column(&headers, "Description", "desc").ok_or_else(|| {
            PipelineError::Reference("Reference CSV has no description column".to_string())
        })?;
        let tags_idx = find_column(&headers, "Tags", "tag");

        let mut rows = Vec::new();
        let mut unreadable = 0usize;
        for record in csv_reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable reference row");
                    unreadable += 1;
                    continue;
                }
            };
            let code = record.get(code_idx).unwrap_or_default().to_string();
            let description = record.get(desc_idx).unwrap_or_default().to_string();
            let tags = tags_idx
                .and_then(|idx| record.get(idx))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            rows.push((code, description, tags));
        }

        let mut index = Self::from_rows(rows)?;
        index.skipped_rows += unreadable;
        Ok(index)
    }

    /// Build from in-memory rows; test fixtures use this directly.
    pub fn from_rows<I>(rows: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (String, String, Option<String>)>,
    {
        let mut entries: Vec<ReferenceEntry> = Vec::new();
        let mut by_code = HashMap::new();
        let mut by_description = HashMap::new();
        let mut skipped_rows = 0usize;

        for (raw_code, description, tags) in rows {
            let code = normalize_icd10_code(&raw_code);
            if code.is_empty() || !is_valid_icd10_code(&code) {
                tracing::debug!(code = raw_code, "Skipping reference row with invalid code");
                skipped_rows += 1;
                continue;
            }
            if by_code.contains_key(&code) {
                tracing::debug!(code, "Skipping duplicate reference code");
                skipped_rows += 1;
                continue;
            }

            let idx = entries.len();
            let normalized_description = normalize_description(&description);
            by_code.insert(code.clone(), idx);
            // First row wins on duplicate descriptions.
            if !normalized_description.is_empty() {
                by_description
                    .entry(normalized_description.clone())
                    .or_insert(idx);
            }
            entries.push(ReferenceEntry {
                code,
                description: description.trim().to_string(),
                normalized_description,
                tags,
            });
        }

        if entries.is_empty() {
            return Err(PipelineError::Reference(
                "Reference table is empty after loading; matching would be meaningless"
                    .to_string(),
            ));
        }
        if skipped_rows > 0 {
            tracing::warn!(skipped_rows, loaded = entries.len(), "Skipped malformed reference rows");
        }

        let mut by_code_prefix: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            for prefix_len in [3usize, 4] {
                if entry.code.len() >= prefix_len {
                    by_code_prefix
                        .entry(entry.code[..prefix_len].to_string())
                        .or_default()
                        .push(idx);
                }
            }
        }

        Ok(Self {
            entries,
            by_code,
            by_description,
            by_code_prefix,
            skipped_rows,
        })
    }

    /// Entries in table order; the fuzzy scan iterates this directly.
    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Exact lookup by normalized code.
    pub fn match_by_code(&self, code: &str) -> Option<&ReferenceEntry> {
        let key = normalize_icd10_code(code);
        if key.is_empty() {
            return None;
        }
        self.by_code.get(&key).map(|&idx| &self.entries[idx])
    }

    /// Exact lookup by normalized description.
    pub fn match_by_description(&self, description: &str) -> Option<&ReferenceEntry> {
        let key = normalize_description(description);
        if key.is_empty() {
            return None;
        }
        self.by_description.get(&key).map(|&idx| &self.entries[idx])
    }

    /// Entries sharing a normalized-code prefix (3 or 4 characters).
    pub fn by_code_prefix(&self, prefix: &str) -> &[usize] {
        self.by_code_prefix
            .get(prefix)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn find_column(headers: &csv::StringRecord, exact: &str, fallback_fragment: &str) -> Option<usize> {
    if let Some(idx) = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(exact))
    {
        return Some(idx);
    }
    headers
        .iter()
        .position(|h| h.to_ascii_lowercase().contains(fallback_fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CSV: &str = "ICD-10-CM Codes,Description,Tags\n\
                       I5022,Chronic systolic heart failure,cardiology\n\
                       E119,Type 2 diabetes mellitus,\n\
                       K219,Gastro-esophageal reflux disease without esophagitis,\n";

    fn index() -> ReferenceIndex {
        ReferenceIndex::from_csv_reader(CSV.as_bytes()).unwrap()
    }

    #[test]
    fn loads_rows_in_table_order() {
        let index = index();
        assert_eq!(index.len(), 3);
        assert_eq!(index.entries()[0].code, "I5022");
        assert_eq!(index.entries()[1].code, "E119");
        assert_eq!(index.skipped_rows(), 0);
    }

    #[test]
    fn code_lookup_normalizes_input() {
        let index = index();
        let entry = index.match_by_code("I50.22").unwrap();
        assert_eq!(entry.description, "Chronic systolic heart failure");
        assert_eq!(index.match_by_code(" e11.9 ").unwrap().code, "E119");
        assert!(index.match_by_code("Z99.9").is_none());
    }

    #[test]
    fn description_lookup_normalizes_input() {
        let index = index();
        let entry = index
            .match_by_description("Type 2 Diabetes Mellitus!")
            .unwrap();
        assert_eq!(entry.code, "E119");
        assert!(index.match_by_description("no such disease").is_none());
    }

    #[test]
    fn tags_are_optional() {
        let index = index();
        assert_eq!(index.entries()[0].tags.as_deref(), Some("cardiology"));
        assert!(index.entries()[1].tags.is_none());
    }

    #[test]
    fn malformed_rows_skipped_and_counted() {
        let csv = "ICD-10-CM Codes,Description,Tags\n\
                   ,Missing code,\n\
                   not-a-code,Bad shape,\n\
                   E119,Type 2 diabetes mellitus,\n";
        let index = ReferenceIndex::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.skipped_rows(), 2);
    }

    #[test]
    fn duplicate_codes_keep_first_row() {
        let csv = "ICD-10-CM Codes,Description,Tags\n\
                   E119,First description,\n\
                   E11.9,Second description,\n";
        let index = ReferenceIndex::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].description, "First description");
        assert_eq!(index.skipped_rows(), 1);
    }

    #[test]
    fn duplicate_descriptions_keep_first_entry() {
        let csv = "ICD-10-CM Codes,Description,Tags\n\
                   E119,Diabetes mellitus,\n\
                   E109,Diabetes mellitus,\n";
        let index = ReferenceIndex::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.match_by_description("diabetes mellitus").unwrap().code, "E119");
    }

    #[test]
    fn empty_table_is_fatal() {
        let csv = "ICD-10-CM Codes,Description,Tags\n,,\n";
        let err = ReferenceIndex::from_csv_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Reference(_)));
    }

    #[test]
    fn header_matching_is_lenient() {
        let csv = "icd-10 code,description,tags\nI10,Essential hypertension,\n";
        let index = ReferenceIndex::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(index.match_by_code("I10").unwrap().description, "Essential hypertension");
    }

    #[test]
    fn missing_code_column_is_fatal() {
        let csv = "Name,Description\nX,Y\n";
        let err = ReferenceIndex::from_csv_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Reference(_)));
    }

    #[test]
    fn prefix_buckets_group_related_codes() {
        let csv = "ICD-10-CM Codes,Description,Tags\n\
                   E1122,Type 2 diabetes with CKD,\n\
                   E119,Type 2 diabetes mellitus,\n\
                   I10,Essential hypertension,\n";
        let index = ReferenceIndex::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(index.by_code_prefix("E11").len(), 2);
        assert_eq!(index.by_code_prefix("E112").len(), 1);
        assert!(index.by_code_prefix("Z99").is_empty());
    }

    #[test]
    fn loads_from_file_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();
        let index = ReferenceIndex::from_csv_path(file.path()).unwrap();
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = ReferenceIndex::from_csv_path(Path::new("/nonexistent/hcc.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::Reference(_)));
    }
}
