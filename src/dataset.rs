use std::path::Path;

use calamine::Reader;
use serde::Deserialize;

use crate::error::{ResponderError, ResponderResult};
use crate::models::FaqEntry;

const QUESTION_HEADERS: &[&str] = &["question", "user query"];
const ANSWER_HEADERS: &[&str] = &["answer", "product responses"];

/// Load FAQ pairs from a `.csv`, `.xlsx` or `.jsonl` file. Rows without a
/// question are skipped; a missing answer becomes an empty string.
pub fn load_faqs(path: &Path) -> ResponderResult<Vec<FaqEntry>> {
    if !path.exists() {
        return Err(ResponderError::dataset(format!(
            "FAQ file {} does not exist",
            path.display()
        )));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let entries = match ext.as_str() {
        "csv" => {
            let file = std::fs::File::open(path)
                .map_err(|e| ResponderError::dataset(format!("open {}: {}", path.display(), e)))?;
            parse_csv(file)?
        }
        "xlsx" | "xls" => parse_workbook(path)?,
        "jsonl" | "ndjson" => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ResponderError::dataset(format!("read {}: {}", path.display(), e)))?;
            parse_jsonl(&text)?
        }
        other => {
            return Err(ResponderError::dataset(format!(
                "unsupported FAQ file type '.{}' (expected .csv, .xlsx or .jsonl)",
                other
            )));
        }
    };

    tracing::info!("Loaded {} FAQ entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Question and answer column positions in a header row.
struct Columns {
    question: usize,
    answer: usize,
}

impl Columns {
    fn locate<S: AsRef<str>>(headers: &[S], source: &str) -> ResponderResult<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.contains(&h.as_ref().trim().to_ascii_lowercase().as_str()))
        };
        let question = find(QUESTION_HEADERS).ok_or_else(|| {
            ResponderError::dataset(format!("{source} has no 'question' (or 'User Query') column"))
        })?;
        let answer = find(ANSWER_HEADERS).ok_or_else(|| {
            ResponderError::dataset(format!("{source} has no 'answer' (or 'Product Responses') column"))
        })?;
        Ok(Self { question, answer })
    }

    /// `None` when the row has no question.
    fn entry<S: AsRef<str>>(&self, row: &[S]) -> Option<FaqEntry> {
        let cell = |i: usize| row.get(i).map(|c| c.as_ref().trim()).unwrap_or("");
        let question = cell(self.question);
        if question.is_empty() {
            return None;
        }
        Some(FaqEntry::new(question, cell(self.answer)))
    }
}

pub fn parse_csv<R: std::io::Read>(reader: R) -> ResponderResult<Vec<FaqEntry>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| ResponderError::dataset(format!("unreadable CSV header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();
    let columns = Columns::locate(&headers, "CSV")?;

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for (row, record) in rdr.records().enumerate() {
        let record = record
            .map_err(|e| ResponderError::dataset(format!("CSV row {}: {}", row + 2, e)))?;
        let cells: Vec<&str> = record.iter().collect();
        match columns.entry(&cells) {
            Some(entry) => entries.push(entry),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} CSV rows without a question", skipped);
    }
    Ok(entries)
}

/// Read the first worksheet of a spreadsheet. The first row holds the headers.
pub fn parse_workbook(path: &Path) -> ResponderResult<Vec<FaqEntry>> {
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| ResponderError::dataset(format!("open {}: {}", path.display(), e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ResponderError::dataset(format!("{} has no worksheets", path.display())))?
        .map_err(|e| ResponderError::dataset(format!("read {}: {}", path.display(), e)))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
    let headers = rows.next().unwrap_or_default();
    let columns = Columns::locate(&headers, "Workbook")?;

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        match columns.entry(&row) {
            Some(entry) => entries.push(entry),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} workbook rows without a question", skipped);
    }
    Ok(entries)
}

#[derive(Deserialize)]
struct RawFaq {
    #[serde(default)]
    question: String,
    #[serde(default)]
    answer: Option<String>,
}

pub fn parse_jsonl(text: &str) -> ResponderResult<Vec<FaqEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawFaq = serde_json::from_str(line).map_err(|e| {
            ResponderError::dataset(format!("JSONL line {}: {}", lineno + 1, e))
        })?;
        let question = raw.question.trim();
        if question.is_empty() {
            continue;
        }
        entries.push(FaqEntry::new(
            question,
            raw.answer.as_deref().unwrap_or("").trim(),
        ));
    }
    Ok(entries)
}
