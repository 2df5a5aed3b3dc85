/// Tabular file parser for invoice spreadsheets.
/// Supports CSV and Excel (XLSX/XLS); the first row is the header row.

use std::io::Cursor;
use csv::ReaderBuilder;
use calamine::{Reader, open_workbook_from_rs, Xlsx, Xls, Data};
use sha2::{Sha256, Digest};
use crate::middleware::error_handling::{Result, AppError};

pub const EMPTY_FILE_MESSAGE: &str = "file is empty";

// ============================================================================
// Public API Models
// ============================================================================

#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file_type: FileType,
    pub file_hash: String,
    pub headers: Vec<String>,
    /// Data rows padded to the header width; blank cells are `None`.
    pub rows: Vec<Vec<Option<String>>>,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct FileMetadata {
    pub original_filename: String,
    pub file_size_bytes: usize,
    pub empty_rows_skipped: usize,
    pub parsing_warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileType {
    Csv,
    Excel,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::Csv => write!(f, "csv"),
            FileType::Excel => write!(f, "xlsx"),
        }
    }
}

// ============================================================================
// File Parser Service
// ============================================================================

pub struct FileParserService;

impl FileParserService {
    pub fn parse(file_data: &[u8], filename: &str) -> Result<ParsedFile> {
        if file_data.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(AppError::InvalidInput(EMPTY_FILE_MESSAGE.to_string()));
        }

        let file_type = Self::detect_file_type(file_data, filename)?;

        tracing::info!(
            "Parsing file: {} ({} bytes, type: {})",
            crate::utils::sanitize_for_log(filename),
            file_data.len(),
            file_type
        );

        let (headers, raw_rows) = match file_type {
            FileType::Csv => Self::read_csv(file_data)?,
            FileType::Excel => Self::read_excel(file_data, filename)?,
        };

        if headers.iter().all(|h| h.is_empty()) {
            return Err(AppError::InvalidInput(EMPTY_FILE_MESSAGE.to_string()));
        }

        let mut rows = Vec::with_capacity(raw_rows.len());
        let mut empty_rows_skipped = 0;
        let mut warnings = Vec::new();

        for (idx, mut row) in raw_rows.into_iter().enumerate() {
            if row.iter().all(Option::is_none) {
                empty_rows_skipped += 1;
                continue;
            }

            if row.len() > headers.len() {
                warnings.push(format!(
                    "Row {} has {} columns, expected {}",
                    idx + 2, // +2 because of header and 0-indexing
                    row.len(),
                    headers.len()
                ));
            }
            if row.len() < headers.len() {
                row.resize(headers.len(), None);
            }

            rows.push(row);
        }

        tracing::info!(
            "Parsed {}: {} rows, {} columns, {} empty rows skipped",
            file_type,
            rows.len(),
            headers.len(),
            empty_rows_skipped
        );

        Ok(ParsedFile {
            file_type,
            file_hash: Self::calculate_hash(file_data),
            headers,
            rows,
            metadata: FileMetadata {
                original_filename: filename.to_string(),
                file_size_bytes: file_data.len(),
                empty_rows_skipped,
                parsing_warnings: warnings,
            },
        })
    }

    /// Detect file type from filename, then magic bytes
    fn detect_file_type(data: &[u8], filename: &str) -> Result<FileType> {
        let filename_lower = filename.to_lowercase();

        if filename_lower.ends_with(".csv") || filename_lower.ends_with(".txt") {
            return Ok(FileType::Csv);
        }

        if filename_lower.ends_with(".xlsx") || filename_lower.ends_with(".xls") {
            return Ok(FileType::Excel);
        }

        // XLSX (ZIP format) starts with PK
        if data.len() >= 4 && &data[0..2] == b"PK" {
            return Ok(FileType::Excel);
        }

        // XLS (OLE format) starts with D0 CF 11 E0
        if data.len() >= 8 && &data[0..8] == b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1" {
            return Ok(FileType::Excel);
        }

        if std::str::from_utf8(data).is_ok() {
            return Ok(FileType::Csv);
        }

        Err(AppError::InvalidInput(
            "Unsupported file format. Please upload CSV or Excel (XLSX/XLS) files.".to_string()
        ))
    }

    fn read_csv(data: &[u8]) -> Result<(Vec<String>, Vec<Vec<Option<String>>>)> {
        let text = String::from_utf8_lossy(data);
        let text = text.trim_start_matches('\u{feff}');
        let delimiter = Self::detect_csv_delimiter(text);

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::InvalidInput(format!("Failed to read CSV headers: {}", e)))?
            .iter()
            .map(|s| s.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            // A malformed record aborts the whole import.
            let record = result.map_err(|e| {
                AppError::InvalidInput(format!("Row {} parsing error: {}", idx + 2, e))
            })?;
            rows.push(record.iter().map(Self::text_cell).collect());
        }

        Ok((headers, rows))
    }

    /// Detect CSV delimiter (comma, tab, semicolon, pipe)
    fn detect_csv_delimiter(text: &str) -> char {
        let first_line = text.lines().next().unwrap_or("");

        let delimiters = [',', '\t', ';', '|'];
        let mut counts: Vec<(char, usize)> = delimiters
            .iter()
            .map(|delim| (*delim, first_line.matches(*delim).count()))
            .collect();

        // Stable sort keeps comma first on ties
        counts.sort_by(|a, b| b.1.cmp(&a.1));

        counts.first().map(|(d, _)| *d).unwrap_or(',')
    }

    fn read_excel(data: &[u8], filename: &str) -> Result<(Vec<String>, Vec<Vec<Option<String>>>)> {
        let range = if filename.to_lowercase().ends_with(".xls") {
            match open_workbook_from_rs::<Xls<_>, _>(Cursor::new(data)) {
                Ok(mut workbook) => Self::first_sheet_xls(&mut workbook)?,
                Err(_) => {
                    let mut workbook = open_workbook_from_rs::<Xlsx<_>, _>(Cursor::new(data))
                        .map_err(|e| AppError::InvalidInput(format!("Failed to open Excel file: {}", e)))?;
                    Self::first_sheet_xlsx(&mut workbook)?
                }
            }
        } else {
            match open_workbook_from_rs::<Xlsx<_>, _>(Cursor::new(data)) {
                Ok(mut workbook) => Self::first_sheet_xlsx(&mut workbook)?,
                Err(_) => {
                    let mut workbook = open_workbook_from_rs::<Xls<_>, _>(Cursor::new(data))
                        .map_err(|e| AppError::InvalidInput(format!("Failed to open Excel file: {}", e)))?;
                    Self::first_sheet_xls(&mut workbook)?
                }
            }
        };

        let mut rows_iter = range.rows();

        let headers = match rows_iter.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| Self::cell_to_string(cell).unwrap_or_default())
                .collect::<Vec<String>>(),
            None => return Err(AppError::InvalidInput(EMPTY_FILE_MESSAGE.to_string())),
        };

        let rows = rows_iter
            .map(|row| row.iter().map(Self::cell_to_string).collect())
            .collect();

        Ok((headers, rows))
    }

    /// Get first sheet range from XLSX workbook
    fn first_sheet_xlsx(workbook: &mut Xlsx<Cursor<&[u8]>>) -> Result<calamine::Range<Data>> {
        let sheet_names = workbook.sheet_names().to_owned();
        let sheet_name = sheet_names
            .first()
            .ok_or_else(|| AppError::InvalidInput("Excel file contains no sheets.".to_string()))?;

        workbook
            .worksheet_range(sheet_name)
            .map_err(|e| AppError::InvalidInput(format!("Failed to parse sheet {}: {}", sheet_name, e)))
    }

    /// Get first sheet range from XLS workbook
    fn first_sheet_xls(workbook: &mut Xls<Cursor<&[u8]>>) -> Result<calamine::Range<Data>> {
        let sheet_names = workbook.sheet_names().to_owned();
        let sheet_name = sheet_names
            .first()
            .ok_or_else(|| AppError::InvalidInput("Excel file contains no sheets.".to_string()))?;

        workbook
            .worksheet_range(sheet_name)
            .map_err(|e| AppError::InvalidInput(format!("Failed to parse sheet {}: {}", sheet_name, e)))
    }

    fn text_cell(raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Convert Excel cell to string
    fn cell_to_string(cell: &Data) -> Option<String> {
        let text = match cell {
            Data::Int(i) => i.to_string(),
            Data::Float(f) => {
                // Whole numbers (folios, NITs) must not carry a trailing ".0"
                let s = format!("{}", f);
                if s.contains('.') && !s.contains('e') {
                    s.trim_end_matches('0').trim_end_matches('.').to_string()
                } else {
                    s
                }
            }
            Data::String(s) => s.trim().to_string(),
            Data::Bool(b) => b.to_string(),
            Data::DateTime(dt) => format!("{}", dt),
            Data::DateTimeIso(s) => s.clone(),
            Data::DurationIso(s) => s.clone(),
            Data::Error(e) => format!("ERROR: {:?}", e),
            Data::Empty => return None,
        };
        Self::text_cell(&text)
    }

    /// SHA256 of the upload, used to recognise re-uploads of the same file
    fn calculate_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}
