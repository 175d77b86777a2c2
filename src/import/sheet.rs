use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};

use super::ImportError;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const UTF8_BOM: char = '\u{feff}';

/// A worksheet read as text: the first row becomes the header labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetGrid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetGrid {
    pub fn column(&self, label: &str) -> Result<usize, ImportError> {
        self.headers
            .iter()
            .position(|header| header == label)
            .ok_or_else(|| ImportError::MissingColumn {
                column: label.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SheetFormat {
    Xlsx,
    Csv,
}

fn detect_format(file_name: Option<&str>, bytes: &[u8]) -> Option<SheetFormat> {
    let lower = file_name.map(|name| name.to_lowercase());
    match lower.as_deref() {
        Some(name) if name.ends_with(".csv") => Some(SheetFormat::Csv),
        Some(name) if name.ends_with(".xlsx") => Some(SheetFormat::Xlsx),
        _ if bytes.starts_with(ZIP_MAGIC) => Some(SheetFormat::Xlsx),
        _ => None,
    }
}

/// Reads an uploaded `.xlsx` (first worksheet) or `.csv` file.
pub fn read_sheet(file_name: Option<&str>, bytes: &[u8]) -> Result<SheetGrid, ImportError> {
    if bytes.is_empty() {
        return Err(ImportError::MalformedFile("file is empty".to_string()));
    }

    let grid = match detect_format(file_name, bytes) {
        Some(SheetFormat::Xlsx) => read_xlsx(bytes)?,
        Some(SheetFormat::Csv) => read_csv(bytes)?,
        None => {
            return Err(ImportError::MalformedFile(
                "unsupported file type; upload an .xlsx or .csv file".to_string(),
            ))
        }
    };

    if grid.headers.iter().all(|header| header.is_empty()) {
        return Err(ImportError::MalformedFile(
            "spreadsheet has no header row".to_string(),
        ));
    }

    Ok(grid)
}

fn read_xlsx(bytes: &[u8]) -> Result<SheetGrid, ImportError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|err| ImportError::MalformedFile(format!("failed to open workbook: {err}")))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::MalformedFile("workbook contains no sheets".to_string()))?
        .map_err(|err| ImportError::MalformedFile(format!("failed to read sheet: {err}")))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>());

    let headers = rows
        .next()
        .map(|row| row.into_iter().map(|cell| cell.trim().to_string()).collect())
        .unwrap_or_default();

    Ok(SheetGrid {
        headers,
        rows: rows.collect(),
    })
}

fn read_csv(bytes: &[u8]) -> Result<SheetGrid, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|err| ImportError::MalformedFile(format!("failed to read header row: {err}")))?
        .iter()
        .map(|header| header.trim_start_matches(UTF8_BOM).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|err| ImportError::MalformedFile(format!("failed to read row: {err}")))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(SheetGrid { headers, rows })
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) | Data::DateTimeIso(value) | Data::DurationIso(value) => {
            value.clone()
        }
        // Integral numbers lose their ".0" so usage and meter numbers read as typed.
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => (if *value { "1" } else { "0" }).to_string(),
        Data::DateTime(value) => value.as_f64().to_string(),
        Data::Error(err) => format!("#{err:?}"),
    }
}
