//! Turns spreadsheet rows into customer and user records.

use serde::{Deserialize, Serialize};

use super::sheet::SheetGrid;
use super::ImportError;
use crate::validation::{check_max_chars, ValidationError};

pub const USAGE_NO_LEN: usize = 4;
const RAW_USAGE_NO_WITH_CHECK_DIGIT: usize = 14;
const METER_NUMBER_MIN_DIGITS: usize = 4;
pub const USER_CODE_LEN: usize = 7;

pub const CUSTOMER_NAME_MAX_CHARS: usize = 20;
const ROOM_NUMBER_MAX_CHARS: usize = 20;
const BLOCK_NUMBER_MAX_CHARS: usize = 10;
const BUILDING_NUMBER_MAX_CHARS: usize = 10;
const METER_TYPE_MAX_CHARS: usize = 10;
const METER_NUMBER_MAX_CHARS: usize = 20;

const USER_NAME_MAX_CHARS: usize = 150;
const USER_ATTRIBUTE_MAX_CHARS: usize = 50;

pub mod customer_columns {
    pub const USAGE_NO: &str = "ご使用番号";
    pub const NAME: &str = "お名前";
    pub const BUILDING_NUMBER: &str = "棟番号";
    pub const BLOCK_NUMBER: &str = "丁番号";
    pub const METER_TYPE: &str = "メーター種別";
    pub const METER_NUMBER: &str = "メーター番号";
}

pub mod user_columns {
    pub const CODE: &str = "氏名コード";
    pub const LAST_NAME: &str = "姓";
    pub const FIRST_NAME: &str = "名";
    pub const COMPANY: &str = "会社";
    pub const DISTRICT: &str = "地区";
    pub const TEAM: &str = "チーム";
    pub const GROUP: &str = "グループ";
    pub const IS_STAFF: &str = "スタッフ権限";
}

/// A row that could not be staged. `row` is the 1-based spreadsheet row number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRejection {
    pub row: usize,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRows<T> {
    pub rows: Vec<T>,
    pub rejected: Vec<RowRejection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRow {
    pub usage_no: String,
    pub name: String,
    pub room_number: String,
    pub block_number: String,
    pub building_number: String,
    pub meter_type: String,
    pub meter_number: String,
}

impl CustomerRow {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_usage_no(&self.usage_no)?;
        check_max_chars("room_number", &self.room_number, ROOM_NUMBER_MAX_CHARS)?;
        check_max_chars("block_number", &self.block_number, BLOCK_NUMBER_MAX_CHARS)?;
        check_max_chars(
            "building_number",
            &self.building_number,
            BUILDING_NUMBER_MAX_CHARS,
        )?;
        check_max_chars("meter_type", &self.meter_type, METER_TYPE_MAX_CHARS)?;
        check_max_chars("meter_number", &self.meter_number, METER_NUMBER_MAX_CHARS)?;
        Ok(())
    }

    /// Customer name as persisted.
    pub fn stored_name(&self) -> String {
        self.name.chars().take(CUSTOMER_NAME_MAX_CHARS).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub code: String,
    pub last_name: String,
    pub first_name: String,
    pub company: String,
    pub district: String,
    pub team: String,
    pub group: String,
    pub is_staff: bool,
    /// Set once the row has been checked against registered users.
    #[serde(default)]
    pub exists: bool,
}

impl UserRow {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.code.is_empty() {
            return Err(ValidationError::new("code", "code must not be empty"));
        }
        check_max_chars("code", &self.code, USER_CODE_LEN)?;
        check_max_chars("last_name", &self.last_name, USER_NAME_MAX_CHARS)?;
        check_max_chars("first_name", &self.first_name, USER_NAME_MAX_CHARS)?;
        check_max_chars("company", &self.company, USER_ATTRIBUTE_MAX_CHARS)?;
        check_max_chars("district", &self.district, USER_ATTRIBUTE_MAX_CHARS)?;
        check_max_chars("team", &self.team, USER_ATTRIBUTE_MAX_CHARS)?;
        check_max_chars("group", &self.group, USER_ATTRIBUTE_MAX_CHARS)?;
        Ok(())
    }
}

/// Returns `None` for a blank cell. A 14-character input carries a trailing check
/// digit that is dropped before the last four characters are taken.
pub fn normalize_usage_no(raw: &str) -> Option<String> {
    let trimmed: Vec<char> = raw.trim().chars().collect();
    if trimmed.is_empty() {
        return None;
    }

    let significant = if trimmed.len() == RAW_USAGE_NO_WITH_CHECK_DIGIT {
        &trimmed[..trimmed.len() - 1]
    } else {
        &trimmed[..]
    };
    let tail: String = significant[significant.len().saturating_sub(USAGE_NO_LEN)..]
        .iter()
        .collect();
    Some(format!("{tail:0>USAGE_NO_LEN$}"))
}

pub fn check_usage_no(usage_no: &str) -> Result<(), ValidationError> {
    if usage_no.len() != USAGE_NO_LEN || !usage_no.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new(
            "usage_no",
            format!("usage number must be {USAGE_NO_LEN} digits, got '{usage_no}'"),
        ));
    }
    Ok(())
}

pub fn normalize_meter_number(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        format!("{trimmed:0>METER_NUMBER_MIN_DIGITS$}")
    } else {
        trimmed.to_string()
    }
}

/// Returns `None` for a blank cell.
pub fn normalize_user_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("{trimmed:0>USER_CODE_LEN$}"))
}

/// Prefers the building number and falls back to the block number.
pub fn room_number_from(building_number: &str, block_number: &str) -> String {
    if building_number.is_empty() {
        block_number.to_string()
    } else {
        building_number.to_string()
    }
}

struct RowReader<'a> {
    cells: &'a [String],
}

impl RowReader<'_> {
    fn get(&self, index: usize) -> &str {
        self.cells.get(index).map(|cell| cell.trim()).unwrap_or("")
    }
}

fn reject(row: usize, err: ValidationError) -> RowRejection {
    tracing::warn!(row, field = %err.field, message = %err.message, "rejected import row");
    RowRejection {
        row,
        field: err.field,
        message: err.message,
    }
}

// Data rows start on spreadsheet row 2.
fn sheet_row_number(index: usize) -> usize {
    index + 2
}

pub fn parse_customer_rows(grid: &SheetGrid) -> Result<ParsedRows<CustomerRow>, ImportError> {
    use customer_columns::*;

    let usage_col = grid.column(USAGE_NO)?;
    let name_col = grid.column(NAME)?;
    let building_col = grid.column(BUILDING_NUMBER)?;
    let block_col = grid.column(BLOCK_NUMBER)?;
    let meter_type_col = grid.column(METER_TYPE)?;
    let meter_number_col = grid.column(METER_NUMBER)?;

    let mut parsed = ParsedRows {
        rows: Vec::new(),
        rejected: Vec::new(),
    };

    for (index, cells) in grid.rows.iter().enumerate() {
        let reader = RowReader { cells };
        let Some(usage_no) = normalize_usage_no(reader.get(usage_col)) else {
            continue;
        };

        let building_number = reader.get(building_col).to_string();
        let block_number = reader.get(block_col).to_string();
        let row = CustomerRow {
            usage_no,
            name: reader.get(name_col).to_string(),
            room_number: room_number_from(&building_number, &block_number),
            block_number,
            building_number,
            meter_type: reader.get(meter_type_col).to_string(),
            meter_number: normalize_meter_number(reader.get(meter_number_col)),
        };

        match row.validate() {
            Ok(()) => parsed.rows.push(row),
            Err(err) => parsed.rejected.push(reject(sheet_row_number(index), err)),
        }
    }

    Ok(parsed)
}

pub fn parse_user_rows(grid: &SheetGrid) -> Result<ParsedRows<UserRow>, ImportError> {
    use user_columns::*;

    let code_col = grid.column(CODE)?;
    let last_name_col = grid.column(LAST_NAME)?;
    let first_name_col = grid.column(FIRST_NAME)?;
    let company_col = grid.column(COMPANY)?;
    let district_col = grid.column(DISTRICT)?;
    let team_col = grid.column(TEAM)?;
    let group_col = grid.column(GROUP)?;
    let staff_col = grid.column(IS_STAFF)?;

    let mut parsed = ParsedRows {
        rows: Vec::new(),
        rejected: Vec::new(),
    };

    for (index, cells) in grid.rows.iter().enumerate() {
        let reader = RowReader { cells };
        let Some(code) = normalize_user_code(reader.get(code_col)) else {
            continue;
        };

        let row = UserRow {
            code,
            last_name: reader.get(last_name_col).to_string(),
            first_name: reader.get(first_name_col).to_string(),
            company: reader.get(company_col).to_string(),
            district: reader.get(district_col).to_string(),
            team: reader.get(team_col).to_string(),
            group: reader.get(group_col).to_string(),
            is_staff: reader.get(staff_col) == "1",
            exists: false,
        };

        match row.validate() {
            Ok(()) => parsed.rows.push(row),
            Err(err) => parsed.rejected.push(reject(sheet_row_number(index), err)),
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(headers: &[&str], rows: &[&[&str]]) -> SheetGrid {
        SheetGrid {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        }
    }

    fn customer_headers() -> Vec<&'static str> {
        vec!["ご使用番号", "お名前", "棟番号", "丁番号", "メーター種別", "メーター番号"]
    }

    #[test]
    fn usage_no_drops_check_digit_and_keeps_last_four() {
        assert_eq!(normalize_usage_no("00000000001234").as_deref(), Some("0123"));
        assert_eq!(normalize_usage_no(" 987654 ").as_deref(), Some("7654"));
        assert_eq!(normalize_usage_no("42").as_deref(), Some("0042"));
        assert_eq!(normalize_usage_no("   "), None);
    }

    #[test]
    fn usage_no_is_always_four_chars_for_long_inputs() {
        for len in 4..=20 {
            let raw: String = (0..len).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
            let normalized = normalize_usage_no(&raw).unwrap();
            assert_eq!(normalized.len(), 4, "input {raw}");
            let source = if len == 14 { &raw[..13] } else { &raw[..] };
            assert_eq!(normalized, &source[source.len() - 4..]);
        }
    }

    #[test]
    fn meter_number_pads_only_digits() {
        assert_eq!(normalize_meter_number("12"), "0012");
        assert_eq!(normalize_meter_number("123456"), "123456");
        assert_eq!(normalize_meter_number("AB-1"), "AB-1");
        assert_eq!(normalize_meter_number(""), "");
    }

    #[test]
    fn user_code_is_zero_filled() {
        assert_eq!(normalize_user_code(" 123 ").as_deref(), Some("0000123"));
        assert_eq!(normalize_user_code(""), None);
    }

    #[test]
    fn parses_customer_rows_and_rejects_bad_usage_numbers() {
        let headers = customer_headers();
        let grid = grid(
            &headers,
            &[
                &["12345678901234", " 山田 ", "101", "3-2", "G4", "77"],
                &["", "skipped", "", "", "", ""],
                &["12-4", "bad", "", "", "", ""],
                &["5678", "佐藤", "", "3-2", "G6", "A-99"],
            ],
        );

        let parsed = parse_customer_rows(&grid).unwrap();
        assert_eq!(parsed.rows.len(), 2);

        let first = &parsed.rows[0];
        assert_eq!(first.usage_no, "0123");
        assert_eq!(first.name, "山田");
        assert_eq!(first.room_number, "101");
        assert_eq!(first.meter_number, "0077");

        let second = &parsed.rows[1];
        assert_eq!(second.room_number, "3-2");
        assert_eq!(second.meter_number, "A-99");

        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].row, 4);
        assert_eq!(parsed.rejected[0].field, "usage_no");
    }

    #[test]
    fn missing_customer_column_is_reported_by_name() {
        let grid = grid(&["ご使用番号", "お名前"], &[&["1234", "x"]]);
        match parse_customer_rows(&grid) {
            Err(ImportError::MissingColumn { column }) => assert_eq!(column, "棟番号"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn overlong_meter_type_rejects_row() {
        let headers = customer_headers();
        let grid = grid(&headers, &[&["1234", "x", "", "", "TOO-LONG-TYPE", "1"]]);
        let parsed = parse_customer_rows(&grid).unwrap();
        assert!(parsed.rows.is_empty());
        assert_eq!(parsed.rejected[0].field, "meter_type");
    }

    #[test]
    fn stored_name_is_truncated() {
        let row = CustomerRow {
            usage_no: "1234".into(),
            name: "あ".repeat(25),
            room_number: String::new(),
            block_number: String::new(),
            building_number: String::new(),
            meter_type: String::new(),
            meter_number: String::new(),
        };
        assert_eq!(row.stored_name().chars().count(), 20);
    }

    #[test]
    fn parses_user_rows() {
        let grid = grid(
            &["氏名コード", "姓", "名", "会社", "地区", "チーム", "グループ", "スタッフ権限"],
            &[
                &["42", "山田", "太郎", "A社", "北", "1班", "G1", "1"],
                &["", "空", "", "", "", "", "", ""],
                &["1234567", "佐藤", "花子", "B社", "南", "2班", "G2", "0"],
            ],
        );
        let parsed = parse_user_rows(&grid).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].code, "0000042");
        assert!(parsed.rows[0].is_staff);
        assert!(!parsed.rows[1].is_staff);
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn overlong_user_code_is_rejected() {
        let grid = grid(
            &["氏名コード", "姓", "名", "会社", "地区", "チーム", "グループ", "スタッフ権限"],
            &[&["12345678", "", "", "", "", "", "", ""]],
        );
        let parsed = parse_user_rows(&grid).unwrap();
        assert_eq!(parsed.rejected[0].field, "code");
    }
}
