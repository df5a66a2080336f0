//! HTML table parsing for the portal's attendance pages.
//!
//! Parsing is a pure function of the document text.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::PortalError;

/// Minimum `<td>` count for an academic data row. The status column is optional.
pub const MIN_ACADEMIC_COLUMNS: usize = 8;
/// Minimum `<td>` count for a biometric data row (S.No, date, status...).
pub const MIN_BIOMETRIC_COLUMNS: usize = 3;

const COL_COURSE_CODE: usize = 1;
const COL_SUBJECT: usize = 2;
const COL_COURSE_TYPE: usize = 3;
const COL_COURSE_CATEGORY: usize = 4;
const COL_CONDUCTED: usize = 5;
const COL_ATTENDED: usize = 6;
const COL_PERCENTAGE: usize = 7;
const COL_STATUS: usize = 8;

const COL_DATE: usize = 1;
const FIRST_BIOMETRIC_STATUS_COL: usize = 2;

static LOGIN_FIELD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[name="txt_pwd"]"#).expect("static selector"));
static ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table tr").expect("static selector"));
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("static selector"));
static ANY_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("static selector"));

/// One course row from the academic attendance table.
#[derive(Debug, Clone, PartialEq)]
pub struct AcademicRow {
    pub course_code: String,
    pub subject_name: String,
    pub course_type: String,
    pub course_category: String,
    pub conducted: u32,
    pub attended: u32,
    /// The percentage printed by the portal, if it parsed.
    pub percentage: Option<f64>,
    pub status: String,
}

/// One day from the biometric log.
#[derive(Debug, Clone, PartialEq)]
pub struct BiometricDay {
    pub date: String,
    pub present: bool,
}

/// Parses the academic attendance page.
///
/// Rows with too few cells are headers or footers and are skipped. Rows whose
/// counts do not parse, or that claim more attended than conducted, are
/// skipped with a warning; if that leaves nothing, the whole document fails.
pub fn parse_academic(html: &str) -> Result<Vec<AcademicRow>, PortalError> {
    let document = Html::parse_document(html);
    ensure_dataset_page(&document, academic_shape)?;

    let mut rows = Vec::new();
    let mut first_failure: Option<String> = None;

    for (index, cells) in data_rows(&document, MIN_ACADEMIC_COLUMNS).enumerate() {
        match academic_row(&cells) {
            Ok(row) => rows.push(row),
            Err(reason) => {
                warn!(row = index, %reason, "Skipping academic row");
                first_failure.get_or_insert(reason);
            }
        }
    }

    match first_failure {
        Some(reason) if rows.is_empty() => Err(PortalError::ParseFailure(reason)),
        _ => {
            debug!(rows = rows.len(), "Parsed academic attendance");
            Ok(rows)
        }
    }
}

/// Parses the biometric log page. Every data row is one day.
pub fn parse_biometric(html: &str) -> Result<Vec<BiometricDay>, PortalError> {
    let document = Html::parse_document(html);
    ensure_dataset_page(&document, biometric_shape)?;

    let days: Vec<BiometricDay> = data_rows(&document, MIN_BIOMETRIC_COLUMNS)
        .map(|cells| BiometricDay {
            date: cells[COL_DATE].clone(),
            present: cells[FIRST_BIOMETRIC_STATUS_COL..]
                .iter()
                .any(|cell| cell.to_lowercase().contains("present")),
        })
        .collect();

    debug!(days = days.len(), "Parsed biometric attendance");
    Ok(days)
}

/// A page that shows the login form, or has no row shaped like the dataset's
/// table, is what the portal serves to a session it no longer knows.
fn ensure_dataset_page(
    document: &Html,
    has_shape: fn(ElementRef<'_>) -> bool,
) -> Result<(), PortalError> {
    if document.select(&LOGIN_FIELD).next().is_some() {
        debug!("Document carries the login form");
        return Err(PortalError::SessionExpired);
    }
    if !document.select(&ROW).any(has_shape) {
        debug!("Document has no attendance table");
        return Err(PortalError::SessionExpired);
    }
    Ok(())
}

fn academic_shape(row: ElementRef<'_>) -> bool {
    row.select(&ANY_CELL).count() >= MIN_ACADEMIC_COLUMNS
}

/// A header row with a "Date" column, or a data row whose date cell holds digits.
fn biometric_shape(row: ElementRef<'_>) -> bool {
    let cells: Vec<ElementRef<'_>> = row.select(&ANY_CELL).collect();
    if cells.len() < MIN_BIOMETRIC_COLUMNS {
        return false;
    }
    let date = cells[COL_DATE];
    let text = cell_text(date);
    if date.value().name() == "th" {
        text.to_lowercase().contains("date")
    } else {
        text.chars().any(|c| c.is_ascii_digit())
    }
}

/// Yields the trimmed cell texts of every row with at least `min_cells` `<td>`s.
fn data_rows(document: &Html, min_cells: usize) -> impl Iterator<Item = Vec<String>> + '_ {
    document
        .select(&ROW)
        .map(|row| row.select(&CELL).map(cell_text).collect::<Vec<_>>())
        .filter(move |cells| cells.len() >= min_cells)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn academic_row(cells: &[String]) -> Result<AcademicRow, String> {
    let conducted = parse_count(&cells[COL_CONDUCTED], "conducted")?;
    let attended = parse_count(&cells[COL_ATTENDED], "attended")?;
    if attended > conducted {
        return Err(format!(
            "attended ({}) exceeds conducted ({}) for {}",
            attended, conducted, cells[COL_COURSE_CODE]
        ));
    }

    Ok(AcademicRow {
        course_code: cells[COL_COURSE_CODE].clone(),
        subject_name: cells[COL_SUBJECT].clone(),
        course_type: cells[COL_COURSE_TYPE].clone(),
        course_category: cells[COL_COURSE_CATEGORY].clone(),
        conducted,
        attended,
        percentage: cells[COL_PERCENTAGE]
            .trim_end_matches('%')
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite()),
        status: cells.get(COL_STATUS).cloned().unwrap_or_default(),
    })
}

fn parse_count(cell: &str, column: &str) -> Result<u32, String> {
    cell.parse::<u32>()
        .map_err(|_| format!("{} count {:?} is not a number", column, cell))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACADEMIC_PAGE: &str = r#"
        <html><body>
        <table class="table">
          <thead>
            <tr><th>S.No</th><th>Course Code</th><th>Course Name</th><th>Type</th>
                <th>Category</th><th>Conducted</th><th>Attended</th><th>%</th><th>Status</th></tr>
          </thead>
          <tbody>
            <tr><td>1</td><td>ACSD01</td><td>Data Structures</td><td>Theory</td>
                <td>Core</td><td>30</td><td>20</td><td>66.67</td><td>Shortage</td></tr>
            <tr><td>2</td><td> ACSD02 </td><td>Operating
                Systems</td><td>Lab</td><td>Core</td><td>30</td><td>28</td><td>93.33%</td><td>Good</td></tr>
            <tr><td colspan="9">Total</td></tr>
          </tbody>
        </table>
        </body></html>
    "#;

    const BIOMETRIC_PAGE: &str = r#"
        <table>
          <tr><th>S.No</th><th>Date</th><th>In</th><th>Out</th><th>Status</th></tr>
          <tr><td>1</td><td>01-07-2025</td><td>09:01</td><td>16:10</td><td>PRESENT</td></tr>
          <tr><td>2</td><td>02-07-2025</td><td>-</td><td>-</td><td>Absent</td></tr>
          <tr><td>3</td><td>03-07-2025</td><td>09:12</td><td>16:02</td><td>Present (late)</td></tr>
          <tr><td>4</td><td>04-07-2025</td><td>-</td><td>-</td><td>Holiday</td></tr>
          <tr><td colspan="5">Summary</td></tr>
        </table>
    "#;

    #[test]
    fn academic_rows_map_columns_in_order() {
        let rows = parse_academic(ACADEMIC_PAGE).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].course_code, "ACSD01");
        assert_eq!(rows[0].subject_name, "Data Structures");
        assert_eq!(rows[0].course_type, "Theory");
        assert_eq!(rows[0].course_category, "Core");
        assert_eq!(rows[0].conducted, 30);
        assert_eq!(rows[0].attended, 20);
        assert_eq!(rows[0].percentage, Some(66.67));
        assert_eq!(rows[0].status, "Shortage");

        assert_eq!(rows[1].course_code, "ACSD02");
        assert_eq!(rows[1].subject_name, "Operating Systems");
        assert_eq!(rows[1].percentage, Some(93.33));
    }

    #[test]
    fn status_column_is_optional() {
        let page = "<table><tr><td>1</td><td>C1</td><td>S</td><td>T</td><td>K</td>\
                    <td>10</td><td>9</td><td>n/a</td></tr></table>";
        let rows = parse_academic(page).unwrap();
        assert_eq!(rows[0].status, "");
        assert_eq!(rows[0].percentage, None);
    }

    #[test]
    fn bad_rows_are_skipped_when_others_parse() {
        let page = "<table>\
            <tr><td>1</td><td>C1</td><td>S</td><td>T</td><td>K</td><td>10</td><td>9</td><td>90</td></tr>\
            <tr><td>2</td><td>C2</td><td>S</td><td>T</td><td>K</td><td>ten</td><td>9</td><td>90</td></tr>\
            <tr><td>3</td><td>C3</td><td>S</td><td>T</td><td>K</td><td>10</td><td>12</td><td>120</td></tr>\
            </table>";
        let rows = parse_academic(page).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].course_code, "C1");
    }

    #[test]
    fn attended_above_conducted_is_not_clamped() {
        let page = "<table><tr><td>1</td><td>C1</td><td>S</td><td>T</td><td>K</td>\
                    <td>10</td><td>12</td><td>120</td></tr></table>";
        match parse_academic(page) {
            Err(PortalError::ParseFailure(reason)) => assert!(reason.contains("exceeds")),
            other => panic!("expected ParseFailure, got {:?}", other),
        }
    }

    #[test]
    fn table_without_data_rows_is_empty_not_an_error() {
        let page = "<table><tr><th>S.No</th><th>Code</th><th>Course</th><th>Type</th>\
                    <th>Category</th><th>Conducted</th><th>Attended</th><th>%</th></tr></table>";
        assert_eq!(parse_academic(page).unwrap(), Vec::new());

        let page = "<table><tr><th>S.No</th><th>Date</th><th>Status</th></tr></table>";
        assert_eq!(parse_biometric(page).unwrap(), Vec::new());
    }

    #[test]
    fn login_page_means_session_expired() {
        let page = r#"<form><input name="txt_uname"><input name="txt_pwd" type="password"></form>"#;
        assert_eq!(parse_academic(page), Err(PortalError::SessionExpired));
        assert_eq!(parse_biometric(page), Err(PortalError::SessionExpired));
    }

    const LOGIN_WITH_LAYOUT_TABLE: &str = r#"
        <html><body>
        <table><tr><td><img src="logo.png"></td><td>IARE</td><td>Samvidha</td></tr></table>
        <form method="post">
          <input name="txt_uname"><input name="txt_pwd" type="password">
        </form>
        </body></html>
    "#;

    #[test]
    fn login_page_with_layout_table_means_session_expired() {
        assert_eq!(
            parse_academic(LOGIN_WITH_LAYOUT_TABLE),
            Err(PortalError::SessionExpired)
        );
        assert_eq!(
            parse_biometric(LOGIN_WITH_LAYOUT_TABLE),
            Err(PortalError::SessionExpired)
        );
    }

    #[test]
    fn unrelated_table_means_session_expired() {
        let page = "<table><tr><td>logo</td><td>IARE</td><td>menu</td></tr></table>";
        assert_eq!(parse_academic(page), Err(PortalError::SessionExpired));
        assert_eq!(parse_biometric(page), Err(PortalError::SessionExpired));
    }

    #[test]
    fn parsing_is_deterministic() {
        assert_eq!(parse_academic(ACADEMIC_PAGE), parse_academic(ACADEMIC_PAGE));
        assert_eq!(parse_biometric(BIOMETRIC_PAGE), parse_biometric(BIOMETRIC_PAGE));
    }

    #[test]
    fn biometric_presence_is_case_insensitive_substring() {
        let days = parse_biometric(BIOMETRIC_PAGE).unwrap();
        assert_eq!(days.len(), 4);
        assert_eq!(
            days.iter().map(|d| d.present).collect::<Vec<_>>(),
            vec![true, false, true, false]
        );
        assert_eq!(days[0].date, "01-07-2025");
    }

    #[test]
    fn date_column_is_not_checked_for_presence() {
        let page = "<table><tr><td>1</td><td>01-07-2025 present</td><td>Absent</td></tr></table>";
        let days = parse_biometric(page).unwrap();
        assert_eq!(days.len(), 1);
        assert!(!days[0].present);
    }
}
