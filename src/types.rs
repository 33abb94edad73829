use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Last row addressable in an xlsx worksheet (1-based)
pub const MAX_ROW: u32 = 1_048_576;
/// Last column addressable in an xlsx worksheet (1-based, `XFD`)
pub const MAX_COLUMN: u32 = 16_384;

//==============================================================================
// Column letters
//==============================================================================

/// Convert a 1-based column index to Excel letters (1→A, 26→Z, 27→AA)
pub fn column_letters(column: u32) -> String {
    let mut result = String::new();
    let mut num = column;

    while num > 0 {
        let remainder = (num - 1) % 26;
        result.insert(0, (b'A' + remainder as u8) as char);
        num = (num - 1) / 26;
    }

    result
}

/// Convert Excel column letters to a 1-based index (A→1, AA→27).
/// Returns `None` for empty input, non-letters or columns past `XFD`.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut index: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        index = index * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    (index <= MAX_COLUMN).then_some(index)
}

/// Split an A1-style coordinate (absolute markers allowed) into `(row, column)`
pub fn split_a1(coordinate: &str) -> Option<(u32, u32)> {
    let coordinate = coordinate.replace('$', "");
    let digits_at = coordinate.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = coordinate.split_at(digits_at);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let column = column_index(letters)?;
    let row: u32 = digits.parse().ok()?;
    (1..=MAX_ROW).contains(&row).then_some((row, column))
}

/// Quote a sheet name the way Excel does when it is not a plain identifier
pub fn quote_sheet_name(sheet: &str) -> String {
    let plain = !sheet.is_empty()
        && !sheet.starts_with(|c: char| c.is_ascii_digit())
        && sheet.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && split_a1(sheet).is_none();
    if plain {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}

//==============================================================================
// Addresses and ranges
//==============================================================================

/// A single cell position. Ordered by (sheet, row, column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub sheet: String,
    pub row: u32,
    pub column: u32,
}

impl CellAddress {
    pub fn new(sheet: impl Into<String>, row: u32, column: u32) -> Self {
        Self {
            sheet: sheet.into(),
            row,
            column,
        }
    }

    /// Build an address from an A1 coordinate on the given sheet
    pub fn parse_a1(sheet: impl Into<String>, coordinate: &str) -> Option<Self> {
        let (row, column) = split_a1(coordinate)?;
        Some(Self::new(sheet, row, column))
    }

    /// Placeholder for a reference with no cell behind it (unknown name,
    /// other workbook). Row and column are 0, outside the 1-based grid.
    pub fn synthetic(label: &str) -> Self {
        Self::new(format!("[{label}]"), 0, 0)
    }

    pub fn is_synthetic(&self) -> bool {
        self.row == 0 || self.column == 0
    }

    /// Label given to [`CellAddress::synthetic`]
    pub fn synthetic_label(&self) -> Option<&str> {
        if !self.is_synthetic() {
            return None;
        }
        self.sheet.strip_prefix('[')?.strip_suffix(']')
    }

    /// The coordinate without the sheet, e.g. `B7`
    pub fn a1(&self) -> String {
        format!("{}{}", column_letters(self.column), self.row)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_synthetic() {
            return write!(f, "{}", self.sheet);
        }
        write!(f, "{}!{}", quote_sheet_name(&self.sheet), self.a1())
    }
}

impl FromStr for CellAddress {
    type Err = String;

    /// Parses `Sheet!A1` or `'My Sheet'!$A$1`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sheet, coordinate) = s
            .rsplit_once('!')
            .ok_or_else(|| format!("'{s}' is missing a sheet name (expected Sheet!A1)"))?;
        let sheet = match sheet.strip_prefix('\'').and_then(|q| q.strip_suffix('\'')) {
            Some(quoted) => quoted.replace("''", "'"),
            None => sheet.to_string(),
        };
        if sheet.is_empty() {
            return Err(format!("'{s}' has an empty sheet name"));
        }
        Self::parse_a1(sheet, coordinate).ok_or_else(|| format!("'{coordinate}' is not a cell coordinate"))
    }
}

/// A rectangular block of cells on one sheet. Bounds are inclusive and normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRange {
    pub sheet: String,
    pub start_row: u32,
    pub start_column: u32,
    pub end_row: u32,
    pub end_column: u32,
}

impl CellRange {
    pub fn new(
        sheet: impl Into<String>,
        (row_a, column_a): (u32, u32),
        (row_b, column_b): (u32, u32),
    ) -> Self {
        Self {
            sheet: sheet.into(),
            start_row: row_a.min(row_b),
            start_column: column_a.min(column_b),
            end_row: row_a.max(row_b),
            end_column: column_a.max(column_b),
        }
    }

    pub fn height(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    pub fn width(&self) -> u32 {
        self.end_column - self.start_column + 1
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.height()) * u64::from(self.width())
    }

    pub fn contains(&self, address: &CellAddress) -> bool {
        address.sheet == self.sheet
            && (self.start_row..=self.end_row).contains(&address.row)
            && (self.start_column..=self.end_column).contains(&address.column)
    }

    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.sheet == other.sheet
            && self.start_row <= other.end_row
            && other.start_row <= self.end_row
            && self.start_column <= other.end_column
            && other.start_column <= self.end_column
    }

    /// Intersection with another block on the same sheet
    pub fn intersect(&self, other: &CellRange) -> Option<CellRange> {
        if !self.overlaps(other) {
            return None;
        }
        Some(CellRange {
            sheet: self.sheet.clone(),
            start_row: self.start_row.max(other.start_row),
            start_column: self.start_column.max(other.start_column),
            end_row: self.end_row.min(other.end_row),
            end_column: self.end_column.min(other.end_column),
        })
    }

    /// Lazily expand the block in row-major order
    pub fn cells(&self) -> impl Iterator<Item = CellAddress> + '_ {
        (self.start_row..=self.end_row).flat_map(move |row| {
            (self.start_column..=self.end_column)
                .map(move |column| CellAddress::new(self.sheet.clone(), row, column))
        })
    }

    /// `A1:C4` style coordinate without the sheet
    pub fn a1(&self) -> String {
        format!(
            "{}{}:{}{}",
            column_letters(self.start_column),
            self.start_row,
            column_letters(self.end_column),
            self.end_row
        )
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", quote_sheet_name(&self.sheet), self.a1())
    }
}

//==============================================================================
// Cell contents
//==============================================================================

/// Typed raw value of a cell
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Spreadsheet error marker such as `#DIV/0!`
    Error(String),
    #[default]
    Empty,
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, CellValue::Text(s) if !s.trim().is_empty())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Number(_) => "number",
            CellValue::Text(_) => "text",
            CellValue::Boolean(_) => "boolean",
            CellValue::Error(_) => "error",
            CellValue::Empty => "empty",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Error(code) => write!(f, "{code}"),
            CellValue::Empty => Ok(()),
        }
    }
}

/// How a cell gets its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellRole {
    /// Literal value, nothing feeds it
    Input,
    /// Computed from a formula (or holding a spreadsheet error)
    Derived,
    /// Referenced but never assigned
    Unknown,
}

/// Formatting that hints at what a cell is for
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StyleHints {
    /// Solid fill colour as `RRGGBB`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default)]
    pub bold: bool,
    /// At least one side has a visible border
    #[serde(default)]
    pub border: bool,
}

impl StyleHints {
    pub fn is_plain(&self) -> bool {
        self.fill.is_none() && !self.bold && !self.border
    }
}

/// Canonical `RRGGBB` form of a colour written as `#rrggbb`, `RRGGBB` or `AARRGGBB`
pub fn normalize_color(color: &str) -> Option<String> {
    let hex = color.trim().trim_start_matches('#').to_ascii_uppercase();
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => Some(hex),
        8 => Some(hex[2..].to_string()),
        _ => None,
    }
}

/// One populated cell of the workbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub address: CellAddress,
    pub value: CellValue,
    /// Formula text with its leading `=`
    pub formula: Option<String>,
    pub role: CellRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleHints>,
    /// Note or comment text attached to the cell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl CellRecord {
    pub fn new(address: CellAddress, value: CellValue, formula: Option<String>) -> Self {
        let formula = formula
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty() && f != "=")
            .map(|f| if f.starts_with('=') { f } else { format!("={f}") });
        let role = if formula.is_some() || value.is_error() {
            CellRole::Derived
        } else {
            CellRole::Input
        };
        Self {
            address,
            value,
            formula,
            role,
            style: None,
            comment: None,
        }
    }

    pub fn has_formula(&self) -> bool {
        self.formula.is_some()
    }
}

//==============================================================================
// Workbook-level objects
//==============================================================================

/// A user-defined label bound to one or more cells
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRange {
    pub name: String,
    /// Definition text as stored in the file, e.g. `Inputs!$B$2:$B$6`
    pub refers_to: String,
    /// Target cells in row-major order, without duplicates. Oversized
    /// ranges are limited to the sheet's used range.
    pub addresses: Vec<CellAddress>,
    /// The definition is a value (`0.05`, `"EUR"`) rather than a reference
    #[serde(default)]
    pub constant: bool,
}

/// A table object declared in the source file (header row included in `range`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredTable {
    pub name: String,
    pub range: CellRange,
    pub columns: Vec<String>,
}

impl DeclaredTable {
    /// Body cells of one column, header excluded
    pub fn column_body(&self, column: &str) -> Option<CellRange> {
        let offset = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column.trim()))? as u32;
        if self.range.height() < 2 {
            return None;
        }
        let column = self.range.start_column + offset;
        Some(CellRange::new(
            self.range.sheet.clone(),
            (self.range.start_row + 1, column),
            (self.range.end_row, column),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_round_trip_edges() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(52), "AZ");
        assert_eq!(column_letters(703), "AAA");
        assert_eq!(column_letters(MAX_COLUMN), "XFD");

        assert_eq!(column_index("A"), Some(1));
        assert_eq!(column_index("az"), Some(52));
        assert_eq!(column_index("XFD"), Some(MAX_COLUMN));
        assert_eq!(column_index("XFE"), None);
        assert_eq!(column_index(""), None);
    }

    #[test]
    fn test_split_a1() {
        assert_eq!(split_a1("B7"), Some((7, 2)));
        assert_eq!(split_a1("$C$10"), Some((10, 3)));
        assert_eq!(split_a1("A0"), None);
        assert_eq!(split_a1("SUM"), None);
        assert_eq!(split_a1("A1B"), None);
    }

    #[test]
    fn test_address_ordering_is_sheet_row_column() {
        let mut cells = vec![
            CellAddress::new("B", 1, 1),
            CellAddress::new("A", 2, 1),
            CellAddress::new("A", 1, 2),
            CellAddress::new("A", 1, 1),
        ];
        cells.sort();
        assert_eq!(
            cells,
            vec![
                CellAddress::new("A", 1, 1),
                CellAddress::new("A", 1, 2),
                CellAddress::new("A", 2, 1),
                CellAddress::new("B", 1, 1),
            ]
        );
    }

    #[test]
    fn test_address_display_and_parse() {
        let plain = CellAddress::new("Sheet1", 3, 2);
        assert_eq!(plain.to_string(), "Sheet1!B3");
        assert_eq!("Sheet1!B3".parse::<CellAddress>(), Ok(plain));

        let quoted = CellAddress::new("Cash Flow", 1, 1);
        assert_eq!(quoted.to_string(), "'Cash Flow'!A1");
        assert_eq!("'Cash Flow'!$A$1".parse::<CellAddress>(), Ok(quoted));

        assert!("B3".parse::<CellAddress>().is_err());
    }

    #[test]
    fn test_range_expansion_is_row_major() {
        let range = CellRange::new("S", (2, 2), (1, 1));
        let cells: Vec<String> = range.cells().map(|c| c.a1()).collect();
        assert_eq!(cells, vec!["A1", "B1", "A2", "B2"]);
        assert_eq!(range.cell_count(), 4);
    }

    #[test]
    fn test_range_overlap() {
        let a = CellRange::new("S", (1, 1), (3, 3));
        let b = CellRange::new("S", (3, 3), (5, 5));
        let c = CellRange::new("S", (4, 1), (5, 2));
        let other_sheet = CellRange::new("T", (1, 1), (3, 3));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!a.overlaps(&other_sheet));
        assert_eq!(a.intersect(&b), Some(CellRange::new("S", (3, 3), (3, 3))));
    }

    #[test]
    fn test_record_role_inference() {
        let input = CellRecord::new(CellAddress::new("S", 1, 1), CellValue::Number(1.0), None);
        assert_eq!(input.role, CellRole::Input);

        let derived = CellRecord::new(
            CellAddress::new("S", 1, 2),
            CellValue::Number(2.0),
            Some("A1*2".to_string()),
        );
        assert_eq!(derived.role, CellRole::Derived);
        assert_eq!(derived.formula.as_deref(), Some("=A1*2"));

        let error = CellRecord::new(
            CellAddress::new("S", 1, 3),
            CellValue::Error("#DIV/0!".to_string()),
            None,
        );
        assert_eq!(error.role, CellRole::Derived);
        assert!(error.value.is_error());
    }

    #[test]
    fn test_normalize_color_forms() {
        assert_eq!(normalize_color("#ffff00").as_deref(), Some("FFFF00"));
        assert_eq!(normalize_color("FFFFFF00").as_deref(), Some("FFFF00"));
        assert_eq!(normalize_color(" 00b050 ").as_deref(), Some("00B050"));
        assert_eq!(normalize_color("yellow"), None);
        assert_eq!(normalize_color("FFF"), None);
    }

    #[test]
    fn test_declared_table_column_body() {
        let table = DeclaredTable {
            name: "Flows".to_string(),
            range: CellRange::new("S", (2, 2), (5, 3)),
            columns: vec!["Year".to_string(), "Cash".to_string()],
        };
        assert_eq!(
            table.column_body("cash"),
            Some(CellRange::new("S", (3, 3), (5, 3)))
        );
        assert_eq!(table.column_body("Missing"), None);
    }
}
