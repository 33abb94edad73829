//! Spreadsheet loading
//!
//! Reads `.xlsx`/`.xlsm`, `.xlsb`, `.xls` and `.ods` files through calamine
//! into the in-memory [`Workbook`](crate::workbook::Workbook) model.

mod importer;
mod styles;

pub use importer::{convert_data, load_bytes, load_path, ExcelImporter, WorkbookFormat};
pub use styles::{read_annotations, SheetAnnotations};
