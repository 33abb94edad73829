//! Reference extraction from formula tokens
//!
//! Grammar recognised (everything else is skipped as an opaque operand):
//!
//! ```text
//! reference  := [sheet] cell [":" [sheet] cell]
//!             | [sheet] column ":" column
//!             | [sheet] row ":" row
//!             | [sheet] name
//!             | sheet ":" sheet "!" cell [":" cell]
//!             | table "[" selector "]"
//!             | "[" book "]" sheet cell [":" cell]
//! function   := word "(" ... ")"
//! ```

use super::tokenizer::{tokenize, Token};
use crate::types::{column_index, split_a1, CellAddress, CellRange, MAX_ROW};
use serde::{Deserialize, Serialize};

/// A reference as written in the formula, before workbook resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Single cell. `sheet` is the formula's own sheet when unqualified.
    Cell(CellAddress),
    /// Bounded rectangle
    Range(CellRange),
    /// Whole columns `A:C` (1-based, inclusive)
    Columns { sheet: String, start: u32, end: u32 },
    /// Whole rows `2:4` (1-based, inclusive)
    Rows { sheet: String, start: u32, end: u32 },
    /// Same cell or rectangle on every sheet from `first` to `last`
    /// (`Jan:Mar!B2`), in workbook order
    SheetSpan {
        first: String,
        last: String,
        start: (u32, u32),
        end: (u32, u32),
    },
    /// Defined name, optionally sheet-qualified
    Name { sheet: Option<String>, name: String },
    /// Structured table reference `Table[selector]`
    Structured { table: String, selector: String },
    /// Reference into another workbook
    External(String),
}

/// Category of a non-fatal formula problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseWarningKind {
    /// Tokenizer or parenthesis problems
    MalformedFormula,
    /// Formula contains a `#REF!` literal
    BrokenReference,
    /// Defined name not found in the workbook
    UnresolvedName,
    /// Sheet qualifier does not match any sheet
    UnresolvedSheet,
    /// Structured reference that could not be mapped to cells
    StructuredReference,
    /// Reference into another workbook
    ExternalReference,
    /// Oversized range limited to the sheet's used area
    RangeClamped,
}

/// A formula problem found while parsing or resolving, not yet tied to a cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaIssue {
    pub kind: ParseWarningKind,
    pub detail: String,
}

impl FormulaIssue {
    pub fn new(kind: ParseWarningKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// One reference plus the function calls that enclose it (outermost first)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReference {
    pub reference: Reference,
    pub functions: Vec<String>,
}

/// Result of syntactic extraction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFormula {
    pub references: Vec<ExtractedReference>,
    /// Called functions in order of appearance, upper-cased, without duplicates
    pub functions: Vec<String>,
    pub issues: Vec<FormulaIssue>,
}

impl ParsedFormula {
    pub fn has_warnings(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn calls(&self, function: &str) -> bool {
        self.functions.iter().any(|f| f == function)
    }
}

/// Upper-case a function name and drop the `_xlfn.`/`_xlws.` storage prefixes
pub fn normalize_function_name(name: &str) -> String {
    let upper = name.to_ascii_uppercase();
    let stripped = upper
        .strip_prefix("_XLFN.")
        .or_else(|| upper.strip_prefix("_XLWS."))
        .unwrap_or(&upper);
    stripped.strip_prefix("_XLWS.").unwrap_or(stripped).to_string()
}

/// Parameter names of `LET` and `LAMBDA` are stored with this prefix
const PARAMETER_PREFIX: &str = "_XLPM.";

fn local_name(word: &str) -> String {
    let upper = word.to_ascii_uppercase();
    upper
        .strip_prefix(PARAMETER_PREFIX)
        .map(str::to_string)
        .unwrap_or(upper)
}

/// What a bare word denotes in reference position
enum WordShape {
    Cell(u32, u32),
    Column(u32),
    Row(u32),
    Other,
}

fn word_shape(word: &str) -> WordShape {
    if let Some((row, column)) = split_a1(word) {
        return WordShape::Cell(row, column);
    }
    let bare = word.replace('$', "");
    if bare.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(row) = bare.parse::<u32>() {
            if (1..=MAX_ROW).contains(&row) {
                return WordShape::Row(row);
            }
        }
        return WordShape::Other;
    }
    match column_index(&bare) {
        Some(column) => WordShape::Column(column),
        None => WordShape::Other,
    }
}

/// Extract references from formula text. `sheet` qualifies unprefixed references.
pub fn extract_references(formula: &str, sheet: &str) -> ParsedFormula {
    let (tokens, errors) = tokenize(formula);
    let mut parser = ReferenceParser::new(tokens, sheet);
    for error in errors {
        parser.issue(ParseWarningKind::MalformedFormula, error.to_string());
    }
    parser.run();
    parser.finish()
}

/// One open parenthesis
struct Frame {
    /// Function the parenthesis belongs to, if any
    function: Option<String>,
    /// 0-based index of the argument being read
    argument: usize,
}

/// Walks the token stream collecting references and function calls
struct ReferenceParser<'s> {
    tokens: Vec<Token>,
    position: usize,
    sheet: &'s str,
    parens: Vec<Frame>,
    /// Array constant nesting; commas inside do not separate arguments
    braces: usize,
    /// `LET`/`LAMBDA` parameters in scope, with the paren depth declaring them
    locals: Vec<(usize, String)>,
    pending_function: Option<String>,
    result: ParsedFormula,
}

impl<'s> ReferenceParser<'s> {
    fn new(tokens: Vec<Token>, sheet: &'s str) -> Self {
        Self {
            tokens,
            position: 0,
            sheet,
            parens: Vec::new(),
            braces: 0,
            locals: Vec::new(),
            pending_function: None,
            result: ParsedFormula::default(),
        }
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset)
    }

    fn issue(&mut self, kind: ParseWarningKind, detail: impl Into<String>) {
        let issue = FormulaIssue::new(kind, detail);
        if !self.result.issues.contains(&issue) {
            self.result.issues.push(issue);
        }
    }

    fn push_reference(&mut self, reference: Reference) {
        let functions: Vec<String> = self
            .parens
            .iter()
            .filter_map(|frame| frame.function.clone())
            .collect();
        let extracted = ExtractedReference {
            reference,
            functions,
        };
        if !self.result.references.contains(&extracted) {
            self.result.references.push(extracted);
        }
    }

    /// A word directly followed by `,` in a parameter slot of `LET` or `LAMBDA`
    fn declares_local(&self) -> bool {
        if !matches!(self.peek_at(1), Some(Token::Comma)) {
            return false;
        }
        match self.parens.last() {
            Some(Frame {
                function: Some(function),
                argument,
            }) => match function.as_str() {
                "LET" => argument % 2 == 0,
                "LAMBDA" => true,
                _ => false,
            },
            _ => false,
        }
    }

    fn is_local(&self, word: &str) -> bool {
        let name = local_name(word);
        self.locals.iter().any(|(_, local)| *local == name)
    }

    fn run(&mut self) {
        while let Some(token) = self.peek_at(0).cloned() {
            match token {
                Token::OpenParen => {
                    let function = self.pending_function.take();
                    self.parens.push(Frame {
                        function,
                        argument: 0,
                    });
                    self.position += 1;
                }
                Token::CloseParen => {
                    let depth = self.parens.len();
                    if self.parens.pop().is_none() {
                        self.issue(
                            ParseWarningKind::MalformedFormula,
                            "Unbalanced parentheses: unexpected ')'",
                        );
                    }
                    self.locals.retain(|(declared, _)| *declared < depth);
                    self.position += 1;
                }
                Token::Comma => {
                    if self.braces == 0 {
                        if let Some(frame) = self.parens.last_mut() {
                            frame.argument += 1;
                        }
                    }
                    self.position += 1;
                }
                Token::OpenBrace => {
                    self.braces += 1;
                    self.position += 1;
                }
                Token::CloseBrace => {
                    self.braces = self.braces.saturating_sub(1);
                    self.position += 1;
                }
                Token::Word(word) if self.declares_local() => {
                    self.locals.push((self.parens.len(), local_name(&word)));
                    self.position += 1;
                }
                Token::Word(word) => {
                    if matches!(self.peek_at(1), Some(Token::OpenParen)) {
                        let name = normalize_function_name(&word);
                        if !self.result.functions.contains(&name) {
                            self.result.functions.push(name.clone());
                        }
                        self.pending_function = Some(name);
                        self.position += 1;
                    } else if let Some(Token::Bracketed(selector)) = self.peek_at(1).cloned() {
                        self.push_reference(Reference::Structured {
                            table: word,
                            selector,
                        });
                        self.position += 2;
                    } else {
                        let consumed = self.read_operand(None);
                        self.position += consumed.max(1);
                    }
                }
                Token::Number(_) => {
                    let consumed = self.read_operand(None);
                    self.position += consumed.max(1);
                }
                Token::SheetPrefix(sheet) if !sheet.starts_with('[') && sheet.contains(':') => {
                    // Quoted span: 'Jan 24:Mar 24'!B2
                    self.position += 1;
                    let (first, last) = sheet.split_once(':').unwrap_or((sheet.as_str(), ""));
                    let consumed = self.read_span_target(0, first, last);
                    self.position += consumed;
                }
                Token::SheetPrefix(sheet) => {
                    self.position += 1;
                    match self.peek_at(0).cloned() {
                        Some(Token::Word(_)) | Some(Token::Number(_)) => {
                            let consumed = self.read_operand(Some(sheet));
                            self.position += consumed.max(1);
                        }
                        Some(Token::ErrorLiteral(literal)) if literal == "#REF!" => {
                            self.issue(
                                ParseWarningKind::BrokenReference,
                                format!("{}!#REF!", sheet),
                            );
                            self.position += 1;
                        }
                        _ => self.issue(
                            ParseWarningKind::MalformedFormula,
                            format!("Sheet qualifier '{}!' is not followed by a reference", sheet),
                        ),
                    }
                }
                Token::Bracketed(book) => {
                    self.position += 1;
                    self.read_external(&book);
                }
                Token::ErrorLiteral(literal) => {
                    if literal == "#REF!" {
                        self.issue(ParseWarningKind::BrokenReference, "#REF!");
                    }
                    self.position += 1;
                }
                _ => self.position += 1,
            }
        }

        if !self.parens.is_empty() {
            self.issue(
                ParseWarningKind::MalformedFormula,
                format!("Unbalanced parentheses: {} '(' left open", self.parens.len()),
            );
        }
    }

    /// `[book]Sheet!A1[:B2]` or a bare `[@Column]` style selector
    fn read_external(&mut self, book: &str) {
        if let Some(Token::SheetPrefix(sheet)) = self.peek_at(0).cloned() {
            let mut text = format!("[{}]{}!", book, sheet);
            self.position += 1;
            if let Some(Token::Word(first)) = self.peek_at(0).cloned() {
                text.push_str(&first);
                self.position += 1;
                let has_colon = matches!(self.peek_at(0), Some(Token::Colon));
                if let (true, Some(Token::Word(second))) = (has_colon, self.peek_at(1).cloned()) {
                    text.push(':');
                    text.push_str(&second);
                    self.position += 2;
                }
            }
            self.issue(ParseWarningKind::ExternalReference, text.clone());
            self.push_reference(Reference::External(text));
        } else {
            self.issue(
                ParseWarningKind::StructuredReference,
                format!("[{}] without a table name", book),
            );
            self.push_reference(Reference::Structured {
                table: String::new(),
                selector: book.to_string(),
            });
        }
    }

    /// Parse a reference operand at the current position. Returns tokens consumed.
    fn read_operand(&mut self, sheet: Option<String>) -> usize {
        let Some(first) = self.peek_at(0).cloned() else {
            return 0;
        };

        // External workbook hidden inside a quoted prefix: '[Book.xlsx]Sheet'!A1
        if let Some(qualified) = sheet.as_deref() {
            if qualified.starts_with('[') {
                let text = match &first {
                    Token::Word(w) => format!("'{}'!{}", qualified, w),
                    _ => format!("'{}'!", qualified),
                };
                self.issue(ParseWarningKind::ExternalReference, text.clone());
                self.push_reference(Reference::External(text));
                return 1;
            }
        }

        // Sheet span: Jan:Mar!B2
        if sheet.is_none() && matches!(self.peek_at(1), Some(Token::Colon)) {
            if let (Token::Word(first_sheet), Some(Token::SheetPrefix(last_sheet))) =
                (&first, self.peek_at(2).cloned())
            {
                return 3 + self.read_span_target(3, first_sheet, &last_sheet);
            }
        }

        let target_sheet = sheet.clone().unwrap_or_else(|| self.sheet.to_string());
        let first_shape = match &first {
            Token::Word(w) => word_shape(w),
            Token::Number(n) if n.fract() == 0.0 && *n >= 1.0 && *n <= f64::from(MAX_ROW) => {
                WordShape::Row(*n as u32)
            }
            _ => WordShape::Other,
        };

        // Optional `:` [sheet] second part
        let second = match (self.peek_at(1), self.peek_at(2), self.peek_at(3)) {
            (Some(Token::Colon), Some(Token::SheetPrefix(_)), Some(part)) => {
                Some((part.clone(), 4))
            }
            (Some(Token::Colon), Some(part), _) => Some((part.clone(), 3)),
            _ => None,
        };
        let second_shape = second.as_ref().map(|(token, consumed)| {
            let shape = match token {
                Token::Word(w) => word_shape(w),
                Token::Number(n)
                    if n.fract() == 0.0 && *n >= 1.0 && *n <= f64::from(MAX_ROW) =>
                {
                    WordShape::Row(*n as u32)
                }
                _ => WordShape::Other,
            };
            (shape, *consumed)
        });

        match (first_shape, second_shape) {
            (WordShape::Cell(r1, c1), Some((WordShape::Cell(r2, c2), consumed))) => {
                self.push_reference(Reference::Range(CellRange::new(
                    target_sheet,
                    (r1, c1),
                    (r2, c2),
                )));
                consumed
            }
            (WordShape::Cell(row, column), _) => {
                self.push_reference(Reference::Cell(CellAddress::new(target_sheet, row, column)));
                1
            }
            (WordShape::Column(a), Some((WordShape::Column(b), consumed))) => {
                self.push_reference(Reference::Columns {
                    sheet: target_sheet,
                    start: a.min(b),
                    end: a.max(b),
                });
                consumed
            }
            (WordShape::Row(a), Some((WordShape::Row(b), consumed))) => {
                self.push_reference(Reference::Rows {
                    sheet: target_sheet,
                    start: a.min(b),
                    end: a.max(b),
                });
                consumed
            }
            (_, _) => match first {
                Token::Word(word) => {
                    let upper = word.to_ascii_uppercase();
                    if sheet.is_none()
                        && (upper == "TRUE" || upper == "FALSE" || self.is_local(&word))
                    {
                        return 1;
                    }
                    if upper.starts_with(PARAMETER_PREFIX) {
                        return 1;
                    }
                    self.push_reference(Reference::Name { sheet, name: word });
                    1
                }
                _ => 1,
            },
        }
    }

    /// Cell or rectangle after a sheet span prefix, `offset` tokens ahead.
    /// Returns the tokens consumed from there.
    fn read_span_target(&mut self, offset: usize, first: &str, last: &str) -> usize {
        let start = match self.peek_at(offset) {
            Some(Token::Word(word)) => match word_shape(word) {
                WordShape::Cell(row, column) => Some((row, column)),
                _ => None,
            },
            _ => None,
        };
        let Some(start) = start else {
            self.issue(
                ParseWarningKind::MalformedFormula,
                format!("Sheet span '{}:{}!' is not followed by a cell", first, last),
            );
            return 0;
        };

        let end = match (self.peek_at(offset + 1), self.peek_at(offset + 2)) {
            (Some(Token::Colon), Some(Token::Word(word))) => match word_shape(word) {
                WordShape::Cell(row, column) => Some((row, column)),
                _ => None,
            },
            _ => None,
        };
        let (end, consumed) = match end {
            Some(end) => (end, 3),
            None => (start, 1),
        };

        self.push_reference(Reference::SheetSpan {
            first: first.to_string(),
            last: last.to_string(),
            start,
            end,
        });
        consumed
    }

    fn finish(self) -> ParsedFormula {
        self.result
    }
}
