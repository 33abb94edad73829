//! Cell formatting and notes read from the xlsx package
//!
//! calamine exposes values and formulas only. Fill, bold and border hints come
//! from `xl/styles.xml` plus the `s` attribute of each worksheet cell; notes
//! come from the comment parts linked to each worksheet.

use crate::error::{AnalyzerError, AnalyzerResult};
use crate::types::{normalize_color, split_a1, StyleHints};
use quick_xml::encoding::Decoder;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Read, Seek};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/// Formatting and notes of one sheet, keyed by 1-based (row, column)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetAnnotations {
    pub styles: HashMap<(u32, u32), StyleHints>,
    pub comments: HashMap<(u32, u32), String>,
}

/// Read formatting and notes for the named sheets. Sheets whose worksheet part
/// cannot be located get no entry.
pub fn read_annotations<R: Read + Seek>(
    reader: R,
    sheet_names: &[String],
) -> AnalyzerResult<HashMap<String, SheetAnnotations>> {
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| AnalyzerError::Load(format!("Cannot open package: {}", e)))?;

    let styles = read_part(&mut archive, "xl/styles.xml")?
        .map(|xml| parse_styles(&xml))
        .unwrap_or_default();
    let workbook_xml = read_part(&mut archive, "xl/workbook.xml")?.unwrap_or_default();
    let workbook_rels = read_part(&mut archive, "xl/_rels/workbook.xml.rels")?.unwrap_or_default();
    let sheet_ids = parse_sheet_ids(&workbook_xml);
    let relationships = parse_relationships(&workbook_rels);

    let mut annotations = HashMap::new();
    for name in sheet_names {
        let Some(path) = sheet_ids
            .get(name)
            .and_then(|id| relationships.get(id))
            .map(|rel| part_path("xl", &rel.target))
        else {
            debug!(sheet = %name, "worksheet part not found");
            continue;
        };
        let Some(xml) = read_part(&mut archive, &path)? else {
            continue;
        };

        let mut sheet = SheetAnnotations::default();
        for (position, style_id) in parse_cell_styles(&xml) {
            if let Some(hints) = styles.get(style_id).filter(|h| !h.is_plain()) {
                sheet.styles.insert(position, hints.clone());
            }
        }

        if let Some(rels) = read_part(&mut archive, &rels_path(&path))? {
            let comment_parts: Vec<String> = parse_relationships(&rels)
                .into_values()
                .filter(|rel| rel.kind.ends_with("/comments"))
                .map(|rel| part_path(parent_dir(&path), &rel.target))
                .collect();
            for part in comment_parts {
                if let Some(xml) = read_part(&mut archive, &part)? {
                    sheet.comments.extend(parse_comments(&xml));
                }
            }
        }

        debug!(
            sheet = %name,
            styled = sheet.styles.len(),
            comments = sheet.comments.len(),
            "annotations read"
        );
        annotations.insert(name.clone(), sheet);
    }
    Ok(annotations)
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> AnalyzerResult<Option<String>> {
    let mut file = match archive.by_name(path) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(AnalyzerError::Load(format!("Cannot read '{}': {}", path, e))),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(Some(content))
}

// =============================================================================
// Package paths and relationships
// =============================================================================

struct Relationship {
    kind: String,
    target: String,
}

/// Resolve a relationship target against the directory of its source part
fn part_path(base: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// `xl/worksheets/sheet1.xml` → `xl/worksheets/_rels/sheet1.xml.rels`
fn rels_path(path: &str) -> String {
    let (dir, file) = path.rsplit_once('/').unwrap_or(("", path));
    format!("{}/_rels/{}.rels", dir, file)
}

fn attribute(element: &BytesStart, key: &[u8], decoder: Decoder) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.decode_and_unescape_value(decoder).ok())
        .map(|v| v.into_owned())
}

/// Sheet name → relationship id, from `xl/workbook.xml`
fn parse_sheet_ids(xml: &str) -> HashMap<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut ids = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let decoder = reader.decoder();
                let name = attribute(&e, b"name", decoder);
                let id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"id")
                    .and_then(|a| a.decode_and_unescape_value(decoder).ok())
                    .map(|v| v.into_owned());
                if let (Some(name), Some(id)) = (name, id) {
                    ids.insert(name, id);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    ids
}

fn parse_relationships(xml: &str) -> HashMap<String, Relationship> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut relationships = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Relationship" => {
                let decoder = reader.decoder();
                let id = attribute(&e, b"Id", decoder);
                let target = attribute(&e, b"Target", decoder);
                let kind = attribute(&e, b"Type", decoder).unwrap_or_default();
                if let (Some(id), Some(target)) = (id, target) {
                    relationships.insert(id, Relationship { kind, target });
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    relationships
}

// =============================================================================
// styles.xml
// =============================================================================

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Fonts,
    Fills,
    Borders,
    CellXfs,
    Other,
}

/// Font, fill and border indexes of one `<xf>` in `<cellXfs>`
#[derive(Default)]
struct XfRef {
    font: usize,
    fill: usize,
    border: usize,
}

/// One [`StyleHints`] per cell format, indexed like the `s` attribute of cells
fn parse_styles(xml: &str) -> Vec<StyleHints> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut section = Section::Other;
    let mut bold_fonts: Vec<bool> = Vec::new();
    let mut fills: Vec<Option<String>> = Vec::new();
    let mut patterned = false;
    let mut borders: Vec<bool> = Vec::new();
    let mut xfs: Vec<XfRef> = Vec::new();

    loop {
        let element = match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => e,
            Ok(Event::End(e)) => {
                if matches!(
                    e.local_name().as_ref(),
                    b"fonts" | b"fills" | b"borders" | b"cellXfs"
                ) {
                    section = Section::Other;
                }
                continue;
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => continue,
        };
        let decoder = reader.decoder();
        let index = |key: &[u8]| {
            attribute(&element, key, decoder)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0)
        };

        match (section, element.local_name().as_ref()) {
            (_, b"fonts") => section = Section::Fonts,
            (_, b"fills") => section = Section::Fills,
            (_, b"borders") => section = Section::Borders,
            (_, b"cellXfs") => section = Section::CellXfs,
            (Section::Fonts, b"font") => bold_fonts.push(false),
            (Section::Fonts, b"b") => {
                let on = attribute(&element, b"val", decoder)
                    .map_or(true, |v| v != "0" && v != "false");
                if let Some(last) = bold_fonts.last_mut() {
                    *last = on;
                }
            }
            (Section::Fills, b"fill") => {
                fills.push(None);
                patterned = false;
            }
            (Section::Fills, b"patternFill") => {
                patterned = attribute(&element, b"patternType", decoder)
                    .is_some_and(|p| p != "none");
            }
            (Section::Fills, b"fgColor") if patterned => {
                let color = attribute(&element, b"rgb", decoder).and_then(|c| normalize_color(&c));
                if let Some(last) = fills.last_mut() {
                    *last = color;
                }
            }
            (Section::Borders, b"border") => borders.push(false),
            (Section::Borders, b"left" | b"right" | b"top" | b"bottom" | b"start" | b"end") => {
                let visible = attribute(&element, b"style", decoder).is_some_and(|s| s != "none");
                if let Some(last) = borders.last_mut() {
                    *last |= visible;
                }
            }
            (Section::CellXfs, b"xf") => xfs.push(XfRef {
                font: index(b"fontId"),
                fill: index(b"fillId"),
                border: index(b"borderId"),
            }),
            _ => {}
        }
    }

    xfs.iter()
        .map(|xf| StyleHints {
            fill: fills.get(xf.fill).cloned().flatten(),
            bold: bold_fonts.get(xf.font).copied().unwrap_or(false),
            border: borders.get(xf.border).copied().unwrap_or(false),
        })
        .collect()
}

// =============================================================================
// Worksheets and comments
// =============================================================================

/// (row, column) → cell format index for every `<c>` carrying an `s` attribute
fn parse_cell_styles(xml: &str) -> Vec<((u32, u32), usize)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut cells = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                let decoder = reader.decoder();
                let position = attribute(&e, b"r", decoder).and_then(|r| split_a1(&r));
                let style = attribute(&e, b"s", decoder).and_then(|s| s.parse::<usize>().ok());
                if let (Some(position), Some(style)) = (position, style) {
                    cells.push((position, style));
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    cells
}

fn push_entity(text: &mut String, entity: &BytesRef) {
    if let Ok(Some(c)) = entity.resolve_char_ref() {
        text.push(c);
    } else if let Some(resolved) = entity
        .decode()
        .ok()
        .and_then(|name| resolve_predefined_entity(&name))
    {
        text.push_str(resolved);
    }
}

/// (row, column) → note text from a comments part
fn parse_comments(xml: &str) -> Vec<((u32, u32), String)> {
    let mut reader = Reader::from_str(xml);
    let mut comments = Vec::new();
    let mut current: Option<((u32, u32), String)> = None;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"comment" => {
                    current = attribute(&e, b"ref", reader.decoder())
                        .and_then(|r| split_a1(&r))
                        .map(|position| (position, String::new()));
                }
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"comment" => {
                    if let Some((position, text)) = current.take() {
                        comments.push((position, text.trim().to_string()));
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                if let (Some((_, text)), Ok(content)) = (current.as_mut(), e.decode()) {
                    text.push_str(&content);
                }
            }
            Ok(Event::GeneralRef(e)) if in_text => {
                if let Some((_, text)) = current.as_mut() {
                    push_entity(text, &e);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    comments
}
