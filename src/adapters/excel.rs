use crate::adapters::json::DocumentWriter;
use crate::adapters::storage::StorageRouter;
use crate::domain::model::{Record, Source};
use crate::domain::ports::{ChunkWriter, Exporter, Importer, RecordStream};
use crate::utils::error::{EtlError, Result};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Number, Value};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use zip::write::{FileOptions, ZipWriter};
use zip::ZipArchive;

const SHEET_PATH: &str = "xl/worksheets/sheet1.xml";
const SHARED_STRINGS_PATH: &str = "xl/sharedStrings.xml";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Minimal `.xlsx` support: the first worksheet, first row as header.
pub struct ExcelAdapter {
    storage: Arc<StorageRouter>,
}

impl ExcelAdapter {
    pub fn new(storage: Arc<StorageRouter>) -> Self {
        Self { storage }
    }
}

fn zip_err(e: zip::result::ZipError) -> EtlError {
    EtlError::IoError(std::io::Error::other(e))
}

fn column_letters(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        letters.push(b'A' + ((n - 1) % 26) as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Widest sheet xlsx allows (column XFD).
const MAX_COLUMNS: usize = 16_384;

/// "AB12" -> Some(27), "12" -> None.
fn column_index(location: &str, reference: &str) -> Result<Option<usize>> {
    let mut n = 0usize;
    let mut letters = 0;
    for b in reference.bytes().take_while(u8::is_ascii_alphabetic) {
        letters += 1;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize))
            .filter(|n| *n <= MAX_COLUMNS)
            .ok_or_else(|| {
                EtlError::malformed(location, format!("cell reference {} is past column XFD", reference))
            })?;
    }
    Ok((letters > 0).then(|| n - 1))
}

fn read_part(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Result<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(zip_err(e)),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(Some(content))
}

fn first_sheet_name(archive: &ZipArchive<Cursor<Vec<u8>>>) -> Option<String> {
    let mut sheets: Vec<&str> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
        .collect();
    sheets.sort();
    if sheets.contains(&SHEET_PATH) {
        return Some(SHEET_PATH.to_string());
    }
    sheets.first().map(|name| name.to_string())
}

fn parse_shared_strings(location: &str, xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| EtlError::malformed(location, e))?;
                if let Some(current) = current.as_mut() {
                    current.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(EtlError::malformed(location, e)),
        }
    }
    Ok(strings)
}

#[derive(Default)]
struct Cell {
    column: usize,
    kind: Option<String>,
    text: String,
}

fn start_cell(location: &str, e: &BytesStart<'_>, next_column: usize) -> Result<Cell> {
    let mut cell = Cell {
        column: next_column,
        ..Cell::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|err| EtlError::malformed(location, err))?;
        let value = attr
            .unescape_value()
            .map_err(|err| EtlError::malformed(location, err))?;
        match attr.key.as_ref() {
            b"r" => {
                if let Some(column) = column_index(location, &value)? {
                    cell.column = column;
                }
            }
            b"t" => cell.kind = Some(value.into_owned()),
            _ => {}
        }
    }
    if cell.column >= MAX_COLUMNS {
        return Err(EtlError::malformed(location, "row has more than 16384 cells"));
    }
    Ok(cell)
}

fn cell_value(cell: Cell, shared: &[String]) -> Value {
    match cell.kind.as_deref() {
        Some("s") => cell
            .text
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map(|s| Value::String(s.clone()))
            .unwrap_or(Value::Null),
        Some("b") => Value::Bool(cell.text.trim() == "1"),
        Some("inlineStr") | Some("str") | Some("e") => Value::String(cell.text),
        _ => {
            let text = cell.text.trim();
            if let Ok(n) = text.parse::<i64>() {
                Value::Number(n.into())
            } else if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
                Value::Number(n)
            } else {
                Value::String(cell.text)
            }
        }
    }
}

fn parse_sheet(location: &str, xml: &str, shared: &[String]) -> Result<Vec<Vec<Value>>> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut row: Option<Vec<Value>> = None;
    let mut cell: Option<Cell> = None;
    let mut in_text = false;

    let place = |row: &mut Vec<Value>, column: usize, value: Value| {
        if row.len() <= column {
            row.resize(column + 1, Value::Null);
        }
        row[column] = value;
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row = Some(Vec::new()),
                b"c" => {
                    let next = row.as_ref().map(Vec::len).unwrap_or(0);
                    cell = Some(start_cell(location, &e, next)?);
                }
                b"v" | b"t" if cell.is_some() => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(Vec::new()),
                b"c" => {
                    // A cell without content still claims its column.
                    let next = row.as_ref().map(Vec::len).unwrap_or(0);
                    let empty = start_cell(location, &e, next)?;
                    if let Some(row) = row.as_mut() {
                        if row.len() <= empty.column {
                            row.resize(empty.column + 1, Value::Null);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| EtlError::malformed(location, e))?;
                if let Some(cell) = cell.as_mut() {
                    cell.text.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_text = false,
                b"c" => {
                    if let (Some(done), Some(row)) = (cell.take(), row.as_mut()) {
                        let column = done.column;
                        place(row, column, cell_value(done, shared));
                    }
                }
                b"row" => rows.extend(row.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(EtlError::malformed(location, e)),
        }
    }
    Ok(rows)
}

fn rows_to_records(rows: Vec<Vec<Value>>) -> Vec<Record> {
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Null => format!("column{}", i + 1),
            Value::String(s) if s.is_empty() => format!("column{}", i + 1),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();

    rows.map(|mut row| {
        row.resize(headers.len(), Value::Null);
        let data: Map<String, Value> = headers.iter().cloned().zip(row).collect();
        Record { data }
    })
    .collect()
}

fn inline_string(reference: &str, text: &str) -> String {
    format!(
        r#"<c r="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        reference,
        escape(text)
    )
}

fn render_cell(reference: &str, value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(format!(
            r#"<c r="{}" t="b"><v>{}</v></c>"#,
            reference,
            if *b { 1 } else { 0 }
        )),
        Value::Number(n) => Some(format!(r#"<c r="{}"><v>{}</v></c>"#, reference, n)),
        Value::String(s) => Some(inline_string(reference, s)),
        nested => Some(inline_string(reference, &nested.to_string())),
    }
}

fn render_sheet(records: &[Record]) -> String {
    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    if let Some(first) = records.first() {
        let columns: Vec<&String> = first.keys().collect();

        sheet.push_str(r#"<row r="1">"#);
        for (i, column) in columns.iter().enumerate() {
            sheet.push_str(&inline_string(&format!("{}1", column_letters(i)), column));
        }
        sheet.push_str("</row>");

        for (n, record) in records.iter().enumerate() {
            let row_number = n + 2;
            sheet.push_str(&format!(r#"<row r="{}">"#, row_number));
            for (i, column) in columns.iter().enumerate() {
                let reference = format!("{}{}", column_letters(i), row_number);
                if let Some(cell) = record.get(column).and_then(|v| render_cell(&reference, v)) {
                    sheet.push_str(&cell);
                }
            }
            sheet.push_str("</row>");
        }
    }
    sheet.push_str("</sheetData></worksheet>");
    sheet
}

fn encode_workbook(records: &[Record]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let parts = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", WORKBOOK.to_string()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        (SHEET_PATH, render_sheet(records)),
    ];
    for (name, content) in parts {
        zip.start_file::<_, ()>(name, FileOptions::default())
            .map_err(zip_err)?;
        zip.write_all(content.as_bytes())?;
    }
    let cursor = zip.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

impl Importer for ExcelAdapter {
    fn import(&self, source: &Source) -> Result<RecordStream> {
        let location = source.as_location().ok_or_else(|| {
            EtlError::source_unreadable(&source.describe(), "excel import needs a file location")
        })?;
        let bytes = self
            .storage
            .read(location)
            .map_err(|e| EtlError::source_unreadable(location, e))?;

        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| EtlError::malformed(location, e))?;
        let shared = match read_part(&mut archive, SHARED_STRINGS_PATH)? {
            Some(xml) => parse_shared_strings(location, &xml)?,
            None => Vec::new(),
        };
        let sheet_name = first_sheet_name(&archive)
            .ok_or_else(|| EtlError::malformed(location, "workbook has no worksheet"))?;
        let sheet = read_part(&mut archive, &sheet_name)?
            .ok_or_else(|| EtlError::malformed(location, "worksheet part missing"))?;

        let rows = parse_sheet(location, &sheet, &shared)?;
        Ok(RecordStream::counted(rows_to_records(rows)))
    }
}

impl Exporter for ExcelAdapter {
    fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>> {
        Ok(Box::new(DocumentWriter::new(
            &self.storage,
            destination,
            encode_workbook,
        )))
    }
}
