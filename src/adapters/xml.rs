use crate::adapters::json::DocumentWriter;
use crate::adapters::storage::StorageRouter;
use crate::domain::model::{value_to_text, Record, Source};
use crate::domain::ports::{ChunkWriter, Exporter, Importer, RecordStream};
use crate::utils::error::{EtlError, Result};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde_json::{Map, Value};
use std::sync::Arc;

const ROOT: &str = "root";
const ITEM: &str = "item";

/// `<root><item>...</item></root>`: each child of the document element is one record.
/// Leaf text is read as a string, repeated child names become arrays.
pub struct XmlAdapter {
    storage: Arc<StorageRouter>,
}

impl XmlAdapter {
    pub fn new(storage: Arc<StorageRouter>) -> Self {
        Self { storage }
    }
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn into_value(self) -> Value {
        if self.children.is_empty() {
            return Value::String(self.text);
        }
        Value::Object(children_to_map(self.children))
    }

    fn into_record(self) -> Record {
        if self.children.is_empty() {
            return Record::from_pairs([(self.name, Value::String(self.text))]);
        }
        Record::from(children_to_map(self.children))
    }
}

fn children_to_map(children: Vec<Element>) -> Map<String, Value> {
    let mut map = Map::new();
    for child in children {
        let name = child.name.clone();
        let value = child.into_value();
        match map.get_mut(&name) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(name, value);
            }
        }
    }
    map
}

fn parse_document(location: &str, text: &str) -> Result<Option<Element>> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    let attach = |stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element| {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None => *root = Some(element),
        }
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ..Element::default()
            }),
            Ok(Event::Empty(e)) => {
                let element = Element {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Element::default()
                };
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| EtlError::malformed(location, e))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(EtlError::malformed(location, e)),
        }
    }

    if !stack.is_empty() {
        return Err(EtlError::malformed(location, "unclosed element at end of document"));
    }
    Ok(root)
}

/// Keys become element names; characters XML does not allow are replaced.
fn element_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

fn write_value(out: &mut String, key: &str, value: &Value) {
    let name = element_name(key);
    match value {
        Value::Array(values) => {
            for value in values {
                write_value(out, key, value);
            }
        }
        Value::Object(fields) => {
            out.push_str(&format!("<{}>", name));
            for (field, value) in fields {
                write_value(out, field, value);
            }
            out.push_str(&format!("</{}>", name));
        }
        Value::Null => out.push_str(&format!("<{}/>", name)),
        scalar => out.push_str(&format!(
            "<{}>{}</{}>",
            name,
            escape(&value_to_text(scalar)),
            name
        )),
    }
}

fn encode_document(records: &[Record]) -> Result<Vec<u8>> {
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str(&format!("<{}>\n", ROOT));
    for record in records {
        out.push_str(&format!("  <{}>", ITEM));
        for (field, value) in &record.data {
            write_value(&mut out, field, value);
        }
        out.push_str(&format!("</{}>\n", ITEM));
    }
    out.push_str(&format!("</{}>\n", ROOT));
    Ok(out.into_bytes())
}

impl Importer for XmlAdapter {
    fn import(&self, source: &Source) -> Result<RecordStream> {
        let location = source.as_location().ok_or_else(|| {
            EtlError::source_unreadable(&source.describe(), "xml import needs a file location")
        })?;
        let bytes = self
            .storage
            .read(location)
            .map_err(|e| EtlError::source_unreadable(location, e))?;
        let text = std::str::from_utf8(&bytes).map_err(|e| EtlError::malformed(location, e))?;

        let records: Vec<Record> = match parse_document(location, text)? {
            Some(root) => root.children.into_iter().map(Element::into_record).collect(),
            None => Vec::new(),
        };
        Ok(RecordStream::counted(records))
    }
}

impl Exporter for XmlAdapter {
    fn open(&self, destination: &str) -> Result<Box<dyn ChunkWriter + '_>> {
        Ok(Box::new(DocumentWriter::new(
            &self.storage,
            destination,
            encode_document,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested_and_repeated() {
        let xml = r#"<?xml version="1.0"?>
<users>
  <user><name>Alice &amp; Co</name><tag>a</tag><tag>b</tag><address><city>Oslo</city></address></user>
  <user><name><![CDATA[Bob]]></name><note/></user>
</users>"#;
        let root = parse_document("users.xml", xml).unwrap().unwrap();
        let records: Vec<Record> = root.children.into_iter().map(Element::into_record).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_str("name"), Some("Alice & Co"));
        assert_eq!(records[0].get("tag"), Some(&json!(["a", "b"])));
        assert_eq!(records[0].get("address"), Some(&json!({"city": "Oslo"})));
        assert_eq!(records[1].get_str("name"), Some("Bob"));
        assert_eq!(records[1].get_str("note"), Some(""));
    }

    #[test]
    fn test_export_then_import_strings() {
        let adapter = XmlAdapter::new(Arc::new(StorageRouter::with_defaults()));
        let data = vec![
            Record::from_pairs([("name", "Alice"), ("email", "a<b>@example.com")]),
            Record::from_pairs([("name", "Bob"), ("email", "bob@example.com")]),
        ];

        adapter.export(data.clone(), "mem://users.xml").unwrap();
        let imported: Vec<Record> = adapter
            .import(&Source::location("mem://users.xml"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(imported, data);
    }

    #[test]
    fn test_mismatched_tags_are_malformed() {
        assert!(matches!(
            parse_document("bad.xml", "<root><item></root>"),
            Err(EtlError::MalformedSource { .. })
        ));
    }

    #[test]
    fn test_element_name_sanitizes_keys() {
        assert_eq!(element_name("first name"), "first_name");
        assert_eq!(element_name("1st"), "_1st");
    }
}
