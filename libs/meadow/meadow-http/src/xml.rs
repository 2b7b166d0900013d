//! `application/xml` / `text/xml` response bodies are converted to a nested
//! map preserving attributes as `@name` and mixed text as `#text`, so
//! downstream expressions can address XML the same way they address JSON.

use crate::error::HttpError;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

pub fn xml_to_json(bytes: &[u8]) -> Result<Value, HttpError> {
    let mut reader = Reader::from_reader(bytes);
    {
        let config = reader.config_mut();
        config.trim_text_start = true;
        config.trim_text_end = true;
    }
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| HttpError::Encode(format!("xml parse error: {e}")))?
        {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let mut attrs = Map::new();
                for attr in e.attributes().flatten() {
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .unescape_value()
                        .map(|c| c.into_owned())
                        .unwrap_or_default();
                    attrs.insert(key, Value::String(value));
                }
                let node = parse_element(&mut reader, &mut buf, e.name().as_ref().to_vec(), attrs)?;
                let mut root = Map::new();
                root.insert(name, node);
                return Ok(Value::Object(root));
            }
            Event::Eof => {
                return Err(HttpError::Encode("empty xml document".to_string()));
            }
            _ => {}
        }
        buf.clear();
    }
}

fn parse_element(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
    end_tag: Vec<u8>,
    mut attrs: Map<String, Value>,
) -> Result<Value, HttpError> {
    let mut children: Map<String, Value> = Map::new();
    let mut text = String::new();

    loop {
        buf.clear();
        match reader
            .read_event_into(buf)
            .map_err(|e| HttpError::Encode(format!("xml parse error: {e}")))?
        {
            Event::Start(e) => {
                let child_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let mut child_attrs = Map::new();
                for attr in e.attributes().flatten() {
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .unescape_value()
                        .map(|c| c.into_owned())
                        .unwrap_or_default();
                    child_attrs.insert(key, Value::String(value));
                }
                let child_end = e.name().as_ref().to_vec();
                let child_value = parse_element(reader, buf, child_end, child_attrs)?;
                insert_child(&mut children, child_name, child_value);
            }
            Event::Empty(e) => {
                let child_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let mut child_attrs = Map::new();
                for attr in e.attributes().flatten() {
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .unescape_value()
                        .map(|c| c.into_owned())
                        .unwrap_or_default();
                    child_attrs.insert(key, Value::String(value));
                }
                let value = if child_attrs.is_empty() {
                    Value::String(String::new())
                } else {
                    Value::Object(child_attrs)
                };
                insert_child(&mut children, child_name, value);
            }
            Event::Text(e) => {
                let decoded = e
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_default();
                text.push_str(decoded.trim());
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::End(e) => {
                if e.name().as_ref() == end_tag.as_slice() {
                    break;
                }
            }
            Event::Eof => {
                return Err(HttpError::Encode("unexpected eof in xml document".to_string()));
            }
            _ => {}
        }
    }

    if children.is_empty() && attrs.is_empty() {
        return Ok(Value::String(text));
    }

    if !text.is_empty() {
        attrs.insert("#text".to_string(), Value::String(text));
    }
    for (k, v) in children {
        attrs.insert(k, v);
    }
    Ok(Value::Object(attrs))
}

fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(arr)) => arr.push(value),
        Some(existing) => {
            let prev = existing.clone();
            children.insert(name, Value::Array(vec![prev, value]));
        }
        None => {
            children.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_attributes_and_text() {
        let xml = br#"<user id="1"><name>Ada</name></user>"#;
        let value = xml_to_json(xml).unwrap();
        assert_eq!(value["user"]["@id"], Value::String("1".to_string()));
        assert_eq!(value["user"]["name"], Value::String("Ada".to_string()));
    }

    #[test]
    fn repeated_children_become_array() {
        let xml = br#"<list><item>a</item><item>b</item></list>"#;
        let value = xml_to_json(xml).unwrap();
        assert_eq!(
            value["list"]["item"],
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())])
        );
    }

    #[test]
    fn mixed_text_and_attrs_uses_text_key() {
        let xml = br#"<price currency="usd">42</price>"#;
        let value = xml_to_json(xml).unwrap();
        assert_eq!(value["price"]["@currency"], Value::String("usd".into()));
        assert_eq!(value["price"]["#text"], Value::String("42".into()));
    }
}
