//! Minimal XML-RPC codec over `serde_json::Value`.
//!
//! Covers the subset the runner speaks: scalars, `nil`, arrays and
//! structs. Struct member order is preserved.

use crate::error::{MinerError, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Number, Value};

/// Encode a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    write(&mut writer, Event::Decl(BytesDecl::new("1.0", None, None)))?;
    start(&mut writer, "methodCall")?;
    text_element(&mut writer, "methodName", method)?;
    start(&mut writer, "params")?;
    for param in params {
        start(&mut writer, "param")?;
        encode_value(&mut writer, param)?;
        end(&mut writer, "param")?;
    }
    end(&mut writer, "params")?;
    end(&mut writer, "methodCall")?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| MinerError::RunnerProtocol(format!("request is not UTF-8: {e}")))
}

fn encode_value(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<()> {
    start(writer, "value")?;
    match value {
        Value::Null => write(writer, Event::Empty(BytesStart::new("nil")))?,
        Value::Bool(b) => text_element(writer, "boolean", if *b { "1" } else { "0" })?,
        Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => text_element(writer, "int", &i.to_string())?,
            None => text_element(writer, "double", &n.to_string())?,
        },
        Value::String(s) => text_element(writer, "string", s)?,
        Value::Array(items) => {
            start(writer, "array")?;
            start(writer, "data")?;
            for item in items {
                encode_value(writer, item)?;
            }
            end(writer, "data")?;
            end(writer, "array")?;
        }
        Value::Object(members) => {
            start(writer, "struct")?;
            for (name, member) in members {
                start(writer, "member")?;
                text_element(writer, "name", name)?;
                encode_value(writer, member)?;
                end(writer, "member")?;
            }
            end(writer, "struct")?;
        }
    }
    end(writer, "value")
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| MinerError::RunnerProtocol(format!("failed to encode request: {e}")))
}

fn start(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    write(writer, Event::Start(BytesStart::new(name)))
}

fn end(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    write(writer, Event::End(BytesEnd::new(name)))
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    start(writer, name)?;
    write(writer, Event::Text(BytesText::new(text)))?;
    end(writer, name)
}

/// Element tree built from the response before interpretation.
#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn protocol(msg: impl Into<String>) -> MinerError {
    MinerError::RunnerProtocol(msg.into())
}

fn parse_tree(xml: &str) -> Result<Node> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Node {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ..Node::default()
            }),
            Ok(Event::Empty(e)) => {
                let node = Node {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Node::default()
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(node) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| protocol(format!("bad text in response: {e}")))?;
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| protocol("unbalanced response document"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(protocol(format!("malformed response: {e}"))),
        }
    }

    if !stack.is_empty() {
        return Err(protocol("truncated response document"));
    }
    root.ok_or_else(|| protocol("empty response document"))
}

/// Decode a `methodResponse` into its single return value.
///
/// A `<fault>` becomes [`MinerError::RunnerProtocol`] carrying the fault
/// code and string.
pub fn decode_response(xml: &str) -> Result<Value> {
    let root = parse_tree(xml)?;
    if root.name != "methodResponse" {
        return Err(protocol(format!("unexpected root element <{}>", root.name)));
    }

    if let Some(fault) = root.child("fault") {
        let value = fault
            .child("value")
            .ok_or_else(|| protocol("fault without value"))
            .and_then(decode_value)?;
        let code = value.get("faultCode").and_then(Value::as_i64).unwrap_or(0);
        let message = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(protocol(format!(
            "Fault code: {code}, Fault string: {message}"
        )));
    }

    root.child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .ok_or_else(|| protocol("response has no return value"))
        .and_then(decode_value)
}

fn decode_value(node: &Node) -> Result<Value> {
    let Some(typed) = node.children.first() else {
        // A bare <value> is a string.
        return Ok(Value::String(node.text.clone()));
    };

    match typed.name.as_str() {
        "string" => Ok(Value::String(typed.text.clone())),
        "int" | "i4" | "i8" => typed
            .text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| protocol(format!("bad integer '{}'", typed.text))),
        "boolean" => match typed.text.trim() {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            other => Err(protocol(format!("bad boolean '{other}'"))),
        },
        "double" => typed
            .text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| protocol(format!("bad double '{}'", typed.text))),
        "dateTime.iso8601" => Ok(Value::String(typed.text.trim().to_string())),
        "base64" => Ok(Value::String(
            typed.text.chars().filter(|c| !c.is_whitespace()).collect(),
        )),
        "nil" => Ok(Value::Null),
        "array" => {
            let data = typed
                .child("data")
                .ok_or_else(|| protocol("array without data"))?;
            data.children
                .iter()
                .filter(|c| c.name == "value")
                .map(decode_value)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        "struct" => {
            let mut members = Map::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member
                    .child("name")
                    .ok_or_else(|| protocol("struct member without name"))?;
                let value = member
                    .child("value")
                    .ok_or_else(|| protocol("struct member without value"))?;
                members.insert(name.text.clone(), decode_value(value)?);
            }
            Ok(Value::Object(members))
        }
        other => Err(protocol(format!("unsupported value type <{other}>"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: &str) -> String {
        format!(
            "<?xml version='1.0'?>\n<methodResponse>\n<params>\n<param>\n{value}\n</param>\n</params>\n</methodResponse>\n"
        )
    }

    #[test]
    fn test_encode_call() {
        let xml = encode_call("scheduler.job_status", &[json!("1234")]).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\"?>"));
        assert!(xml.contains("<methodName>scheduler.job_status</methodName>"));
        assert!(xml.contains("<param><value><string>1234</string></value></param>"));
    }

    #[test]
    fn test_encode_escapes_text() {
        let xml = encode_call("scheduler.submit_job", &[json!("{\"a\": \"<b>\"}")]).unwrap();
        assert!(xml.contains("&lt;b&gt;"));
        assert!(!xml.contains("<b>"));
    }

    #[test]
    fn test_encode_nested() {
        let xml = encode_call("m", &[json!({"n": 5, "l": [true, null]})]).unwrap();
        assert!(xml.contains("<member><name>n</name><value><int>5</int></value></member>"));
        assert!(xml.contains("<array><data><value><boolean>1</boolean></value><value><nil/></value></data></array>"));
    }

    #[test]
    fn test_decode_struct() {
        let xml = response(
            "<value><struct>\n\
             <member><name>job_status</name><value><string>Complete</string></value></member>\n\
             <member><name>bundle_sha1</name><value><string>abc123</string></value></member>\n\
             <member><name>is_pipeline</name><value><boolean>0</boolean></value></member>\n\
             <member><name>count</name><value><int>3</int></value></member>\n\
             <member><name>missing</name><value><nil/></value></member>\n\
             </struct></value>",
        );
        let value = decode_response(&xml).unwrap();
        assert_eq!(
            value,
            json!({
                "job_status": "Complete",
                "bundle_sha1": "abc123",
                "is_pipeline": false,
                "count": 3,
                "missing": null,
            })
        );
    }

    #[test]
    fn test_decode_bare_value_is_string_and_keeps_whitespace() {
        let value = decode_response(&response("<value> spaced </value>")).unwrap();
        assert_eq!(value, json!(" spaced "));
    }

    #[test]
    fn test_decode_array_and_escapes() {
        let xml = response(
            "<value><array><data>\n<value><string>a &amp; b</string></value>\n<value><double>1.5</double></value>\n</data></array></value>",
        );
        assert_eq!(decode_response(&xml).unwrap(), json!(["a & b", 1.5]));
    }

    #[test]
    fn test_decode_fault() {
        let xml = "<?xml version='1.0'?><methodResponse><fault><value><struct>\
                   <member><name>faultCode</name><value><int>404</int></value></member>\
                   <member><name>faultString</name><value><string>Job not found</string></value></member>\
                   </struct></value></fault></methodResponse>";
        let err = decode_response(xml).unwrap_err();
        assert!(matches!(err, MinerError::RunnerProtocol(_)));
        assert_eq!(
            err.to_string(),
            "runner protocol error: Fault code: 404, Fault string: Job not found"
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_response("<methodResponse><params>"),
            Err(MinerError::RunnerProtocol(_))
        ));
        assert!(matches!(
            decode_response("<html>busy</html>"),
            Err(MinerError::RunnerProtocol(_))
        ));
    }
}
