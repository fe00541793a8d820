//! Best-effort parsing of a captured request body.
//!
//! The parse strategy is chosen from the request content type. Any failure
//! degrades to [`ParsedBody::Empty`]; parsing never errors out.

use serde_json::{Map, Value};

/// Request body after content-type driven parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// `*json*` content type that parsed as JSON.
    Json(Value),

    /// `*form*` content type (url-encoded or multipart), string values only.
    Form(Map<String, Value>),

    /// Any other content type with a non-empty body.
    Text(String),

    /// No body, or the body could not be parsed.
    Empty,
}

impl ParsedBody {
    /// Parse `bytes` according to `content_type`.
    pub fn parse(content_type: &str, bytes: &[u8]) -> Self {
        let lowered = content_type.to_lowercase();

        if lowered.contains("json") {
            match serde_json::from_slice::<Value>(bytes) {
                Ok(value) => ParsedBody::Json(value),
                Err(_) => ParsedBody::Empty,
            }
        } else if lowered.contains("form") {
            let fields = if lowered.contains("multipart") {
                boundary(content_type).and_then(|b| parse_multipart(bytes, &b))
            } else {
                Some(parse_urlencoded(bytes))
            };
            fields.map(ParsedBody::Form).unwrap_or(ParsedBody::Empty)
        } else {
            let text = String::from_utf8_lossy(bytes);
            if text.is_empty() {
                ParsedBody::Empty
            } else {
                ParsedBody::Text(text.into_owned())
            }
        }
    }

    /// True for JSON and form bodies, the only kinds field extraction reads.
    pub fn is_structured(&self) -> bool {
        matches!(self, ParsedBody::Json(_) | ParsedBody::Form(_))
    }

    /// Look up a top-level field of a structured body.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            ParsedBody::Json(Value::Object(map)) | ParsedBody::Form(map) => map.get(key),
            _ => None,
        }
    }

    /// The body as a JSON value, for generic telemetry payloads.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            ParsedBody::Json(value) => Some(value.clone()),
            ParsedBody::Form(map) => Some(Value::Object(map.clone())),
            _ => None,
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedBody::Json(_) => "json",
            ParsedBody::Form(_) => "form",
            ParsedBody::Text(_) => "text",
            ParsedBody::Empty => "none",
        }
    }
}

fn parse_urlencoded(bytes: &[u8]) -> Map<String, Value> {
    url::form_urlencoded::parse(bytes)
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

/// Extract the `boundary` parameter from a multipart content type.
fn boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (name, value) = param.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Parse a `multipart/form-data` body into name/value pairs.
///
/// File parts (those carrying a `filename`) map to an empty string.
fn parse_multipart(bytes: &[u8], boundary: &str) -> Option<Map<String, Value>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut fields = Map::new();
    let mut pos = find(bytes, delimiter, 0)? + delimiter.len();

    loop {
        if bytes[pos..].starts_with(b"--") {
            break;
        }
        let next = find(bytes, delimiter, pos)?;
        let part = trim_crlf(&bytes[pos..next]);

        let header_end = find(part, b"\r\n\r\n", 0)?;
        let headers = String::from_utf8_lossy(&part[..header_end]);
        let content = &part[header_end + 4..];

        if let Some((name, is_file)) = disposition(&headers) {
            let value = if is_file {
                String::new()
            } else {
                String::from_utf8_lossy(content).into_owned()
            };
            fields.insert(name, Value::String(value));
        }

        pos = next + delimiter.len();
    }

    Some(fields)
}

/// Returns the field name and whether the part is a file upload.
fn disposition(headers: &str) -> Option<(String, bool)> {
    let line = headers
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-disposition:"))?;

    let mut name = None;
    let mut is_file = false;
    for param in line.split(';').skip(1) {
        let Some((key, value)) = param.trim().split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(value.trim().trim_matches('"').to_string()),
            "filename" => is_file = true,
            _ => {}
        }
    }
    name.map(|name| (name, is_file))
}

fn trim_crlf(mut part: &[u8]) -> &[u8] {
    if part.starts_with(b"\r\n") {
        part = &part[2..];
    }
    if part.ends_with(b"\r\n") {
        part = &part[..part.len() - 2];
    }
    part
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_body() {
        let body = ParsedBody::parse("application/json; charset=utf-8", br#"{"email":"a@b.c"}"#);
        assert_eq!(body, ParsedBody::Json(json!({"email": "a@b.c"})));
        assert_eq!(body.get("email"), Some(&json!("a@b.c")));
        assert!(body.is_structured());
    }

    #[test]
    fn test_malformed_json_degrades_to_empty() {
        let body = ParsedBody::parse("application/json", b"{not json");
        assert_eq!(body, ParsedBody::Empty);
        assert_eq!(body.kind(), "none");
    }

    #[test]
    fn test_json_array_has_no_fields() {
        let body = ParsedBody::parse("application/json", b"[1,2]");
        assert_eq!(body.get("0"), None);
        assert_eq!(body.to_value(), Some(json!([1, 2])));
    }

    #[test]
    fn test_urlencoded_form_last_value_wins() {
        let body = ParsedBody::parse(
            "application/x-www-form-urlencoded",
            b"user=alice&amount=12%2C50&user=bob",
        );
        assert_eq!(body.get("user"), Some(&json!("bob")));
        assert_eq!(body.get("amount"), Some(&json!("12,50")));
        assert_eq!(body.kind(), "form");
    }

    #[test]
    fn test_multipart_form_with_file_part() {
        let raw = "--XyZ\r\n\
                   Content-Disposition: form-data; name=\"username\"\r\n\r\n\
                   carol\r\n\
                   --XyZ\r\n\
                   Content-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\n\
                   Content-Type: image/png\r\n\r\n\
                   \x01\x02\x03\r\n\
                   --XyZ--\r\n";
        let body = ParsedBody::parse("multipart/form-data; boundary=XyZ", raw.as_bytes());
        assert_eq!(body.get("username"), Some(&json!("carol")));
        assert_eq!(body.get("avatar"), Some(&json!("")));
    }

    #[test]
    fn test_multipart_without_boundary_is_empty() {
        let body = ParsedBody::parse("multipart/form-data", b"--x\r\n");
        assert_eq!(body, ParsedBody::Empty);
    }

    #[test]
    fn test_truncated_multipart_is_empty() {
        let raw = b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue";
        let body = ParsedBody::parse("multipart/form-data; boundary=\"b\"", raw);
        assert_eq!(body, ParsedBody::Empty);
    }

    #[test]
    fn test_text_and_empty() {
        assert_eq!(
            ParsedBody::parse("text/plain", b"hello"),
            ParsedBody::Text("hello".to_string())
        );
        assert_eq!(ParsedBody::parse("", b""), ParsedBody::Empty);
        assert_eq!(ParsedBody::parse("text/plain", b"hello").to_value(), None);
    }
}
