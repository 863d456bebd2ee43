//! Query-string codec for GET/HEAD `data`.
//!
//! # Design
//! Nested JSON is flattened the way browser-side `qs` encoders do it:
//! `{"a": {"b": "c"}}` becomes `a[b]=c` (or `a.b=c` with `allow_dots`) and
//! arrays follow [`ArrayFormat`]. `parse` is the inverse for the same
//! options. Every leaf comes back as a string, so only string-leaved data
//! round-trips exactly. With [`ArrayFormat::Comma`] a string leaf that itself
//! contains `,` comes back split into an array. Sparse indices are compacted
//! on parse, so `a[1]=x` yields `["x"]`.
//!
//! Percent-encoding goes through `url::form_urlencoded`, then the
//! form-encoding quirks (`+` for space, bare `*`, escaped `~`) are rewritten
//! for RFC 3986 output.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use url::form_urlencoded;

/// Indices above this parse as object keys rather than growing an array.
const ARRAY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayFormat {
    /// `a[0]=x&a[1]=y`
    #[default]
    Indices,
    /// `a[]=x&a[]=y`
    Brackets,
    /// `a=x&a=y`
    Repeat,
    /// `a=x,y`
    Comma,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// Space encodes as `%20`.
    #[default]
    #[serde(rename = "RFC3986")]
    Rfc3986,
    /// Space encodes as `+`.
    #[serde(rename = "RFC1738")]
    Rfc1738,
}

/// Serialization settings, read from the `qs` / `qsOptions` request option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QsOptions {
    pub array_format: ArrayFormat,
    pub allow_dots: bool,
    pub encode: bool,
    pub encode_values_only: bool,
    pub skip_nulls: bool,
    pub strict_null_handling: bool,
    pub format: Format,
    pub delimiter: String,
}

impl Default for QsOptions {
    fn default() -> Self {
        Self {
            array_format: ArrayFormat::default(),
            allow_dots: false,
            encode: true,
            encode_values_only: false,
            skip_nulls: false,
            strict_null_handling: false,
            format: Format::default(),
            delimiter: "&".to_string(),
        }
    }
}

impl ArrayFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ArrayFormat::Indices => "indices",
            ArrayFormat::Brackets => "brackets",
            ArrayFormat::Repeat => "repeat",
            ArrayFormat::Comma => "comma",
        }
    }
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Rfc3986 => "RFC3986",
            Format::Rfc1738 => "RFC1738",
        }
    }
}

/// The `qs` option object, keyed the way [`QsOptions`] deserializes.
impl From<QsOptions> for Value {
    fn from(options: QsOptions) -> Self {
        json!({
            "arrayFormat": options.array_format.as_str(),
            "allowDots": options.allow_dots,
            "encode": options.encode,
            "encodeValuesOnly": options.encode_values_only,
            "skipNulls": options.skip_nulls,
            "strictNullHandling": options.strict_null_handling,
            "format": options.format.as_str(),
            "delimiter": options.delimiter,
        })
    }
}

/// Encode `value` as a query string (without the leading `?`).
///
/// Objects and arrays at the top level contribute their entries; scalars
/// encode to an empty string.
pub fn stringify(value: &Value, options: &QsOptions) -> String {
    let mut parts = Vec::new();
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                walk(&mut parts, key.clone(), v, options);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                walk(&mut parts, i.to_string(), v, options);
            }
        }
        _ => {}
    }
    parts.join(&options.delimiter)
}

fn walk(parts: &mut Vec<String>, prefix: String, value: &Value, options: &QsOptions) {
    match value {
        Value::Null => {
            if options.skip_nulls {
                return;
            }
            let key = encode_key(&prefix, options);
            if options.strict_null_handling {
                parts.push(key);
            } else {
                parts.push(format!("{key}="));
            }
        }
        Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            let key = encode_key(&prefix, options);
            let val = encode_value(&scalar_text(value), options);
            parts.push(format!("{key}={val}"));
        }
        Value::Array(items) => {
            if options.array_format == ArrayFormat::Comma && items.iter().all(is_scalar) {
                if items.is_empty() {
                    return;
                }
                let joined = items.iter().map(scalar_text).collect::<Vec<_>>().join(",");
                let key = encode_key(&prefix, options);
                parts.push(format!("{key}={}", encode_value(&joined, options)));
                return;
            }
            for (i, item) in items.iter().enumerate() {
                let child = match options.array_format {
                    ArrayFormat::Brackets => format!("{prefix}[]"),
                    ArrayFormat::Repeat => prefix.clone(),
                    ArrayFormat::Indices | ArrayFormat::Comma => format!("{prefix}[{i}]"),
                };
                walk(parts, child, item, options);
            }
        }
        Value::Object(map) => {
            for (key, v) in map {
                let child = if options.allow_dots {
                    format!("{prefix}.{key}")
                } else {
                    format!("{prefix}[{key}]")
                };
                walk(parts, child, v, options);
            }
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn encode_key(key: &str, options: &QsOptions) -> String {
    if options.encode && !options.encode_values_only {
        percent_encode(key, options.format)
    } else {
        key.to_string()
    }
}

fn encode_value(value: &str, options: &QsOptions) -> String {
    if options.encode {
        percent_encode(value, options.format)
    } else {
        value.to_string()
    }
}

fn percent_encode(input: &str, format: Format) -> String {
    let encoded: String = form_urlencoded::byte_serialize(input.as_bytes()).collect();
    let encoded = encoded.replace('*', "%2A").replace("%7E", "~");
    match format {
        // A literal `+` was already escaped as %2B, so every `+` left is a space.
        Format::Rfc3986 => encoded.replace('+', "%20"),
        Format::Rfc1738 => encoded,
    }
}

/// Decode a query string produced by [`stringify`] with the same options.
///
/// A leading `?` is ignored. Repeated keys collect into an array.
pub fn parse(query: &str, options: &QsOptions) -> Map<String, Value> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut root = Value::Object(Map::new());

    for part in query.split(options.delimiter.as_str()) {
        if part.is_empty() {
            continue;
        }
        let Some((key, raw)) = form_urlencoded::parse(part.as_bytes()).next() else {
            continue;
        };
        let value = if !part.contains('=') && options.strict_null_handling {
            Value::Null
        } else if options.array_format == ArrayFormat::Comma && raw.contains(',') {
            Value::Array(raw.split(',').map(|s| Value::String(s.to_string())).collect())
        } else {
            Value::String(raw.into_owned())
        };
        let segments = split_key(&key, options.allow_dots);
        insert(&mut root, &segments, value);
    }
    compact(&mut root);

    match root {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Push,
}

fn split_key(key: &str, allow_dots: bool) -> Vec<Segment> {
    let key = if allow_dots {
        dots_to_brackets(key)
    } else {
        key.to_string()
    };

    let root_end = match key.find('[') {
        Some(0) | None => return vec![Segment::Key(key)],
        Some(i) => i,
    };
    let mut segments = vec![Segment::Key(key[..root_end].to_string())];
    let mut rest = &key[root_end..];

    while let Some(inner_start) = rest.strip_prefix('[') {
        let Some(close) = inner_start.find(']') else {
            break;
        };
        let inner = &inner_start[..close];
        segments.push(if inner.is_empty() {
            Segment::Push
        } else {
            match inner.parse::<usize>() {
                Ok(i) if i <= ARRAY_LIMIT => Segment::Index(i),
                _ => Segment::Key(inner.to_string()),
            }
        });
        rest = &inner_start[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Key(rest.to_string()));
    }
    segments
}

fn dots_to_brackets(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '.' {
            out.push(c);
            continue;
        }
        let mut seg = String::new();
        while let Some(&n) = chars.peek() {
            if n == '.' || n == '[' {
                break;
            }
            seg.push(n);
            chars.next();
        }
        if seg.is_empty() {
            out.push('.');
        } else {
            out.push('[');
            out.push_str(&seg);
            out.push(']');
        }
    }
    out
}

/// Placeholder for array slots no key has filled. Parsed leaves are only
/// strings, nulls, arrays and objects, so a bool never collides with data.
const HOLE: Value = Value::Bool(false);

fn is_hole(value: &Value) -> bool {
    matches!(value, Value::Bool(false))
}

fn compact(value: &mut Value) {
    match value {
        Value::Array(items) => {
            items.retain(|item| !is_hole(item));
            items.iter_mut().for_each(compact);
        }
        Value::Object(map) => {
            map.retain(|_, item| !is_hole(item));
            map.values_mut().for_each(compact);
        }
        _ => {}
    }
}

fn insert(target: &mut Value, segments: &[Segment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    match first {
        Segment::Key(k) => {
            if let Value::Array(items) = target {
                let map = std::mem::take(items)
                    .into_iter()
                    .enumerate()
                    .filter(|(_, v)| !is_hole(v))
                    .map(|(i, v)| (i.to_string(), v))
                    .collect();
                *target = Value::Object(map);
            }
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            let Value::Object(map) = target else {
                return;
            };
            if rest.is_empty() {
                match map.get_mut(k) {
                    Some(existing) => combine(existing, value),
                    None => {
                        map.insert(k.clone(), value);
                    }
                }
            } else {
                let slot = map.entry(k.clone()).or_insert(Value::Null);
                insert(slot, rest, value);
            }
        }
        Segment::Index(i) => {
            if target.is_object() {
                let mut segments = vec![Segment::Key(i.to_string())];
                segments.extend_from_slice(rest);
                insert(target, &segments, value);
                return;
            }
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            let Value::Array(items) = target else {
                return;
            };
            if items.len() <= *i {
                items.resize(*i + 1, HOLE);
            }
            let slot = &mut items[*i];
            if rest.is_empty() {
                if is_hole(slot) || slot.is_null() {
                    *slot = value;
                } else {
                    combine(slot, value);
                }
            } else {
                insert(slot, rest, value);
            }
        }
        Segment::Push => {
            if let Value::Object(map) = target {
                let key = map.len().to_string();
                let mut segments = vec![Segment::Key(key)];
                segments.extend_from_slice(rest);
                insert(target, &segments, value);
                return;
            }
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            let Value::Array(items) = target else {
                return;
            };
            if rest.is_empty() {
                items.push(value);
            } else {
                items.push(Value::Null);
                if let Some(last) = items.last_mut() {
                    insert(last, rest, value);
                }
            }
        }
    }
}

fn combine(existing: &mut Value, value: Value) {
    match existing {
        Value::Array(items) => items.push(value),
        _ => {
            let prev = existing.take();
            *existing = Value::Array(vec![prev, value]);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn with_format(array_format: ArrayFormat) -> QsOptions {
        QsOptions {
            array_format,
            ..QsOptions::default()
        }
    }

    #[test]
    fn flat_object() {
        let qs = stringify(&json!({"manager_id": 2, "active": true}), &QsOptions::default());
        assert_eq!(qs, "manager_id=2&active=true");
    }

    #[test]
    fn nested_object_uses_encoded_brackets() {
        let qs = stringify(&json!({"a": {"b": "c"}}), &QsOptions::default());
        assert_eq!(qs, "a%5Bb%5D=c");
    }

    #[test]
    fn encode_values_only_keeps_brackets() {
        let options = QsOptions {
            encode_values_only: true,
            ..QsOptions::default()
        };
        let qs = stringify(&json!({"a": {"b": "x y"}}), &options);
        assert_eq!(qs, "a[b]=x%20y");
    }

    #[test]
    fn allow_dots_flattens_with_dots() {
        let options = QsOptions {
            allow_dots: true,
            ..QsOptions::default()
        };
        assert_eq!(stringify(&json!({"a": {"b": "c"}}), &options), "a.b=c");
    }

    #[test]
    fn array_formats() {
        let data = json!({"a": ["x", "y"]});
        let plain = |format| {
            let options = QsOptions {
                encode: false,
                ..with_format(format)
            };
            stringify(&data, &options)
        };
        assert_eq!(plain(ArrayFormat::Indices), "a[0]=x&a[1]=y");
        assert_eq!(plain(ArrayFormat::Brackets), "a[]=x&a[]=y");
        assert_eq!(plain(ArrayFormat::Repeat), "a=x&a=y");
        assert_eq!(plain(ArrayFormat::Comma), "a=x,y");
    }

    #[test]
    fn null_handling_variants() {
        let data = json!({"a": null, "b": "1"});
        assert_eq!(stringify(&data, &QsOptions::default()), "a=&b=1");
        let strict = QsOptions {
            strict_null_handling: true,
            ..QsOptions::default()
        };
        assert_eq!(stringify(&data, &strict), "a&b=1");
        let skip = QsOptions {
            skip_nulls: true,
            ..QsOptions::default()
        };
        assert_eq!(stringify(&data, &skip), "b=1");
    }

    #[test]
    fn empty_containers_emit_nothing() {
        assert_eq!(stringify(&json!({"a": [], "b": {}}), &QsOptions::default()), "");
    }

    #[test]
    fn rfc_formats_differ_on_space() {
        let data = json!({"q": "a b*~"});
        assert_eq!(stringify(&data, &QsOptions::default()), "q=a%20b%2A~");
        let rfc1738 = QsOptions {
            format: Format::Rfc1738,
            ..QsOptions::default()
        };
        assert_eq!(stringify(&data, &rfc1738), "q=a+b%2A~");
    }

    #[test]
    fn reserved_characters_are_escaped() {
        let qs = stringify(&json!({"q": "a&b=c+d"}), &QsOptions::default());
        assert_eq!(qs, "q=a%26b%3Dc%2Bd");
    }

    #[test]
    fn options_deserialize_from_camel_case() {
        let options: QsOptions =
            serde_json::from_value(json!({"arrayFormat": "brackets", "allowDots": true})).unwrap();
        assert_eq!(options.array_format, ArrayFormat::Brackets);
        assert!(options.allow_dots);
        assert!(options.encode);
        assert_eq!(options.delimiter, "&");
    }

    #[test]
    fn parse_inverts_stringify_for_string_leaves() {
        let data = json!({
            "manager_id": "2",
            "filter": {"tags": ["a", "b"], "q": "x y&z"},
        });
        for format in [ArrayFormat::Indices, ArrayFormat::Brackets] {
            let options = with_format(format);
            let parsed = parse(&stringify(&data, &options), &options);
            assert_eq!(Value::Object(parsed), data, "{format:?}");
        }
    }

    #[test]
    fn parse_dots_and_comma() {
        let options = QsOptions {
            allow_dots: true,
            array_format: ArrayFormat::Comma,
            ..QsOptions::default()
        };
        let data = json!({"a": {"b": "c", "ids": ["1", "2"]}});
        let parsed = parse(&stringify(&data, &options), &options);
        assert_eq!(Value::Object(parsed), data);
    }

    #[test]
    fn parse_repeated_keys_collect() {
        let parsed = parse("?a=1&a=2&b=3", &QsOptions::default());
        assert_eq!(Value::Object(parsed), json!({"a": ["1", "2"], "b": "3"}));
    }

    #[test]
    fn parse_strict_null() {
        let options = QsOptions {
            strict_null_handling: true,
            ..QsOptions::default()
        };
        assert_eq!(Value::Object(parse("a&b=", &options)), json!({"a": null, "b": ""}));
    }

    #[test]
    fn option_object_reads_back_unchanged() {
        let options = QsOptions {
            array_format: ArrayFormat::Comma,
            allow_dots: true,
            format: Format::Rfc1738,
            delimiter: ";".to_string(),
            ..QsOptions::default()
        };
        let value = Value::from(options.clone());
        assert_eq!(value["arrayFormat"], "comma");
        assert_eq!(value["format"], "RFC1738");
        let back: QsOptions = serde_json::from_value(value).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn comma_parse_splits_leaves_containing_commas() {
        let options = with_format(ArrayFormat::Comma);
        let query = stringify(&json!({"q": "x,y"}), &options);
        assert_eq!(query, "q=x%2Cy");
        assert_eq!(Value::Object(parse(&query, &options)), json!({"q": ["x", "y"]}));
    }

    #[test]
    fn sparse_indices_are_compacted() {
        let options = QsOptions::default();
        assert_eq!(Value::Object(parse("a[1]=x", &options)), json!({"a": ["x"]}));
        assert_eq!(
            Value::Object(parse("a[3]=z&a[0]=x", &options)),
            json!({"a": ["x", "z"]})
        );
        assert_eq!(
            Value::Object(parse("a[2][b]=c", &options)),
            json!({"a": [{"b": "c"}]})
        );
    }

    #[test]
    fn large_indices_become_keys() {
        let parsed = parse("a[100]=x", &QsOptions::default());
        assert_eq!(Value::Object(parsed), json!({"a": {"100": "x"}}));
    }
}
