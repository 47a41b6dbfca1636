//! Pulls image references out of provider payloads whose shape varies by
//! provider and by API revision.
//!
//! Candidates are tried in table order and the first one that yields anything wins.
//! Supporting a new response shape means adding a row.

use imagegate_contracts::images::ImageReference;
use serde_json::{Map, Value};

const DEFAULT_INLINE_MEDIA_TYPE: &str = "image/png";
const REMOTE_FIELDS: &[&str] = &["url", "image_url"];
const INLINE_FIELDS: &[&str] = &["b64_json", "base64", "b64", "image_base64"];
const MEDIA_TYPE_FIELDS: &[&str] = &["mime_type", "mimeType", "media_type", "content_type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    List,
    Single,
}

#[derive(Debug, Clone, Copy)]
struct ExtractionCandidate {
    path: &'static [&'static str],
    shape: Shape,
}

const CANDIDATES: &[ExtractionCandidate] = &[
    ExtractionCandidate {
        path: &["data"],
        shape: Shape::List,
    },
    ExtractionCandidate {
        path: &["images"],
        shape: Shape::List,
    },
    ExtractionCandidate {
        path: &["output", "images"],
        shape: Shape::List,
    },
    ExtractionCandidate {
        path: &["output", "data"],
        shape: Shape::List,
    },
    ExtractionCandidate {
        path: &["output", "image_urls"],
        shape: Shape::List,
    },
    ExtractionCandidate {
        path: &["output", "results"],
        shape: Shape::List,
    },
    ExtractionCandidate {
        path: &["result", "images"],
        shape: Shape::List,
    },
    ExtractionCandidate {
        path: &["task_result", "images"],
        shape: Shape::List,
    },
    ExtractionCandidate {
        path: &["output_image"],
        shape: Shape::Single,
    },
    ExtractionCandidate {
        path: &["output", "output_image"],
        shape: Shape::Single,
    },
    ExtractionCandidate {
        path: &["image_url"],
        shape: Shape::Single,
    },
    ExtractionCandidate {
        path: &["url"],
        shape: Shape::Single,
    },
];

/// Image references found in `payload`, in provider order, duplicates kept.
pub fn extract_image_references(payload: &Value) -> Vec<ImageReference> {
    for candidate in CANDIDATES {
        let Some(found) = lookup(payload, candidate.path) else {
            continue;
        };
        let refs: Vec<ImageReference> = match (candidate.shape, found) {
            (Shape::List, Value::Array(rows)) => rows.iter().filter_map(decode_element).collect(),
            (Shape::List, other) | (Shape::Single, other) => {
                decode_element(other).into_iter().collect()
            }
        };
        if !refs.is_empty() {
            return refs;
        }
    }
    Vec::new()
}

fn lookup<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(payload, |node, key| node.as_object()?.get(*key))
}

fn decode_element(element: &Value) -> Option<ImageReference> {
    match element {
        Value::String(raw) => ImageReference::from_raw(raw),
        Value::Object(obj) => decode_object(obj),
        _ => None,
    }
}

fn decode_object(obj: &Map<String, Value>) -> Option<ImageReference> {
    for field in REMOTE_FIELDS {
        let candidate = match obj.get(*field) {
            Some(Value::String(raw)) => Some(raw.as_str()),
            Some(Value::Object(nested)) => nested.get("url").and_then(Value::as_str),
            _ => None,
        };
        if let Some(reference) = candidate.and_then(ImageReference::from_raw) {
            return Some(reference);
        }
    }
    for field in INLINE_FIELDS {
        let Some(data) = obj
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        if let Some(reference @ ImageReference::DataUrl(_)) = ImageReference::from_raw(data) {
            return Some(reference);
        }
        let media_type = MEDIA_TYPE_FIELDS
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|value| value.starts_with("image/"))
            .unwrap_or(DEFAULT_INLINE_MEDIA_TYPE);
        return Some(ImageReference::inline(media_type, data));
    }
    None
}
