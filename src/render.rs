use crate::remote::Document;
use serde::{Deserialize, Deserializer, Serialize};

/// Metadata block at the top of a local page file.
///
/// ```text
/// ---
/// id: '1234'
/// title: Release notes
/// ---
/// Body text...
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "id_from_yaml")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

// Hand-edited files often carry `id: 1234` unquoted.
fn id_from_yaml<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!("id must be a string or number, got {:?}", other))),
    }
}

/// Split `raw` into the front matter YAML and the body, without parsing.
pub fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let rest = match raw.strip_prefix("---\n").or_else(|| raw.strip_prefix("---\r\n")) {
        Some(rest) => rest,
        None => return (None, raw),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        if bare == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }
    (None, raw)
}

/// Parse a local file into front matter and body.
///
/// A file without front matter is treated as unsynced with the whole text
/// as its body.
pub fn parse_local(raw: &str) -> Result<(FrontMatter, &str), serde_yaml::Error> {
    match split_front_matter(raw) {
        (Some(yaml), body) if yaml.trim().is_empty() => Ok((FrontMatter::default(), body)),
        (Some(yaml), body) => Ok((serde_yaml::from_str(yaml)?, body)),
        (None, body) => Ok((FrontMatter::default(), body)),
    }
}

pub fn render_local(id: Option<&str>, title: &str, body: &str) -> String {
    let front = FrontMatter {
        id: id.map(str::to_string),
        title: Some(title.to_string()),
    };
    // Serializing two optional strings cannot fail.
    let yaml = serde_yaml::to_string(&front).unwrap_or_default();
    format!("---\n{}---\n{}", yaml, body)
}

pub fn render_document(doc: &Document) -> String {
    render_local(Some(&doc.id), &doc.title, &doc.content)
}

/// File stem for a page title: path separators and control characters
/// removed, surrounding whitespace and dots trimmed.
pub fn file_stem_for(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_then_parse() {
        let raw = render_local(Some("42"), "Release: notes", "line one\n---\nline two\n");
        let (front, body) = parse_local(&raw).unwrap();

        assert_eq!(front.id.as_deref(), Some("42"));
        assert_eq!(front.title.as_deref(), Some("Release: notes"));
        assert_eq!(body, "line one\n---\nline two\n");
    }

    #[test]
    fn test_numeric_looking_id_stays_string() {
        let raw = render_local(Some("007"), "T", "");
        let (front, body) = parse_local(&raw).unwrap();
        assert_eq!(front.id.as_deref(), Some("007"));
        assert_eq!(body, "");
    }

    #[test]
    fn test_unquoted_id_accepted() {
        let (front, body) = parse_local("---\nid: 1234\ntitle: T\n---\nbody").unwrap();
        assert_eq!(front.id.as_deref(), Some("1234"));
        assert_eq!(body, "body");
    }

    #[test]
    fn test_no_front_matter() {
        let (front, body) = parse_local("just text\n").unwrap();
        assert_eq!(front, FrontMatter::default());
        assert_eq!(body, "just text\n");

        let (front, body) = parse_local("---\nunterminated").unwrap();
        assert!(front.id.is_none());
        assert_eq!(body, "---\nunterminated");
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        assert!(parse_local("---\nid: [unclosed\n---\nbody").is_err());
    }

    #[test]
    fn test_render_document() {
        let doc = Document::new("5", "Page", "hello", "DOC");
        let raw = render_document(&doc);
        assert!(raw.starts_with("---\n"));
        assert!(raw.ends_with("---\nhello"));
    }

    #[test]
    fn test_file_stem_for() {
        assert_eq!(file_stem_for("Plain title"), "Plain title");
        assert_eq!(file_stem_for("a/b: c"), "a-b- c");
        assert_eq!(file_stem_for(" .. "), "untitled");
        assert_eq!(file_stem_for("../../etc"), "-..-etc");
    }
}
