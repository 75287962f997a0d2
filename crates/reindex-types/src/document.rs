//! Physical index documents and their keys.

use serde::{Deserialize, Serialize};

use crate::item::{FieldMap, ItemId};

/// Label of one split fragment of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// First fragment, identifier carries no slot suffix
    Main,
    /// Reserved fragment holding attachment text
    Pdf,
    /// Continuation fragment, numbered from 1
    Part(usize),
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Main => write!(f, "main"),
            Slot::Pdf => write!(f, "pdf"),
            Slot::Part(n) => write!(f, "{}", n),
        }
    }
}

/// Identifies one physical index document derived from a logical item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SplitKey {
    pub item_id: ItemId,
    pub locale: String,
    pub slot: Slot,
}

impl SplitKey {
    pub fn new(item_id: ItemId, locale: impl Into<String>, slot: Slot) -> Self {
        Self {
            item_id,
            locale: locale.into(),
            slot,
        }
    }
}

/// Identifier layout of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdFormat {
    /// Opaque encoded form used for all new writes
    Current,
    /// `entity:node/<id>:<locale>[:<slot>]`, kept for deletion and migration
    Legacy,
}

/// Primary key of a document in the index (`objectID`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Payload written to the index: identifier plus a flat field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(rename = "objectID")]
    pub object_id: DocumentId,

    #[serde(flatten)]
    pub fields: FieldMap,
}

impl IndexDocument {
    pub fn new(object_id: DocumentId, fields: FieldMap) -> Self {
        Self { object_id, fields }
    }

    /// Keep only the given fields (the identifier is always kept).
    pub fn project<'a>(&self, keep: impl IntoIterator<Item = &'a str>) -> Self {
        let fields = keep
            .into_iter()
            .filter_map(|name| {
                self.fields
                    .get(name)
                    .map(|v| (name.to_string(), v.clone()))
            })
            .collect();
        Self::new(self.object_id.clone(), fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::FieldValue;

    #[test]
    fn test_slot_display() {
        assert_eq!(Slot::Main.to_string(), "main");
        assert_eq!(Slot::Pdf.to_string(), "pdf");
        assert_eq!(Slot::Part(3).to_string(), "3");
    }

    #[test]
    fn test_slot_ordering() {
        let mut slots = vec![Slot::Part(2), Slot::Pdf, Slot::Main, Slot::Part(1)];
        slots.sort();
        assert_eq!(
            slots,
            vec![Slot::Main, Slot::Pdf, Slot::Part(1), Slot::Part(2)]
        );
    }

    #[test]
    fn test_index_document_json_is_flat() {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), FieldValue::Text("Adapter".into()));
        let doc = IndexDocument::new(DocumentId::new("abc"), fields);

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["objectID"], "abc");
        assert_eq!(json["title"], "Adapter");

        let decoded: IndexDocument = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_project_keeps_only_requested_fields() {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), "A".into());
        fields.insert("body".into(), "B".into());
        let doc = IndexDocument::new(DocumentId::new("x"), fields);

        let projected = doc.project(["title", "summary"]);
        assert_eq!(projected.object_id.as_str(), "x");
        assert_eq!(projected.fields.len(), 1);
        assert!(projected.fields.contains_key("title"));
    }
}
