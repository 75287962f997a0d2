//! Source-of-truth content items.
//!
//! A [`LogicalItem`] is owned by the content repository and is read-only to
//! the pipeline. One item may expand into zero, one or many index documents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ReindexError;

/// Stable id of a logical item.
///
/// Accepts numeric or string ids. Empty ids, non-positive numeric ids and ids
/// containing the identifier delimiters (`:`, `/`) are rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawItemId", into = "String")]
pub struct ItemId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawItemId {
    Number(i64),
    Text(String),
}

impl TryFrom<RawItemId> for ItemId {
    type Error = ReindexError;

    fn try_from(raw: RawItemId) -> Result<Self, Self::Error> {
        match raw {
            RawItemId::Number(n) => ItemId::parse(&n.to_string()),
            RawItemId::Text(s) => ItemId::parse(&s),
        }
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl ItemId {
    /// Parse and validate an item id.
    pub fn parse(raw: &str) -> Result<Self, ReindexError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(ReindexError::InvalidIdentifier(
                "logical id is empty".to_string(),
            ));
        }
        if let Ok(n) = id.parse::<i64>() {
            if n <= 0 {
                return Err(ReindexError::InvalidIdentifier(format!(
                    "logical id must be positive, got {}",
                    id
                )));
            }
        } else if let Ok(x) = id.parse::<f64>() {
            if x <= 0.0 {
                return Err(ReindexError::InvalidIdentifier(format!(
                    "logical id must be positive, got {}",
                    id
                )));
            }
        }
        if id.contains([':', '/']) || id.contains(char::is_whitespace) {
            return Err(ReindexError::InvalidIdentifier(format!(
                "logical id contains a reserved character: {}",
                id
            )));
        }
        Ok(Self(id.to_string()))
    }

    /// Parse a comma or whitespace separated operator list.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ReindexError> {
        let ids = raw
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(ItemId::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err(ReindexError::InvalidInput("no item ids given".to_string()));
        }
        Ok(ids)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = ReindexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemId::parse(s)
    }
}

/// A single field value.
///
/// The pipeline itself only produces text, numbers, booleans and string
/// lists. Numbers keep their JSON representation, so integers stay
/// integers. `Raw` keeps values written by other producers (nested objects,
/// nulls, mixed arrays) intact when records are browsed and re-saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<String>),
    Raw(serde_json::Value),
}

impl FieldValue {
    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value carries no content.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Raw(v) => v.is_null(),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    /// Non-finite floats have no JSON form and become `null`.
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map_or(FieldValue::Raw(serde_json::Value::Null), FieldValue::Number)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::List(items)
    }
}

/// Field name to value map. Sorted so that payloads are deterministic.
pub type FieldMap = BTreeMap<String, FieldValue>;

fn default_searchable() -> bool {
    true
}

/// A source-of-truth content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalItem {
    /// Stable id
    pub id: ItemId,

    /// Content type / bundle (e.g. "widget")
    pub bundle: String,

    /// Whether the item may currently appear in the index
    #[serde(default = "default_searchable")]
    pub searchable: bool,

    /// Field values per locale variant
    #[serde(default)]
    pub translations: BTreeMap<String, FieldMap>,
}

impl LogicalItem {
    /// Create an item with no translations.
    pub fn new(id: ItemId, bundle: impl Into<String>) -> Self {
        Self {
            id,
            bundle: bundle.into(),
            searchable: true,
            translations: BTreeMap::new(),
        }
    }

    /// Add a locale variant.
    pub fn with_translation(mut self, locale: impl Into<String>, fields: FieldMap) -> Self {
        self.translations.insert(locale.into(), fields);
        self
    }

    /// Set the searchability flag.
    pub fn with_searchable(mut self, searchable: bool) -> Self {
        self.searchable = searchable;
        self
    }

    /// Locales this item has a variant for.
    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.translations.keys().map(String::as_str)
    }

    /// Field values for one locale.
    pub fn fields(&self, locale: &str) -> Option<&FieldMap> {
        self.translations.get(locale)
    }

    /// The `title` field for a locale, if it is text.
    pub fn title(&self, locale: &str) -> Option<&str> {
        self.fields(locale)
            .and_then(|f| f.get("title"))
            .and_then(FieldValue::as_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_parse() {
        assert_eq!(ItemId::parse("42").unwrap().as_str(), "42");
        assert_eq!(ItemId::parse(" abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_item_id_rejects_empty_and_non_positive() {
        assert!(matches!(
            ItemId::parse(""),
            Err(ReindexError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            ItemId::parse("0"),
            Err(ReindexError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            ItemId::parse("-7"),
            Err(ReindexError::InvalidIdentifier(_))
        ));
        for raw in ["-1.5", "-0.0", "0.0", "0e3"] {
            assert!(
                matches!(ItemId::parse(raw), Err(ReindexError::InvalidIdentifier(_))),
                "{} accepted",
                raw
            );
        }
        assert_eq!(ItemId::parse("1.5").unwrap().as_str(), "1.5");
        assert!(ItemId::parse("node/1").is_err());
        assert!(ItemId::parse("1:en").is_err());
    }

    #[test]
    fn test_item_id_parse_list() {
        let ids = ItemId::parse_list("1, 2 3").unwrap();
        assert_eq!(ids.len(), 3);
        assert!(matches!(
            ItemId::parse_list(" , "),
            Err(ReindexError::InvalidInput(_))
        ));
        assert!(ItemId::parse_list("1,0").is_err());
    }

    #[test]
    fn test_item_id_deserialize_number_or_string() {
        let a: ItemId = serde_json::from_str("42").unwrap();
        let b: ItemId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<ItemId>("-1").is_err());
    }

    #[test]
    fn test_field_value_untagged() {
        let fields: FieldMap = serde_json::from_str(
            r#"{"title": "Adapter", "price": 9.5, "sale": true, "tags": ["rf", "sma"], "assets": [{"type": "img"}]}"#,
        )
        .unwrap();
        assert_eq!(fields["title"], FieldValue::Text("Adapter".into()));
        assert_eq!(fields["price"], FieldValue::from(9.5));
        assert_eq!(fields["sale"], FieldValue::Bool(true));
        assert_eq!(
            fields["tags"],
            FieldValue::List(vec!["rf".into(), "sma".into()])
        );
        assert!(matches!(fields["assets"], FieldValue::Raw(_)));
    }

    #[test]
    fn test_field_value_numbers_round_trip() {
        let raw = r#"{"price":9.5,"sku":9007199254740993,"stock":42}"#;
        let fields: FieldMap = serde_json::from_str(raw).unwrap();
        assert_eq!(fields["stock"], FieldValue::from(42i64));
        assert_eq!(fields["sku"], FieldValue::from(9_007_199_254_740_993u64));
        assert_eq!(serde_json::to_string(&fields).unwrap(), raw);
    }

    #[test]
    fn test_field_value_from_non_finite_float() {
        assert_eq!(
            FieldValue::from(f64::NAN),
            FieldValue::Raw(serde_json::Value::Null)
        );
        assert!(FieldValue::from(f64::INFINITY).is_empty());
    }

    #[test]
    fn test_logical_item_defaults() {
        let item: LogicalItem =
            serde_json::from_str(r#"{"id": 7, "bundle": "widget"}"#).unwrap();
        assert!(item.searchable);
        assert!(item.translations.is_empty());
    }

    #[test]
    fn test_logical_item_title() {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), "Hello".into());
        let item = LogicalItem::new(ItemId::parse("1").unwrap(), "page")
            .with_translation("en", fields);
        assert_eq!(item.title("en"), Some("Hello"));
        assert_eq!(item.title("fr"), None);
        assert_eq!(item.locales().collect::<Vec<_>>(), vec!["en"]);
    }
}
