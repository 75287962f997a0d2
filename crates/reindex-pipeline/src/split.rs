//! Expansion of logical items into physical index documents.
//!
//! Only the configured split field is divided. Its text is cut into slices of
//! at most `max_slice_bytes`; slice 0 goes to the main document and slice `i`
//! to part `i`. Slices past `max_split - 1` are dropped and counted as
//! overflow. Attachment text, when present, gets its own `pdf` document.
//! Every document repeats the remaining fields so that filters and facets
//! work on each fragment.

use std::collections::BTreeMap;

use tracing::warn;

use reindex_types::{
    FieldMap, FieldValue, IndexDocument, LogicalItem, ReindexError, Settings, Slot, SplitKey,
};

use crate::codec::IdentifierCodec;

/// Bookkeeping field holding the logical item id.
pub const LOGICAL_ID_FIELD: &str = "logical_id";
/// Bookkeeping field holding the item bundle.
pub const TYPE_FIELD: &str = "type";
/// Bookkeeping field holding the locale.
pub const LOCALE_FIELD: &str = "locale";
/// Field read by the diff to label items.
pub const TITLE_FIELD: &str = "title";

/// Split keys for an item, plus how many slices did not fit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitPlan {
    keys: Vec<SplitKey>,
    overflow: BTreeMap<String, usize>,
}

impl SplitPlan {
    pub fn keys(&self) -> &[SplitKey] {
        &self.keys
    }

    pub fn into_keys(self) -> Vec<SplitKey> {
        self.keys
    }

    /// Keys for one locale, in slot order.
    pub fn keys_for<'a>(&'a self, locale: &'a str) -> impl Iterator<Item = &'a SplitKey> + 'a {
        self.keys.iter().filter(move |k| k.locale == locale)
    }

    /// Total slices dropped across locales.
    pub fn overflow(&self) -> usize {
        self.overflow.values().sum()
    }

    /// Slices dropped for one locale.
    pub fn overflow_for(&self, locale: &str) -> usize {
        self.overflow.get(locale).copied().unwrap_or(0)
    }

    pub fn is_truncated(&self) -> bool {
        self.overflow() > 0
    }
}

/// Decides how many documents an item becomes and what each one holds.
#[derive(Debug, Clone)]
pub struct SplitStrategy {
    codec: IdentifierCodec,
    max_slice_bytes: usize,
    split_field: String,
    pdf_field: Option<String>,
}

impl SplitStrategy {
    pub fn new(
        codec: IdentifierCodec,
        max_slice_bytes: usize,
        split_field: impl Into<String>,
        pdf_field: Option<String>,
    ) -> Self {
        Self {
            codec,
            max_slice_bytes: max_slice_bytes.max(1),
            split_field: split_field.into(),
            pdf_field,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            IdentifierCodec::from_settings(settings),
            settings.max_slice_bytes,
            settings.split_field.clone(),
            settings.pdf_field.clone(),
        )
    }

    pub fn codec(&self) -> &IdentifierCodec {
        &self.codec
    }

    /// Split keys for every locale of an item.
    ///
    /// Depends only on the item content, so unchanged input always yields the
    /// same keys in the same order.
    pub fn plan(&self, item: &LogicalItem) -> SplitPlan {
        let mut plan = SplitPlan::default();
        for (locale, fields) in &item.translations {
            let slices = self.split_slices(fields);
            let kept = slices.len().clamp(1, self.codec.max_split());

            plan.keys
                .push(SplitKey::new(item.id.clone(), locale.as_str(), Slot::Main));
            if self.pdf_text(fields).is_some() {
                plan.keys
                    .push(SplitKey::new(item.id.clone(), locale.as_str(), Slot::Pdf));
            }
            for n in 1..kept {
                plan.keys
                    .push(SplitKey::new(item.id.clone(), locale.as_str(), Slot::Part(n)));
            }

            let dropped = slices.len().saturating_sub(self.codec.max_split());
            if dropped > 0 {
                warn!(
                    item = %item.id,
                    locale = %locale,
                    dropped = dropped,
                    max_split = self.codec.max_split(),
                    "Split field truncated"
                );
                plan.overflow.insert(locale.clone(), dropped);
            }
        }
        plan
    }

    /// Build the payload for each key.
    pub fn expand(
        &self,
        item: &LogicalItem,
        keys: &[SplitKey],
    ) -> Result<Vec<IndexDocument>, ReindexError> {
        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            if key.item_id != item.id {
                return Err(ReindexError::InvalidInput(format!(
                    "split key for item {} passed with item {}",
                    key.item_id, item.id
                )));
            }
            let fields = item.fields(&key.locale).ok_or_else(|| {
                ReindexError::InvalidInput(format!(
                    "item {} has no {} translation",
                    item.id, key.locale
                ))
            })?;

            let mut payload = self.shared_fields(item, &key.locale, fields);
            match key.slot {
                Slot::Main => {
                    if let Some(slice) = self.split_slices(fields).first() {
                        payload.insert(self.split_field.clone(), (*slice).into());
                    }
                }
                Slot::Part(n) => {
                    let slices = self.split_slices(fields);
                    let slice = slices.get(n).ok_or_else(|| {
                        ReindexError::InvalidInput(format!(
                            "item {} has no slice {} in {}",
                            item.id, n, key.locale
                        ))
                    })?;
                    payload.insert(self.split_field.clone(), (*slice).into());
                }
                Slot::Pdf => {
                    let (name, text) = self
                        .pdf_field
                        .as_deref()
                        .zip(self.pdf_text(fields))
                        .ok_or_else(|| {
                            ReindexError::InvalidInput(format!(
                                "item {} has no attachment text in {}",
                                item.id, key.locale
                            ))
                        })?;
                    let first = slice_text(text, self.max_slice_bytes)
                        .into_iter()
                        .next()
                        .unwrap_or_default();
                    payload.insert(name.to_string(), first.into());
                }
            }

            documents.push(IndexDocument::new(self.codec.encode_key(key)?, payload));
        }
        Ok(documents)
    }

    /// Plan and expand the documents of one locale.
    pub fn documents_for(
        &self,
        item: &LogicalItem,
        locale: &str,
    ) -> Result<Vec<IndexDocument>, ReindexError> {
        let plan = self.plan(item);
        let keys: Vec<SplitKey> = plan.keys_for(locale).cloned().collect();
        self.expand(item, &keys)
    }

    fn shared_fields(&self, item: &LogicalItem, locale: &str, fields: &FieldMap) -> FieldMap {
        let mut shared: FieldMap = fields
            .iter()
            .filter(|(name, _)| !self.is_split_field(name) && !self.is_pdf_field(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        shared.insert(LOGICAL_ID_FIELD.to_string(), item.id.as_str().into());
        shared.insert(TYPE_FIELD.to_string(), item.bundle.as_str().into());
        shared.insert(LOCALE_FIELD.to_string(), locale.into());
        shared
    }

    fn is_split_field(&self, name: &str) -> bool {
        name == self.split_field
    }

    fn is_pdf_field(&self, name: &str) -> bool {
        self.pdf_field.as_deref() == Some(name)
    }

    fn split_slices<'a>(&self, fields: &'a FieldMap) -> Vec<&'a str> {
        match fields.get(&self.split_field).and_then(FieldValue::as_text) {
            Some(text) => slice_text(text, self.max_slice_bytes),
            None => Vec::new(),
        }
    }

    fn pdf_text<'a>(&self, fields: &'a FieldMap) -> Option<&'a str> {
        let name = self.pdf_field.as_deref()?;
        fields
            .get(name)
            .and_then(FieldValue::as_text)
            .filter(|text| !text.trim().is_empty())
    }
}

/// Cut text into slices of at most `max_bytes`, on char boundaries.
///
/// A cut falls on the last whitespace inside the window when there is one.
/// A single char wider than `max_bytes` becomes its own slice.
pub fn slice_text(text: &str, max_bytes: usize) -> Vec<&str> {
    let max_bytes = max_bytes.max(1);
    let mut slices = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        if rest.len() <= max_bytes {
            slices.push(rest);
            break;
        }

        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        } else if !rest[cut..].starts_with(char::is_whitespace) {
            if let Some(space) = rest[..cut].rfind(char::is_whitespace).filter(|&s| s > 0) {
                cut = space;
            }
        }

        let (head, tail) = rest.split_at(cut);
        let head = head.trim_end();
        if !head.is_empty() {
            slices.push(head);
        }
        rest = tail.trim_start();
    }

    slices
}
