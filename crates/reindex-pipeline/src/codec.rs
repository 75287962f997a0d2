//! Document identifier encoding and parsing.
//!
//! Two formats co-exist while indexes migrate:
//! - Current: `base64url("{entity_type}/{id}:{locale}")` plus `.pdf` or `.{n}`
//! - Legacy: `entity:{entity_type}/{id}:{locale}` plus `:pdf` or `:{n}`
//!
//! New writes always use the current format. Deletions target both formats
//! and every slot, since the previous split count is not known.

use std::collections::BTreeSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use reindex_types::{DocumentId, IdFormat, ItemId, ReindexError, Settings, Slot, SplitKey};

/// Reserved slot label for attachment text.
pub const PDF_SLOT: &str = "pdf";

const LEGACY_PREFIX: &str = "entity:";

fn slot_suffix(slot: Slot) -> Option<String> {
    match slot {
        Slot::Main => None,
        Slot::Pdf => Some(PDF_SLOT.to_string()),
        Slot::Part(n) => Some(n.to_string()),
    }
}

/// Encode a key in the current format.
pub fn encode_current(entity_type: &str, key: &SplitKey) -> DocumentId {
    let base = URL_SAFE_NO_PAD.encode(format!("{}/{}:{}", entity_type, key.item_id, key.locale));
    match slot_suffix(key.slot) {
        Some(suffix) => DocumentId::new(format!("{}.{}", base, suffix)),
        None => DocumentId::new(base),
    }
}

/// Encode a key in the legacy colon-delimited format.
pub fn encode_legacy(entity_type: &str, key: &SplitKey) -> DocumentId {
    let base = format!("{}{}/{}:{}", LEGACY_PREFIX, entity_type, key.item_id, key.locale);
    match slot_suffix(key.slot) {
        Some(suffix) => DocumentId::new(format!("{}:{}", base, suffix)),
        None => DocumentId::new(base),
    }
}

/// Derives and parses document identifiers for one entity type.
#[derive(Debug, Clone)]
pub struct IdentifierCodec {
    entity_type: String,
    max_split: usize,
}

impl IdentifierCodec {
    pub fn new(entity_type: impl Into<String>, max_split: usize) -> Self {
        Self {
            entity_type: entity_type.into(),
            max_split: max_split.max(1),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.entity_type.clone(), settings.max_split)
    }

    pub fn max_split(&self) -> usize {
        self.max_split
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Every slot an item may occupy: main, pdf, then 1..max_split-1.
    pub fn slots(&self) -> Vec<Slot> {
        let mut slots = vec![Slot::Main, Slot::Pdf];
        slots.extend((1..self.max_split).map(Slot::Part));
        slots
    }

    fn key(&self, item_id: &ItemId, locale: &str, slot: Slot) -> Result<SplitKey, ReindexError> {
        if locale.is_empty() || locale.contains([':', '/', '.']) {
            return Err(ReindexError::InvalidIdentifier(format!(
                "invalid locale {:?} for item {}",
                locale, item_id
            )));
        }
        if let Slot::Part(n) = slot {
            if n == 0 || n >= self.max_split {
                return Err(ReindexError::InvalidIdentifier(format!(
                    "slot {} out of range 1..{} for item {}",
                    n, self.max_split, item_id
                )));
            }
        }
        Ok(SplitKey::new(item_id.clone(), locale, slot))
    }

    /// Current-format identifier for a key.
    pub fn encode(
        &self,
        item_id: &ItemId,
        locale: &str,
        slot: Slot,
    ) -> Result<DocumentId, ReindexError> {
        let key = self.key(item_id, locale, slot)?;
        Ok(encode_current(&self.entity_type, &key))
    }

    /// Legacy-format identifier for a key. Only used to find old documents.
    pub fn legacy_encode(
        &self,
        item_id: &ItemId,
        locale: &str,
        slot: Slot,
    ) -> Result<DocumentId, ReindexError> {
        let key = self.key(item_id, locale, slot)?;
        Ok(encode_legacy(&self.entity_type, &key))
    }

    /// Current-format identifier for an already-built key.
    pub fn encode_key(&self, key: &SplitKey) -> Result<DocumentId, ReindexError> {
        self.encode(&key.item_id, &key.locale, key.slot)
    }

    /// Both formats across every slot: `2 * (max_split + 1)` identifiers.
    ///
    /// Most of them will not exist; deleting absent ids is a no-op.
    pub fn all_identifiers_for(
        &self,
        item_id: &ItemId,
        locale: &str,
    ) -> Result<BTreeSet<DocumentId>, ReindexError> {
        let mut ids = BTreeSet::new();
        for slot in self.slots() {
            ids.insert(self.encode(item_id, locale, slot)?);
            ids.insert(self.legacy_encode(item_id, locale, slot)?);
        }
        Ok(ids)
    }

    /// Current-format identifiers across every slot.
    pub fn current_identifiers_for(
        &self,
        item_id: &ItemId,
        locale: &str,
    ) -> Result<Vec<(Slot, DocumentId)>, ReindexError> {
        self.slots()
            .into_iter()
            .map(|slot| Ok((slot, self.encode(item_id, locale, slot)?)))
            .collect()
    }

    /// Parse an identifier in either format.
    pub fn decode(&self, id: &str) -> Result<(IdFormat, SplitKey), ReindexError> {
        match id.strip_prefix(LEGACY_PREFIX) {
            Some(rest) => Ok((IdFormat::Legacy, self.decode_legacy(id, rest)?)),
            None => Ok((IdFormat::Current, self.decode_current(id)?)),
        }
    }

    fn decode_legacy(&self, id: &str, rest: &str) -> Result<SplitKey, ReindexError> {
        let mut parts = rest.splitn(3, ':');
        let entity = parts.next().unwrap_or_default();
        let locale = parts
            .next()
            .ok_or_else(|| invalid(id, "missing locale"))?;
        let slot = match parts.next() {
            Some(suffix) => self.parse_slot(id, suffix)?,
            None => Slot::Main,
        };
        self.parse_entity(id, entity, locale, slot)
    }

    fn decode_current(&self, id: &str) -> Result<SplitKey, ReindexError> {
        let (encoded, slot) = match id.rsplit_once('.') {
            Some((encoded, suffix)) => (encoded, self.parse_slot(id, suffix)?),
            None => (id, Slot::Main),
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| invalid(id, &e.to_string()))?;
        let body = String::from_utf8(bytes).map_err(|e| invalid(id, &e.to_string()))?;
        let (entity, locale) = body
            .split_once(':')
            .ok_or_else(|| invalid(id, "missing locale"))?;
        self.parse_entity(id, entity, locale, slot)
    }

    fn parse_entity(
        &self,
        id: &str,
        entity: &str,
        locale: &str,
        slot: Slot,
    ) -> Result<SplitKey, ReindexError> {
        let (entity_type, item_id) = entity
            .split_once('/')
            .ok_or_else(|| invalid(id, "missing entity type"))?;
        if entity_type != self.entity_type {
            return Err(invalid(
                id,
                &format!("entity type {} is not {}", entity_type, self.entity_type),
            ));
        }
        let item_id = ItemId::parse(item_id)?;
        self.key(&item_id, locale, slot)
    }

    fn parse_slot(&self, id: &str, suffix: &str) -> Result<Slot, ReindexError> {
        if suffix == PDF_SLOT {
            return Ok(Slot::Pdf);
        }
        suffix
            .parse::<usize>()
            .map(Slot::Part)
            .map_err(|_| invalid(id, &format!("unknown slot suffix {}", suffix)))
    }
}

fn invalid(id: &str, reason: &str) -> ReindexError {
    ReindexError::InvalidIdentifier(format!("{}: {}", id, reason))
}
