//! Pipeline items and per-item failures.
//!
//! An [`Item`] pairs a stable identity with a payload whose type changes as the
//! item moves between stages. Handing an item to the next stage moves it, so
//! exactly one stage owns it at any time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable identity of a unit of work.
///
/// Images read from disk are identified by their original path; decoded video
/// frames by their index in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ItemId {
    Path(PathBuf),
    Index(u64),
}

impl ItemId {
    /// Path identity, if this item came from a file.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ItemId::Path(p) => Some(p.as_path()),
            ItemId::Index(_) => None,
        }
    }

    /// Frame index, if this item came from a stream.
    pub fn as_index(&self) -> Option<u64> {
        match self {
            ItemId::Index(i) => Some(*i),
            ItemId::Path(_) => None,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Path(p) => write!(f, "{}", p.display()),
            ItemId::Index(i) => write!(f, "#{}", i),
        }
    }
}

impl From<PathBuf> for ItemId {
    fn from(path: PathBuf) -> Self {
        ItemId::Path(path)
    }
}

impl From<u64> for ItemId {
    fn from(index: u64) -> Self {
        ItemId::Index(index)
    }
}

/// A unit of work owned by exactly one stage at a time.
#[derive(Debug, Clone)]
pub struct Item<P> {
    pub id: ItemId,
    pub payload: P,
}

impl<P> Item<P> {
    pub fn new(id: impl Into<ItemId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Replace the payload, keeping the identity.
    pub fn map<Q>(self, f: impl FnOnce(P) -> Q) -> Item<Q> {
        Item {
            id: self.id,
            payload: f(self.payload),
        }
    }

    /// Fallible payload transform.
    ///
    /// On error the identity is handed back alongside the error so the caller
    /// can report which item failed.
    pub fn try_map<Q, E>(
        self,
        f: impl FnOnce(&ItemId, P) -> Result<Q, E>,
    ) -> Result<Item<Q>, (ItemId, E)> {
        match f(&self.id, self.payload) {
            Ok(payload) => Ok(Item {
                id: self.id,
                payload,
            }),
            Err(e) => Err((self.id, e)),
        }
    }

    pub fn into_parts(self) -> (ItemId, P) {
        (self.id, self.payload)
    }
}

/// Stage at which an item was diverted to the failure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Frame source could not produce the item
    Source,
    Load,
    Prepare,
    Infer,
    Postprocess,
    Save,
    /// Item was stranded after its stage lost all workers
    Orphaned,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Source => "source",
            FailureStage::Load => "load",
            FailureStage::Prepare => "prepare",
            FailureStage::Infer => "infer",
            FailureStage::Postprocess => "postprocess",
            FailureStage::Save => "save",
            FailureStage::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of an item that was excluded from the success path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub id: ItemId,
    pub stage: FailureStage,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(id: ItemId, stage: FailureStage, reason: impl Into<String>) -> Self {
        Self {
            id,
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed at {}: {}", self.id, self.stage, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_map_keeps_identity() {
        let item = Item::new(PathBuf::from("/frames/0001.jpg"), 3u32);
        let mapped = item.map(|n| n * 2);
        assert_eq!(mapped.id, ItemId::Path(PathBuf::from("/frames/0001.jpg")));
        assert_eq!(mapped.payload, 6);
    }

    #[test]
    fn test_try_map_returns_identity_on_error() {
        let item = Item::new(7u64, "payload");
        let result: Result<Item<()>, _> = item.try_map(|_, _| Err("corrupt"));
        let (id, err) = result.unwrap_err();
        assert_eq!(id, ItemId::Index(7));
        assert_eq!(err, "corrupt");
    }

    #[test]
    fn test_item_id_display() {
        assert_eq!(ItemId::Index(42).to_string(), "#42");
        assert_eq!(ItemId::Path(PathBuf::from("a/b.png")).to_string(), "a/b.png");
    }

    #[test]
    fn test_failure_serialization() {
        let failure = ItemFailure::new(ItemId::Index(3), FailureStage::Infer, "session error");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["stage"], "infer");
        assert_eq!(json["id"]["kind"], "index");
        assert_eq!(json["id"]["value"], 3);
    }
}
