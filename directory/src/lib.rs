use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod error;
pub mod filter;
pub mod storage;

pub use error::{DirectoryError, Result};
pub use filter::{escape_value, Filter, ENTRY_DN};
pub use storage::SqliteDirectory;

/// Attribute name matching no attribute, used to only retrieve entry DNs
pub const NO_ATTRS: &str = "1.1";

/// Multi-valued attributes of an entry, values in insertion order
pub type Attrs = BTreeMap<String, Vec<String>>;

/// An entry of the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub dn: String,
    pub attrs: Attrs,
}

impl Entry {
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs.get(attr).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(|s| s.as_str())
    }

    pub fn has(&self, attr: &str) -> bool {
        !self.values(attr).is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

/// One attribute level modification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub op: ModOp,
    pub attr: String,
    pub values: Vec<String>,
}

impl Modification {
    pub fn add(attr: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            op: ModOp::Add,
            attr: attr.into(),
            values,
        }
    }

    /// Deleting with no values removes the whole attribute
    pub fn delete(attr: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            op: ModOp::Delete,
            attr: attr.into(),
            values,
        }
    }

    /// Replacing with no values removes the whole attribute
    pub fn replace(attr: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            op: ModOp::Replace,
            attr: attr.into(),
            values,
        }
    }
}

/// Queryable attribute store holding groups and subjects
///
/// `attrs` selects the returned attributes: an empty slice returns all of them,
/// `&[NO_ATTRS]` returns none.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn read(&self, dn: &str, attrs: &[&str]) -> Result<Option<Entry>>;

    /// Subtree search below `base` (included). An empty base searches everything.
    async fn search(
        &self,
        base: &str,
        filter: &Filter,
        attrs: &[&str],
        size_limit: Option<usize>,
    ) -> Result<Vec<Entry>>;

    async fn add(&self, dn: &str, attrs: Attrs) -> Result<()>;

    async fn delete(&self, dn: &str) -> Result<()>;

    /// Apply all modifications or none of them
    async fn modify(&self, dn: &str, mods: &[Modification]) -> Result<()>;
}
