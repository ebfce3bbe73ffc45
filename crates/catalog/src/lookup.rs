//! Game metadata lookup.
//!
//! The importer asks a [`MetadataLookup`] about every game it files away.
//! Lookup data only enriches the record; an import never depends on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::SystemId;
use crate::error::Result;

/// Candidate metadata for one game.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameMetadata {
    pub title: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub system: Option<SystemId>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Look up metadata by content digest, falling back to the file name.
    ///
    /// `Ok(None)` means the game is unknown. Errors mean the lookup itself
    /// failed and the caller should carry on without enrichment.
    async fn lookup(&self, md5: &str, file_name: &str) -> Result<Option<GameMetadata>>;
}

pub type LookupHandle = Arc<dyn MetadataLookup>;

/// Lookup that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

#[async_trait]
impl MetadataLookup for NoLookup {
    async fn lookup(&self, _md5: &str, _file_name: &str) -> Result<Option<GameMetadata>> {
        Ok(None)
    }
}

/// In-memory lookup table keyed by MD5 digest or file name.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    by_md5: HashMap<String, GameMetadata>,
    by_name: HashMap<String, GameMetadata>,
}
impl StaticLookup {
    pub fn with_md5(mut self, md5: impl Into<String>, metadata: GameMetadata) -> Self {
        self.by_md5.insert(md5.into().to_lowercase(), metadata);
        self
    }

    pub fn with_name(mut self, file_name: impl Into<String>, metadata: GameMetadata) -> Self {
        self.by_name.insert(file_name.into().to_lowercase(), metadata);
        self
    }
}

#[async_trait]
impl MetadataLookup for StaticLookup {
    async fn lookup(&self, md5: &str, file_name: &str) -> Result<Option<GameMetadata>> {
        Ok(self
            .by_md5
            .get(&md5.to_lowercase())
            .or_else(|| self.by_name.get(&file_name.to_lowercase()))
            .cloned())
    }
}
