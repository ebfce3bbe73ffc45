//! The ROM import pipeline.
//!
//! Files dropped into the import directory flow through these stages:
//!
//! 1. [`watch::DirectoryWatcher`] notices archives and extracts them.
//! 2. [`import::GameImporter`] hashes and classifies each file, then files it
//!    into a ROM or BIOS directory, or parks it in the conflicts folder when
//!    the target system is ambiguous.
//! 3. [`queue::ImportQueue`] records the status of every file and archive.
//! 4. [`controller::LibraryUpdatesController`] ties the stages together and
//!    projects them into a HUD state and a conflict list for the UI.
//!
//! [`scan`] finds files waiting in the import folder and ROMs the database
//! has not seen yet. [`core`] is the hand-off to an emulator frontend.
//!
//! Every stage reaches the library through the [`Context`], never through
//! global state.

pub mod conflicts;
pub mod controller;
pub mod core;
pub mod error;
pub mod import;
pub mod queue;
pub mod scan;
pub mod watch;

use romport_cache::Repository;
use romport_catalog::{LookupHandle, NoLookup, SharedCatalog};
use romport_config::{ImporterConfig, Layout};
use romport_storage::BackendHandle;
use std::sync::Arc;

/// Services shared by every pipeline stage.
#[derive(Clone)]
pub struct Context {
    pub backend: BackendHandle,
    pub catalog: SharedCatalog,
    pub layout: Layout,
    pub games: Repository,
    pub lookup: LookupHandle,
    pub options: ImporterConfig,
}

impl Context {
    /// A context with no metadata lookup and default importer options.
    pub fn new(backend: BackendHandle, catalog: SharedCatalog, layout: Layout, games: Repository) -> Self {
        Self { backend, catalog, layout, games, lookup: Arc::new(NoLookup), options: ImporterConfig::default() }
    }

    pub fn with_lookup(mut self, lookup: LookupHandle) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_options(mut self, options: ImporterConfig) -> Self {
        self.options = options;
        self
    }
}
