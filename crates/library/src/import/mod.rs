//! Game import.
//!
//! The [`GameImporter`] takes batches of newly arrived files, identifies them
//! by content digest and file name, and files each one into the library:
//!
//! - BIOS images go to their system's BIOS folder under their canonical name.
//! - Artwork goes to the artwork folder and is linked to games by file stem.
//! - Games and disc images with exactly one candidate system go to that
//!   system's ROM folder and are recorded in the game database.
//! - Everything else is parked in the conflicts folder until the user picks a
//!   system with [`GameImporter::resolve_conflicts`].
//!
//! Progress is published as [`ImportEvent`]s and mirrored into the
//! [`ImportQueue`](crate::queue::ImportQueue).

mod artwork;
pub mod error;
mod event;
mod importer;
mod place;

#[cfg(feature = "http")]
pub use self::artwork::HttpArtworkFetcher;
pub use self::artwork::{ArtworkFetcher, FetcherHandle};
pub use self::event::{ImportEvent, ImportSummary};
pub use self::importer::GameImporter;
