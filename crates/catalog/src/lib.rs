//! Reference data for the ROM library: which systems exist, which files
//! belong to them, and which files are BIOS images.

mod bios;
pub mod cue;
pub mod error;
mod file_type;
mod lookup;
mod system;

pub use crate::bios::{BiosEntry, BiosRegistry};
pub use crate::file_type::{ARTWORK_EXTENSIONS, CDROM_EXTENSIONS, FileType, is_artwork, is_cdrom, sort_import_paths};
pub use crate::lookup::{GameMetadata, LookupHandle, MetadataLookup, NoLookup, StaticLookup};
pub use crate::system::{SharedCatalog, System, SystemCatalog, SystemId};
