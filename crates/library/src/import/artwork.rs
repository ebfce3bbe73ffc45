//! Artwork matching and downloads.
//!
//! Local artwork is paired with games by file stem (`Mario.png` belongs to
//! `Mario.sfc`). Remote artwork is fetched after the game import finished, on
//! a detached task, so a slow server never holds up the library.

use crate::Context;
use crate::import::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use romport_cache::Game;
use romport_catalog::{ARTWORK_EXTENSIONS, is_artwork};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Downloads artwork images.
#[async_trait]
pub trait ArtworkFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub type FetcherHandle = Arc<dyn ArtworkFetcher>;

/// [`ArtworkFetcher`] over HTTP(S).
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct HttpArtworkFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpArtworkFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl ArtworkFetcher for HttpArtworkFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await.or_raise(|| ErrorKind::Artwork)?;
        let response = response.error_for_status().or_raise(|| ErrorKind::Artwork)?;
        let bytes = response.bytes().await.or_raise(|| ErrorKind::Artwork)?;
        Ok(bytes.to_vec())
    }
}

/// Extension for a downloaded image, taken from the URL when it names one.
fn extension_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, ext)) if ARTWORK_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)) => ext,
        _ => "png",
    }
}

/// Where downloaded artwork for `game` is stored.
pub(crate) fn download_path(artwork_dir: &Path, game: &Game, url: &str) -> PathBuf {
    artwork_dir.join(format!("{}.{}", game.name, extension_from_url(url).to_lowercase()))
}

/// Fetch, store and record artwork for one game.
#[tracing::instrument(skip_all, fields(md5 = %game.md5, url = %url))]
pub(crate) async fn download(ctx: &Context, fetcher: &dyn ArtworkFetcher, game: &Game, url: &str) -> Result<PathBuf> {
    let data = fetcher.fetch(url).await?;
    let path = download_path(&ctx.layout.artwork, game, url);
    ctx.backend.write(&path, &data).await.or_raise(|| ErrorKind::Storage)?;
    ctx.games.set_artwork(&game.md5, &path).await.or_raise(|| ErrorKind::Cache)?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "downloaded artwork");
    Ok(path)
}

/// Artwork already in the artwork folder whose stem matches the game's.
pub(crate) async fn find_local(ctx: &Context, game: &Game) -> Result<Option<PathBuf>> {
    for ext in ARTWORK_EXTENSIONS {
        let path = ctx.layout.artwork.join(format!("{}.{ext}", game.name));
        if ctx.backend.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Record `artwork` against every game with the same file stem. Returns the
/// number of games matched.
pub(crate) async fn link_to_games(ctx: &Context, artwork: &Path) -> Result<usize> {
    debug_assert!(is_artwork(artwork));
    let Some(stem) = artwork.file_stem() else {
        return Ok(0);
    };
    let games = ctx.games.find_by_name(stem.to_string_lossy()).await.or_raise(|| ErrorKind::Cache)?;
    let mut linked = 0;
    for game in &games {
        if ctx.games.set_artwork(&game.md5, artwork).await.or_raise(|| ErrorKind::Cache)? {
            linked += 1;
        }
    }
    Ok(linked)
}
