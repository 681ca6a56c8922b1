use std::fmt;

use async_trait::async_trait;
use once_cell::sync::{Lazy, OnceCell};
use reqwest::Client;

use crate::core::geo::TileKey;
use crate::prelude::Arc;
use crate::runtime::{run_io, spawn_on, AsyncSpawner};
use crate::tiles::pack::TilePack;
use crate::tiles::queue::RequestTask;
use crate::traits::{ClockSource, TileFetcher};
use crate::{Error, Result};

/// Shared HTTP client with a custom User-Agent so that public tile servers
/// don't reject the request. Building the client once avoids the cost of TLS
/// and connection pool setup for every tile.
pub(crate) static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!("tilescope/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build reqwest client")
});

/// GET `url` on the background reactor, so callers on any executor get a
/// result rather than a missing-reactor panic.
async fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    let url = url.to_owned();
    run_io(async move {
        let resp = HTTP_CLIENT.get(&url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    })
    .await
}

/// URL pattern with `{z}`, `{x}`, `{y}` and optional `{s}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
    subdomains: Vec<String>,
}

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            subdomains: vec!["a".into(), "b".into(), "c".into()],
        }
    }

    pub fn with_subdomains<I, S>(mut self, subdomains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subdomains = subdomains.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn expand(&self, key: &TileKey) -> String {
        let mut url = self
            .template
            .replace("{z}", &key.level.to_string())
            .replace("{x}", &key.x.to_string())
            .replace("{y}", &key.y.to_string());
        if url.contains("{s}") {
            let sub = if self.subdomains.is_empty() {
                ""
            } else {
                let idx = ((key.x as usize) + (key.y as usize)) % self.subdomains.len();
                self.subdomains[idx].as_str()
            };
            url = url.replace("{s}", sub);
        }
        url
    }
}

/// Shared slot for a GTPK archive that may still be downloading.
#[derive(Clone, Default)]
pub struct PackHandle(Arc<OnceCell<std::result::Result<TilePack, String>>>);

impl PackHandle {
    /// A handle whose archive has not arrived yet.
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let handle = Self::pending();
        handle
            .0
            .set(Ok(TilePack::parse(bytes)?))
            .map_err(|_| Error::InvalidPack("pack slot already filled".into()))?;
        Ok(handle)
    }

    /// Fill the slot with a download result. Returns false if it was already filled.
    pub fn complete(&self, bytes: Result<Vec<u8>>) -> bool {
        let parsed = bytes.and_then(TilePack::parse).map_err(|e| e.to_string());
        match &parsed {
            Ok(pack) => log::info!("tile pack ready: {} tiles", pack.len()),
            Err(e) => log::warn!("tile pack failed to load: {}", e),
        }
        self.0.set(parsed).is_ok()
    }

    /// Start downloading `url` in the background. A frame is requested once
    /// the archive lands so the host wakes up and dispatches tiles.
    pub fn download(url: impl Into<String>, spawner: &dyn AsyncSpawner, clock: Arc<dyn ClockSource>) -> Self {
        let handle = Self::pending();
        let slot = handle.clone();
        let url = url.into();
        log::info!("downloading tile pack from {}", url);
        spawn_on(spawner, async move {
            let bytes = fetch_bytes(&url).await;
            slot.complete(bytes);
            clock.request_frame();
        });
        handle
    }

    /// True once the download finished, successfully or not.
    pub fn is_available(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn pack(&self) -> Result<&TilePack> {
        match self.0.get() {
            None => Err(Error::SourceUnavailable),
            Some(Ok(pack)) => Ok(pack),
            Some(Err(e)) => Err(Error::InvalidPack(e.clone())),
        }
    }

    pub fn get_blob(&self, key: &TileKey) -> Option<&[u8]> {
        self.pack().ok()?.get_blob(key)
    }
}

impl fmt::Debug for PackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.0.get() {
            None => "pending".to_string(),
            Some(Ok(pack)) => format!("{} tiles", pack.len()),
            Some(Err(e)) => format!("failed: {e}"),
        };
        f.debug_tuple("PackHandle").field(&state).finish()
    }
}

/// Where tile bytes come from.
#[derive(Debug, Clone)]
pub enum TileSource {
    Template(UrlTemplate),
    Pack(PackHandle),
}

impl TileSource {
    pub fn template(template: impl Into<String>) -> Self {
        TileSource::Template(UrlTemplate::new(template))
    }

    pub fn pack(handle: PackHandle) -> Self {
        TileSource::Pack(handle)
    }

    /// Address of `key`; pack tiles get a pseudo URL for logging.
    pub fn url(&self, key: &TileKey) -> String {
        match self {
            TileSource::Template(template) => template.expand(key),
            TileSource::Pack(_) => format!("gtpk://{}", key),
        }
    }

    /// Whether dispatches may start. Only a pack that is still downloading
    /// blocks them.
    pub fn is_available(&self) -> bool {
        match self {
            TileSource::Template(_) => true,
            TileSource::Pack(handle) => handle.is_available(),
        }
    }
}

#[async_trait]
impl TileFetcher for TileSource {
    async fn fetch(&self, task: &RequestTask) -> Result<Vec<u8>> {
        match self {
            TileSource::Template(_) => fetch_bytes(&task.url).await,
            TileSource::Pack(handle) => handle
                .pack()?
                .get_blob(&task.key)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::NotFound(task.key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::pack::TilePackBuilder;

    fn pack_bytes() -> Vec<u8> {
        let mut builder = TilePackBuilder::new(256);
        builder.add(TileKey::new(1, 1, 0), vec![4, 5, 6]).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_template_expansion() {
        let t = UrlTemplate::new("https://{s}.tiles.test/{z}/{x}/{y}.webp");
        assert_eq!(t.expand(&TileKey::new(3, 1, 0)), "https://b.tiles.test/3/1/0.webp");
        assert_eq!(t.expand(&TileKey::new(3, 1, 1)), "https://c.tiles.test/3/1/1.webp");

        let plain = UrlTemplate::new("/tiles/{z}/{x}_{y}.png").with_subdomains(Vec::<String>::new());
        assert_eq!(plain.expand(&TileKey::new(10, 512, 7)), "/tiles/10/512_7.png");
    }

    #[test]
    fn test_pending_pack_blocks_then_serves() {
        let handle = PackHandle::pending();
        let source = TileSource::pack(handle.clone());
        let task = RequestTask::new(TileKey::new(1, 1, 0), 0, source.url(&TileKey::new(1, 1, 0)));

        assert!(!source.is_available());
        assert!(handle.get_blob(&task.key).is_none());
        assert!(matches!(
            futures::executor::block_on(source.fetch(&task)),
            Err(Error::SourceUnavailable)
        ));

        assert!(handle.complete(Ok(pack_bytes())));
        assert!(!handle.complete(Ok(pack_bytes())));
        assert!(source.is_available());
        assert_eq!(futures::executor::block_on(source.fetch(&task)).unwrap(), vec![4, 5, 6]);

        let missing = RequestTask::new(TileKey::new(1, 0, 0), 0, "gtpk://1/0/0");
        assert!(matches!(
            futures::executor::block_on(source.fetch(&missing)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_pack_fails_every_tile() {
        let handle = PackHandle::pending();
        handle.complete(Ok(b"not a pack".to_vec()));
        let source = TileSource::pack(handle);
        assert!(source.is_available());

        let task = RequestTask::new(TileKey::new(1, 1, 0), 0, "gtpk://1/1/0");
        assert!(matches!(
            futures::executor::block_on(source.fetch(&task)),
            Err(Error::InvalidPack(_))
        ));
    }

    #[test]
    fn test_pack_from_bytes() {
        let handle = PackHandle::from_bytes(pack_bytes()).unwrap();
        assert!(handle.is_available());
        assert_eq!(handle.pack().unwrap().len(), 1);
        assert!(PackHandle::from_bytes(vec![0; 4]).is_err());
    }
}
