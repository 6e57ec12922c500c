//! Byte-source resolution.
//!
//! Maps a [`SourceId`] to raw encoded audio bytes: local paths read from the
//! filesystem, remote URLs fetched over HTTP, ephemeral handles served from
//! an in-memory blob registry. Decoding is a separate step (see
//! [`crate::decode`]).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use clipdeck_core::{Error, Result, SourceId, SourceKind};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

/// Capability to fetch the encoded bytes behind a source identifier.
pub trait ByteSource: Send + Sync {
    fn fetch(&self, source: &SourceId) -> Result<Bytes>;

    /// Release any backing resource held for `source` (e.g. an ephemeral
    /// blob). Idempotent; a no-op for sources without backing state.
    fn release(&self, _source: &SourceId) {}
}

/// Registry of ephemeral in-memory audio blobs.
///
/// Registering bytes yields a `mem:<uuid>` handle usable as a source id
/// until it is revoked. Cache eviction revokes the handle exactly once.
#[derive(Clone, Default)]
pub struct BlobRegistry {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes and return a fresh ephemeral handle.
    pub fn register(&self, data: Bytes) -> SourceId {
        let handle = format!("mem:{}", Uuid::new_v4());
        debug!("Registered blob {handle} ({} bytes)", data.len());
        self.blobs.lock().insert(handle.clone(), data);
        SourceId::from(handle)
    }

    /// Fetch the bytes behind a handle.
    pub fn get(&self, source: &SourceId) -> Option<Bytes> {
        self.blobs.lock().get(source.as_str()).cloned()
    }

    /// Drop a handle's bytes. Revoking an unknown handle is a no-op.
    pub fn revoke(&self, source: &SourceId) {
        if self.blobs.lock().remove(source.as_str()).is_some() {
            debug!("Revoked blob {source}");
        } else {
            trace!("Revoke of unknown blob {source} ignored");
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

/// Default resolver: filesystem + HTTP + blob registry.
#[derive(Clone, Default)]
pub struct FsHttpResolver {
    blobs: BlobRegistry,
}

impl FsHttpResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry backing ephemeral handles.
    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    /// Register in-memory bytes as a playable ephemeral source.
    pub fn register_blob(&self, data: Bytes) -> SourceId {
        self.blobs.register(data)
    }

    fn fetch_remote(url_str: &str) -> Result<Bytes> {
        let url = url::Url::parse(url_str)
            .map_err(|e| Error::Resolve(format!("Invalid URL {url_str}: {e}")))?;

        debug!("Fetching remote clip: {url}");
        let body = ureq::get(url.as_str())
            .call()
            .map_err(|e| Error::Network(format!("HTTP request failed: {e}")))?
            .into_body()
            .read_to_vec()
            .map_err(|e| Error::Network(format!("Failed to read response: {e}")))?;

        debug!("Fetched {} bytes from {url}", body.len());
        Ok(Bytes::from(body))
    }

    fn fetch_local(path: &str) -> Result<Bytes> {
        let data = std::fs::read(path)
            .map_err(|e| Error::Resolve(format!("Failed to read {path}: {e}")))?;
        Ok(Bytes::from(data))
    }
}

impl ByteSource for FsHttpResolver {
    fn fetch(&self, source: &SourceId) -> Result<Bytes> {
        match source.kind() {
            SourceKind::Ephemeral => self
                .blobs
                .get(source)
                .ok_or_else(|| Error::Resolve(format!("Unknown ephemeral handle {source}"))),
            SourceKind::Remote => Self::fetch_remote(source.as_str()),
            SourceKind::Local => Self::fetch_local(source.as_str()),
        }
    }

    fn release(&self, source: &SourceId) {
        if source.kind() == SourceKind::Ephemeral {
            self.blobs.revoke(source);
        }
    }
}
