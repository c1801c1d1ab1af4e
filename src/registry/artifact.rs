//! Release artifact storage and metadata rewriting
//!
//! Artifacts are zip archives keyed by `(module_name, release_id)` and are
//! expected to carry a single `metadata.json` entry. At publish time the
//! server rewrites that entry, injecting the canonical values for the
//! fields it controls; whatever the author wrote there is discarded while
//! unrelated fields and archive entries pass through untouched.

use std::io::{Cursor, Read, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::registry::error::ArtifactError;

const METADATA_ENTRY: &str = "metadata.json";

/// Byte-blob storage for release artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn read(&self, module_name: &str, release_id: Uuid) -> Result<Vec<u8>, ArtifactError>;
    async fn write(
        &self,
        module_name: &str,
        release_id: Uuid,
        bytes: &[u8],
    ) -> Result<(), ArtifactError>;
    async fn delete(&self, module_name: &str, release_id: Uuid) -> Result<(), ArtifactError>;
}

/// Filesystem-backed artifact store under a root directory.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, module_name: &str, release_id: Uuid) -> PathBuf {
        self.root
            .join(module_name.to_lowercase())
            .join(format!("{release_id}.zip"))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn read(&self, module_name: &str, release_id: Uuid) -> Result<Vec<u8>, ArtifactError> {
        Ok(tokio::fs::read(self.path(module_name, release_id)).await?)
    }

    async fn write(
        &self,
        module_name: &str,
        release_id: Uuid,
        bytes: &[u8],
    ) -> Result<(), ArtifactError> {
        let path = self.path(module_name, release_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(?path, "writing release artifact");
        Ok(tokio::fs::write(path, bytes).await?)
    }

    async fn delete(&self, module_name: &str, release_id: Uuid) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(self.path(module_name, release_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Server-controlled metadata fields injected into `metadata.json`.
#[derive(Debug, Clone)]
pub struct CanonicalMetadata {
    pub name: String,
    pub version: String,
    pub owner: String,
    pub tags: Vec<String>,
    pub image: Option<String>,
}

impl CanonicalMetadata {
    fn apply(&self, metadata: &mut serde_json::Map<String, serde_json::Value>) {
        metadata.insert("name".to_string(), self.name.clone().into());
        metadata.insert("version".to_string(), self.version.clone().into());
        metadata.insert("owner".to_string(), self.owner.clone().into());
        metadata.insert("tags".to_string(), self.tags.clone().into());
        match &self.image {
            Some(image) => metadata.insert("image".to_string(), image.clone().into()),
            None => metadata.remove("image"),
        };
    }
}

/// Rewrite the archive's `metadata.json` with canonical values.
///
/// Author-supplied values for server-controlled fields are replaced; other
/// metadata fields (entry point, "requires" list, ...) and all other archive
/// entries are carried over unchanged. An archive without a `metadata.json`
/// entry gets one injected.
pub fn rewrite_metadata(
    archive_bytes: &[u8],
    canonical: &CanonicalMetadata,
) -> Result<Vec<u8>, ArtifactError> {
    let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    let mut metadata = serde_json::Map::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        if name == METADATA_ENTRY {
            let mut raw = Vec::new();
            entry.read_to_end(&mut raw)?;
            if let serde_json::Value::Object(existing) = serde_json::from_slice(&raw)? {
                metadata = existing;
            }
            continue;
        }

        if entry.is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            std::io::copy(&mut entry, &mut writer)?;
        }
    }

    canonical.apply(&mut metadata);
    writer.start_file(METADATA_ENTRY, options)?;
    writer.write_all(&serde_json::to_vec_pretty(&serde_json::Value::Object(
        metadata,
    ))?)?;

    Ok(writer.finish()?.into_inner())
}

/// Extract the raw `metadata.json` bytes from an artifact.
pub fn read_metadata(archive_bytes: &[u8]) -> Result<Vec<u8>, ArtifactError> {
    let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
    let mut entry = archive
        .by_name(METADATA_ENTRY)
        .map_err(|_| ArtifactError::MissingMetadata)?;
    let mut raw = Vec::new();
    entry.read_to_end(&mut raw)?;
    Ok(raw)
}
