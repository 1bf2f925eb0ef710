//! UUID-keyed artifact store over a single local directory.
//!
//! Files are named `<kind>-<uuid>.<ext>`. Clients only ever see the UUID;
//! paths are resolved here and checked to stay inside the store root.
//! Adopted artifacts are indexed in memory; the directory is only scanned for
//! ids the index has not seen, such as files left over from a previous run.

use std::{
    collections::HashMap,
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ArtifactId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Video,
    Audio,
    Merged,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Merged => "merged",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{}.bin", self.id))
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }
}

/// A freshly reserved name the extractor can write to.
#[derive(Debug, Clone)]
pub struct ArtifactSlot {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    /// Output template with an `%(ext)s` placeholder for the extractor.
    pub template: PathBuf,
}

/// Any regular file found in the store root, artifact or not.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    index: Arc<RwLock<HashMap<ArtifactId, PathBuf>>>,
}

impl ArtifactStore {
    /// Creates the directory when missing and pins the canonical root.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, MediaError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|error| {
            MediaError::storage(format!("Could not create storage directory {root:?}: {error}"))
        })?;
        let root = tokio::fs::canonicalize(&root).await.map_err(|error| {
            MediaError::storage(format!("Could not resolve storage directory {root:?}: {error}"))
        })?;

        Ok(Self {
            root,
            index: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reserve(&self, kind: ArtifactKind) -> ArtifactSlot {
        let id = ArtifactId::new();
        ArtifactSlot {
            id,
            kind,
            template: self.root.join(format!("{}-{id}.%(ext)s", kind.as_str())),
        }
    }

    pub fn merged_path(&self, id: ArtifactId, ext: &str) -> PathBuf {
        self.root
            .join(format!("{}-{id}.{ext}", ArtifactKind::Merged.as_str()))
    }

    /// Adopts a file written by a collaborator. Returns `None` when the file
    /// does not exist, is not an artifact name, or resolves outside the root.
    pub async fn put(&self, path: &Path) -> Result<Option<Artifact>, MediaError> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(MediaError::storage(format!(
                    "Could not read downloaded file {path:?}: {error}"
                )));
            }
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        let canonical = tokio::fs::canonicalize(path).await.map_err(|error| {
            MediaError::storage(format!("Could not resolve downloaded file {path:?}: {error}"))
        })?;

        if canonical.parent() != Some(self.root.as_path()) {
            warn!("Rejected file outside the artifact store: {:?}", canonical);
            return Ok(None);
        }

        let artifact = artifact_from_entry(canonical, &metadata);
        if let Some(artifact) = &artifact {
            self.index.write().insert(artifact.id, artifact.path.clone());
        }
        Ok(artifact)
    }

    /// Renames an artifact to `kind` under the same id and extension.
    pub async fn relabel(
        &self,
        artifact: &Artifact,
        kind: ArtifactKind,
    ) -> Result<Artifact, MediaError> {
        let ext = artifact.extension().unwrap_or("bin");
        let target = self
            .root
            .join(format!("{}-{}.{ext}", kind.as_str(), artifact.id));

        tokio::fs::rename(&artifact.path, &target)
            .await
            .map_err(|error| {
                MediaError::storage(format!(
                    "Could not rename {:?} to {target:?}: {error}",
                    artifact.path
                ))
            })?;

        self.put(&target).await?.ok_or_else(|| {
            MediaError::storage(format!("Renamed artifact {target:?} disappeared"))
        })
    }

    pub async fn get(&self, id: ArtifactId) -> Result<Option<Artifact>, MediaError> {
        let indexed = self.index.read().get(&id).cloned();
        if let Some(path) = indexed {
            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => {
                    return Ok(artifact_from_entry(path, &metadata));
                }
                Ok(_) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(MediaError::storage(format!(
                        "Could not read metadata of {path:?}: {error}"
                    )));
                }
            }
            self.index.write().remove(&id);
            return Ok(None);
        }

        self.scan_for(id).await
    }

    async fn scan_for(&self, id: ArtifactId) -> Result<Option<Artifact>, MediaError> {
        let mut entries = self.read_root().await?;

        while let Some(entry) = entries.next_entry().await.map_err(|error| {
            MediaError::storage(format!("Could not list storage directory: {error}"))
        })? {
            let path = entry.path();
            if parse_artifact_name(&path).is_none_or(|(_, found)| found != id) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => {
                    return Err(MediaError::storage(format!(
                        "Could not read metadata of {path:?}: {error}"
                    )));
                }
            };

            if metadata.is_file() {
                self.index.write().insert(id, path.clone());
                return Ok(artifact_from_entry(path, &metadata));
            }
        }

        Ok(None)
    }

    pub async fn delete(&self, id: ArtifactId) -> Result<bool, MediaError> {
        let Some(artifact) = self.get(id).await? else {
            return Ok(false);
        };

        self.index.write().remove(&id);
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(MediaError::storage(format!(
                "Could not delete {:?}: {error}",
                artifact.path
            ))),
        }
    }

    /// Regular files directly under the root whose age at `now` exceeds `max_age`.
    pub async fn list_older_than(
        &self,
        max_age: Duration,
        now: SystemTime,
    ) -> Result<Vec<StoredFile>, MediaError> {
        let mut entries = self.read_root().await?;
        let mut stale = Vec::new();

        loop {
            let maybe_entry = match entries.next_entry().await {
                Ok(value) => value,
                Err(error) => {
                    warn!("Could not iterate storage directory: {error}");
                    break;
                }
            };

            let Some(entry) = maybe_entry else {
                break;
            };

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("Could not read metadata of {:?}: {error}", path);
                    continue;
                }
            };

            if !metadata.is_file() {
                continue;
            }

            let modified = match metadata.modified() {
                Ok(value) => value,
                Err(error) => {
                    warn!("Could not read modification time of {:?}: {error}", path);
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                stale.push(StoredFile { path, modified });
            }
        }

        Ok(stale)
    }

    pub async fn remove(&self, file: &StoredFile) -> Result<(), MediaError> {
        if let Some((_, id)) = parse_artifact_name(&file.path) {
            let mut index = self.index.write();
            if index.get(&id) == Some(&file.path) {
                index.remove(&id);
            }
        }
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(MediaError::storage(format!(
                "Could not delete {:?}: {error}",
                file.path
            ))),
        }
    }

    async fn read_root(&self) -> Result<tokio::fs::ReadDir, MediaError> {
        tokio::fs::read_dir(&self.root).await.map_err(|error| {
            MediaError::storage(format!(
                "Could not open storage directory {:?}: {error}",
                self.root
            ))
        })
    }
}

fn artifact_from_entry(path: PathBuf, metadata: &std::fs::Metadata) -> Option<Artifact> {
    let (kind, id) = parse_artifact_name(&path)?;
    let created_at = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Some(Artifact {
        id,
        kind,
        path,
        created_at,
    })
}

/// `video-<uuid>.mp4` -> `(Video, uuid)`. In-progress files such as
/// `video-<uuid>.mp4.part` do not match.
fn parse_artifact_name(path: &Path) -> Option<(ArtifactKind, ArtifactId)> {
    let name = path.file_name()?.to_str()?;
    let (stem, ext) = name.split_once('.')?;
    if ext.is_empty() || ext.contains('.') || matches!(ext, "part" | "ytdl" | "temp") {
        return None;
    }

    let (kind, id) = stem.split_once('-')?;
    Some((ArtifactKind::parse(kind)?, id.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn write(path: &Path) {
        tokio::fs::write(path, b"data").await.unwrap();
    }

    #[tokio::test]
    async fn reserve_and_put_round_through_the_template() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("downloads")).await.unwrap();

        let slot = store.reserve(ArtifactKind::Video);
        let template = slot.template.to_string_lossy().to_string();
        assert!(template.ends_with(&format!("video-{}.%(ext)s", slot.id)));

        let written = PathBuf::from(template.replace("%(ext)s", "mp4"));
        write(&written).await;

        let artifact = store.put(&written).await.unwrap().unwrap();
        assert_eq!(artifact.id, slot.id);
        assert_eq!(artifact.kind, ArtifactKind::Video);
        assert_eq!(artifact.extension(), Some("mp4"));

        let fetched = store.get(slot.id).await.unwrap().unwrap();
        assert_eq!(fetched.path, artifact.path);
    }

    #[tokio::test]
    async fn put_rejects_missing_and_foreign_files() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("store")).await.unwrap();

        let missing = store.root().join(format!("audio-{}.m4a", ArtifactId::new()));
        assert!(store.put(&missing).await.unwrap().is_none());

        let outside = dir.path().join(format!("audio-{}.m4a", ArtifactId::new()));
        write(&outside).await;
        assert!(store.put(&outside).await.unwrap().is_none());

        let unnamed = store.root().join("notes.txt");
        write(&unnamed).await;
        assert!(store.put(&unnamed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_ignores_partial_downloads() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let id = ArtifactId::new();

        write(&store.root().join(format!("video-{id}.mp4.part"))).await;
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_by_id() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let id = ArtifactId::new();
        let path = store.merged_path(id, "mp4");
        write(&path).await;

        assert!(store.delete(id).await.unwrap());
        assert!(!path.exists());
        assert!(!store.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn list_older_than_compares_against_now() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        write(&store.root().join("leftover.part")).await;
        tokio::fs::create_dir(store.root().join("nested")).await.unwrap();

        let hour = Duration::from_secs(60 * 60);
        let fresh = store
            .list_older_than(hour, SystemTime::now() + Duration::from_secs(30 * 60))
            .await
            .unwrap();
        assert!(fresh.is_empty());

        let stale = store
            .list_older_than(hour, SystemTime::now() + Duration::from_secs(61 * 60))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert!(stale[0].path.ends_with("leftover.part"));
    }

    #[tokio::test]
    async fn get_serves_adopted_artifacts_from_the_index() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let id = ArtifactId::new();
        let path = store.merged_path(id, "mp4");
        write(&path).await;
        store.put(&path).await.unwrap().unwrap();

        assert_eq!(store.index.read().get(&id), Some(&path));
        assert_eq!(store.get(id).await.unwrap().unwrap().path, path);

        tokio::fs::remove_file(&path).await.unwrap();
        assert!(store.get(id).await.unwrap().is_none());
        assert!(!store.index.read().contains_key(&id));
    }

    #[tokio::test]
    async fn get_finds_files_from_a_previous_run() {
        let dir = tempdir().unwrap();
        let id = ArtifactId::new();
        {
            let store = ArtifactStore::open(dir.path()).await.unwrap();
            write(&store.root().join(format!("audio-{id}.m4a"))).await;
        }

        let reopened = ArtifactStore::open(dir.path()).await.unwrap();
        assert!(reopened.index.read().is_empty());

        let artifact = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Audio);
        assert!(reopened.index.read().contains_key(&id));
    }

    #[tokio::test]
    async fn relabel_keeps_the_id_and_extension() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let slot = store.reserve(ArtifactKind::Video);
        let written = PathBuf::from(slot.template.to_string_lossy().replace("%(ext)s", "webm"));
        write(&written).await;
        let video = store.put(&written).await.unwrap().unwrap();

        let merged = store.relabel(&video, ArtifactKind::Merged).await.unwrap();

        assert_eq!(merged.id, slot.id);
        assert_eq!(merged.kind, ArtifactKind::Merged);
        assert_eq!(merged.extension(), Some("webm"));
        assert!(!written.exists());
        assert_eq!(store.get(slot.id).await.unwrap().unwrap().path, merged.path);
    }

    #[test]
    fn artifact_ids_parse_from_strings_only_when_uuid() {
        assert!("../../etc/passwd".parse::<ArtifactId>().is_err());
        let id = ArtifactId::new();
        assert_eq!(id.to_string().parse::<ArtifactId>().unwrap(), id);
    }
}
