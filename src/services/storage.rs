use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// Content-addressed object store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Materialize the content behind `hash` into a private scratch directory.
    async fn fetch(&self, hash: &str) -> Result<ScratchArtifact, StorageError>;

    /// Fetch a small text document.
    async fn fetch_text(&self, hash: &str) -> Result<String, StorageError>;

    /// Add a local file to the store and return its content hash.
    async fn store(&self, path: &Path) -> Result<String, StorageError>;
}

/// A fetched artifact on local disk, owned by exactly one pipeline run.
///
/// The backing directory is unique per fetch and is removed when the value
/// is dropped or closed.
#[derive(Debug)]
pub struct ScratchArtifact {
    dir: TempDir,
    file: PathBuf,
    len: usize,
}

impl ScratchArtifact {
    /// Write `content` into a new uniquely named directory under `root`.
    pub async fn materialize(root: &Path, hash: &str, content: &[u8]) -> Result<Self, StorageError> {
        validate_hash(hash)?;
        tokio::fs::create_dir_all(root).await?;
        let dir = tempfile::Builder::new().prefix("artifact_").tempdir_in(root)?;
        let file = dir.path().join(hash);
        // On error `dir` is dropped here and removed with whatever was written.
        tokio::fs::write(&file, content).await?;

        Ok(Self {
            dir,
            file,
            len: content.len(),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove the scratch directory now, reporting any I/O failure.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Client for the IPFS HTTP RPC API (`/api/v0/*`).
pub struct IpfsStore {
    http: Client,
    api_url: String,
    scratch_root: PathBuf,
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl IpfsStore {
    pub fn new(api_url: &str, timeout: Duration, scratch_root: PathBuf) -> Result<Self, StorageError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StorageError::Transport)?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            scratch_root,
        })
    }

    async fn cat(&self, hash: &str) -> Result<Vec<u8>, StorageError> {
        validate_hash(hash)?;
        let url = format!("{}/api/v0/cat", self.api_url);

        let response = self
            .http
            .post(&url)
            .query(&[("arg", hash)])
            .send()
            .await
            .map_err(StorageError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Kubo answers a missing block with 500 and a "not found" message.
            if status == StatusCode::NOT_FOUND || body.to_lowercase().contains("not found") {
                return Err(StorageError::NotFound(hash.to_string()));
            }
            return Err(StorageError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(StorageError::Transport)?;
        if bytes.is_empty() {
            return Err(StorageError::Empty(hash.to_string()));
        }
        Ok(bytes.to_vec())
    }

    /// Check that the IPFS API answers (for health checks).
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let url = format!("{}/api/v0/version", self.api_url);
        self.http
            .post(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(StorageError::Transport)?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for IpfsStore {
    async fn fetch(&self, hash: &str) -> Result<ScratchArtifact, StorageError> {
        let content = self.cat(hash).await?;
        let artifact = ScratchArtifact::materialize(&self.scratch_root, hash, &content).await?;
        info!(
            hash = %hash,
            bytes = artifact.len(),
            path = %artifact.file().display(),
            "Downloaded artifact"
        );
        Ok(artifact)
    }

    async fn fetch_text(&self, hash: &str) -> Result<String, StorageError> {
        let content = self.cat(hash).await?;
        debug!(hash = %hash, bytes = content.len(), "Fetched text document");
        String::from_utf8(content).map_err(|_| StorageError::Decode(format!("{} is not UTF-8", hash)))
    }

    async fn store(&self, path: &Path) -> Result<String, StorageError> {
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(content).file_name(file_name));

        let response = self
            .http
            .post(format!("{}/api/v0/add", self.api_url))
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(StorageError::Transport)?;

        let added: AddResponse = response.json().await.map_err(StorageError::Transport)?;
        info!(path = %path.display(), hash = %added.hash, "Stored file");
        Ok(added.hash)
    }
}

/// Hashes double as file names; refuse anything that could escape the scratch dir.
fn validate_hash(hash: &str) -> Result<(), StorageError> {
    let ok = !hash.is_empty()
        && hash.len() <= 128
        && hash.chars().all(|c| c.is_ascii_alphanumeric());
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidHash(hash.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Content is empty: {0}")]
    Empty(String),

    #[error("Invalid content hash: {0:?}")]
    InvalidHash(String),

    #[error("Object store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Object store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Scratch I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_validation() {
        assert!(validate_hash("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").is_ok());
        assert!(validate_hash("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").is_ok());
        assert!(validate_hash("").is_err());
        assert!(validate_hash("../etc/passwd").is_err());
        assert!(validate_hash("Qm/abc").is_err());
    }

    #[tokio::test]
    async fn test_scratch_is_isolated_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let a = ScratchArtifact::materialize(root.path(), "QmA", b"one").await.unwrap();
        let b = ScratchArtifact::materialize(root.path(), "QmA", b"two").await.unwrap();
        assert_ne!(a.dir(), b.dir());
        assert_eq!(std::fs::read(a.file()).unwrap(), b"one");

        let a_dir = a.dir().to_path_buf();
        drop(a);
        assert!(!a_dir.exists());
        assert!(b.dir().exists());

        let b_dir = b.dir().to_path_buf();
        b.close().unwrap();
        assert!(!b_dir.exists());
    }
}
