use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::llm::media::{detect_mime_type, extension_for_mime, MIME_PNG};

/// Local-disk image storage with public URLs rooted at `public_base`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    public_base: Url,
}

fn sanitize_segment(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}

fn ensure_relative(path: &str) -> Result<&Path> {
    let relative = Path::new(path);
    let safe = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if path.is_empty() || !safe {
        return Err(anyhow!("Refusing to store image at unsafe path {path:?}"));
    }
    Ok(relative)
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>, public_base: &str) -> Result<Self> {
        let mut base = public_base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let public_base =
            Url::parse(&base).with_context(|| format!("Invalid public storage URL {base}"))?;
        Ok(ImageStore {
            dir: dir.into(),
            public_base,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<user>/<uuid>.<ext>`, extension sniffed from the bytes.
    pub fn object_path(user_id: &str, bytes: &[u8]) -> String {
        let mime_type = detect_mime_type(bytes).unwrap_or_else(|| MIME_PNG.to_string());
        format!(
            "{}/{}.{}",
            sanitize_segment(user_id),
            Uuid::new_v4(),
            extension_for_mime(&mime_type)
        )
    }

    pub fn public_url(&self, path: &str) -> Result<String> {
        let url = self
            .public_base
            .join(path)
            .with_context(|| format!("Failed to build public URL for {path}"))?;
        Ok(url.to_string())
    }

    /// Writes `bytes` under the storage dir and returns the public URL.
    pub async fn upload(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let relative = ensure_relative(path)?;
        let target = self.dir.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        info!("Stored image {} ({} bytes)", path, bytes.len());
        self.public_url(path)
    }
}
