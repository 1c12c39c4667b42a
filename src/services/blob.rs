use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const VARIANTS_DIR: &str = "variants";
const SCRATCH_DIR: &str = "tmp";

/// Directory-backed store for attachment bytes. Blobs are immutable once
/// written; replacing an attachment writes a new blob and deletes the old one.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: String,
    pub byte_size: i64,
    pub checksum: String,
}

impl BlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("could not create blob directory {}", root.display()))?;
        std::fs::create_dir_all(root.join(VARIANTS_DIR))?;
        std::fs::create_dir_all(root.join(SCRATCH_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache directory for derived renditions.
    pub fn variants_dir(&self) -> PathBuf {
        self.root.join(VARIANTS_DIR)
    }

    /// Where in-flight temporary files are placed.
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    pub fn path(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            bail!("Invalid blob key: {}", key);
        }
        Ok(self.root.join(key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Writes `data` under a fresh key. The file appears atomically.
    pub fn put(&self, data: &[u8], extension: &str) -> Result<StoredBlob> {
        let key = if extension.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4(), extension)
        };
        let path = self.path(&key)?;

        let mut file = tempfile::NamedTempFile::new_in(self.scratch_dir())?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(&path)
            .map_err(|e| anyhow::anyhow!("could not persist blob {}: {}", key, e.error))?;

        Ok(StoredBlob {
            key,
            byte_size: data.len() as i64,
            checksum: checksum(data),
        })
    }

    pub fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path(key)?;
        std::fs::read(&path).with_context(|| format!("could not read blob {}", key))
    }

    /// Streams the blob into `writer`, returning the number of bytes copied.
    pub fn download_to<W: Write>(&self, key: &str, writer: &mut W) -> Result<u64> {
        let path = self.path(key)?;
        let mut file =
            std::fs::File::open(&path).with_context(|| format!("could not open blob {}", key))?;
        let copied = std::io::copy(&mut file, writer)?;
        writer.flush()?;
        Ok(copied)
    }

    /// Removes the blob and any cached renditions of it. Missing blobs are
    /// not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let stem = key_stem(key);
        if let Ok(entries) = std::fs::read_dir(self.variants_dir()) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(&format!("{}-", stem)) {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }
}

pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn key_stem(key: &str) -> &str {
    key.split('.').next().unwrap_or(key)
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 64
        && !key.starts_with('.')
        && !key.contains("..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
