use crate::Result;
use endpoint_protocol::OmittedReason;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const BODIES_DIR: &str = "bodies";

/// Hex SHA-256 of raw body bytes. Identical bytes always hash identically,
/// which is what makes the store content-addressed.
pub fn body_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Where a persisted body ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyPlacement {
    /// Small enough to live on the journal line itself.
    Inline(Value),
    /// Externalized; the payload is the run-relative path `bodies/<hash>.json`.
    External(String),
    /// Not persisted, with the reason to record.
    Omitted(OmittedReason),
}

/// Content-addressed hybrid body storage under `<run>/bodies/`.
///
/// Each distinct body lands in at most one file, keyed by its raw-byte hash;
/// existing files are never appended to or rewritten.
#[derive(Debug, Clone)]
pub struct BodyStore {
    run_dir: PathBuf,
    inline_body_bytes: u64,
    max_body_bytes: u64,
}

impl BodyStore {
    pub async fn create(
        run_dir: &Path,
        inline_body_bytes: u64,
        max_body_bytes: u64,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(run_dir.join(BODIES_DIR)).await?;
        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            inline_body_bytes,
            max_body_bytes,
        })
    }

    /// Place one redacted body: inline it, externalize it, or omit it.
    ///
    /// `raw_size` is the size of the original response bytes; placement is
    /// judged on that, not on the redacted rendering.
    pub async fn place(&self, raw_size: u64, hash: &str, redacted: &Value) -> BodyPlacement {
        if raw_size <= self.inline_body_bytes {
            return BodyPlacement::Inline(redacted.clone());
        }
        if raw_size > self.max_body_bytes {
            return BodyPlacement::Omitted(OmittedReason::MaxBodyBytes);
        }

        let relative = format!("{BODIES_DIR}/{hash}.json");
        match self.write_once(&relative, redacted).await {
            Ok(()) => BodyPlacement::External(relative),
            Err(err) => {
                log::warn!("body write failed for {hash}: {err}");
                BodyPlacement::Omitted(OmittedReason::Unavailable)
            }
        }
    }

    /// Write the body file exactly once per hash. A concurrent writer that
    /// loses the `create_new` race simply observes the existing file.
    async fn write_once(&self, relative: &str, redacted: &Value) -> Result<()> {
        let path = self.run_dir.join(relative);
        let pretty = serde_json::to_vec_pretty(redacted)?;

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&pretty).await?;
                file.flush().await?;
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store(inline: u64, max: u64) -> (TempDir, BodyStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = BodyStore::create(dir.path(), inline, max)
            .await
            .expect("create store");
        (dir, store)
    }

    #[test]
    fn hash_is_stable_hex_sha256() {
        let a = body_hash(b"{\"id\":1}");
        let b = body_hash(b"{\"id\":1}");
        let c = body_hash(b"{\"id\":2}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn small_bodies_inline_without_touching_disk() {
        let (dir, store) = store(16 * 1024, 1024 * 1024).await;
        let body = json!({"id": 123, "name": "test"});

        let placement = store.place(26, &body_hash(b"x"), &body).await;
        assert_eq!(placement, BodyPlacement::Inline(body));

        let entries = std::fs::read_dir(dir.path().join(BODIES_DIR))
            .expect("bodies dir")
            .count();
        assert_eq!(entries, 0);
    }

    #[tokio::test]
    async fn large_bodies_externalize_once_per_hash() {
        let (dir, store) = store(16, 1024 * 1024).await;
        let body = json!({"items": [1, 2, 3]});
        let hash = body_hash(b"large-body");

        let first = store.place(100, &hash, &body).await;
        let BodyPlacement::External(relative) = first else {
            panic!("expected external placement, got {first:?}");
        };
        assert_eq!(relative, format!("bodies/{hash}.json"));

        let path = dir.path().join(&relative);
        let written = std::fs::read_to_string(&path).expect("body file");
        let parsed: Value = serde_json::from_str(&written).expect("valid json");
        assert_eq!(parsed, body);

        // Second placement with the same hash leaves the file untouched.
        let mtime = std::fs::metadata(&path).expect("meta").modified().expect("mtime");
        let second = store.place(100, &hash, &json!({"other": true})).await;
        assert_eq!(second, BodyPlacement::External(relative));
        let mtime_after = std::fs::metadata(&path).expect("meta").modified().expect("mtime");
        assert_eq!(mtime, mtime_after);
        assert_eq!(
            std::fs::read_to_string(&path).expect("body file"),
            written,
            "existing body file must never be rewritten"
        );
    }

    #[tokio::test]
    async fn oversized_bodies_are_omitted() {
        let (_dir, store) = store(16, 1024).await;
        let placement = store.place(4096, &body_hash(b"big"), &json!({})).await;
        assert_eq!(placement, BodyPlacement::Omitted(OmittedReason::MaxBodyBytes));
    }

    #[tokio::test]
    async fn racing_writers_on_one_hash_both_succeed() {
        let (_dir, store) = store(0, 1024 * 1024).await;
        let body = json!({"id": 1});
        let hash = body_hash(b"racy");

        let a = store.place(10, &hash, &body);
        let b = store.place(10, &hash, &body);
        let (first, second) = tokio::join!(a, b);

        for placement in [first, second] {
            assert!(matches!(placement, BodyPlacement::External(_)));
        }
    }
}
