use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{CacheError, Result};
use crate::store::publish;

/// Cache of pre-built dependency bundles fetched from object storage.
///
/// Bundles are addressed by their source URI with the presigned query
/// string stripped, so re-signed URLs for the same object share one cache
/// entry. Extraction follows the same create-in-temp/atomic-rename
/// protocol as [`crate::PackageCache`].
pub struct TarballCache {
    root: PathBuf,
    client: reqwest::Client,
}

impl TarballCache {
    pub fn new(root: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CacheError::DownloadFailed(format!("http client: {e}")))?;
        Ok(Self { root, client })
    }

    /// Committed location for a bundle source URI.
    pub fn entry_path(&self, source_uri: &str) -> Result<PathBuf> {
        Ok(self.root.join(bundle_key(source_uri)?))
    }

    /// Return the extracted bundle directory, downloading and extracting
    /// first if absent. An already-extracted bundle short-circuits with
    /// zero remote calls.
    pub async fn ensure(&self, presigned_url: &str) -> Result<PathBuf> {
        let target = self.entry_path(presigned_url)?;
        if tokio::fs::try_exists(&target).await? {
            debug!(path = %target.display(), "tarball cache hit");
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let suffix = format!("{}.{}", std::process::id(), uuid::Uuid::new_v4());
        let tarball = self.root.join(format!("download.{suffix}.tgz"));
        let tmp = self.root.join(format!("extract.{suffix}"));

        let result = self.fetch_and_extract(presigned_url, &tarball, &tmp).await;
        let _ = tokio::fs::remove_file(&tarball).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_dir_all(&tmp).await;
            return Err(e);
        }

        publish(&tmp, &target).await?;
        info!(path = %target.display(), "tarball extracted");
        Ok(target)
    }

    async fn fetch_and_extract(&self, url: &str, tarball: &Path, tmp: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CacheError::DownloadFailed(redact_url_error(&e)))?;

        let sha = stream_to_file(response, tarball).await?;
        debug!(sha256 = %sha, "bundle downloaded");

        tokio::fs::create_dir_all(tmp).await?;
        extract_archive(tarball.to_owned(), tmp.to_owned()).await
    }
}

/// Cache key for a bundle: the content-addressed source URI (query string
/// and fragment stripped, so signatures do not fragment the cache).
fn bundle_key(source_uri: &str) -> Result<String> {
    let mut url =
        Url::parse(source_uri).map_err(|e| CacheError::InvalidUri(format!("{e}")))?;
    url.set_query(None);
    url.set_fragment(None);

    let mut hex = format!("{:x}", Sha256::digest(url.as_str().as_bytes()));
    hex.truncate(16);
    Ok(hex)
}

/// Presigned URLs embed credentials in the query string; error text must
/// not echo them.
fn redact_url_error(e: &reqwest::Error) -> String {
    match (e.status(), e.url().map(Url::path)) {
        (Some(status), Some(path)) => format!("{status} fetching {path}"),
        (Some(status), None) => format!("{status}"),
        (None, Some(path)) => format!("request for {path} failed"),
        (None, None) => "request failed".to_string(),
    }
}

/// Stream an HTTP response to a file, computing SHA256 incrementally.
/// Returns the hex-encoded digest.
async fn stream_to_file(mut response: reqwest::Response, path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut hasher = Sha256::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| CacheError::DownloadFailed(format!("read response chunk: {e}")))?
    {
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Extract a gzipped tarball into `target`, rejecting any entry that would
/// resolve outside it (absolute paths or `..` components).
async fn extract_archive(tarball: PathBuf, target: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || extract_archive_blocking(&tarball, &target))
        .await
        .map_err(|e| CacheError::InstallFailed(format!("extract task: {e}")))?
}

fn extract_archive_blocking(tarball: &Path, target: &Path) -> Result<()> {
    let file = std::fs::File::open(tarball)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry
            .path()
            .map_err(|e| {
                CacheError::ArchiveRejected(format!("unreadable entry path: {e}"))
            })?
            .into_owned();
        validate_entry_path(&path)?;
        // unpack_in re-checks containment after link resolution.
        if !entry.unpack_in(target)? {
            return Err(CacheError::ArchiveRejected(format!(
                "entry escapes extraction directory: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn validate_entry_path(path: &Path) -> Result<()> {
    use std::path::Component;

    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(CacheError::ArchiveRejected(format!(
                    "entry path contains '..': {}",
                    path.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(CacheError::ArchiveRejected(format!(
                    "entry path is absolute: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzipped_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn extracts_safe_entries() {
        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("bundle.tgz");
        std::fs::write(&tarball, gzipped_tar(&[("pkg/module.py", b"x = 1\n")])).unwrap();

        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        extract_archive(tarball, out.clone()).await.unwrap();

        assert_eq!(std::fs::read(out.join("pkg/module.py")).unwrap(), b"x = 1\n");
    }

    /// Build a tarball whose entry name bypasses `set_path` sanitization,
    /// the way a hostile archive would.
    fn gzipped_tar_raw_name(name: &[u8], content: &[u8]) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name);
        }
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();

        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, content).unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn rejects_parent_dir_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("evil.tgz");
        std::fs::write(
            &tarball,
            gzipped_tar_raw_name(b"../escape.py", b"pwned = True\n"),
        )
        .unwrap();

        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let err = extract_archive(tarball, out).await.unwrap_err();
        assert!(matches!(err, CacheError::ArchiveRejected(_)), "got: {err}");
        assert!(!dir.path().join("escape.py").exists());
    }

    #[test]
    fn bundle_key_ignores_presigned_query() {
        let a = bundle_key("https://bucket.example.com/bundles/abc.tgz?X-Sig=one").unwrap();
        let b = bundle_key("https://bucket.example.com/bundles/abc.tgz?X-Sig=two").unwrap();
        let c = bundle_key("https://bucket.example.com/bundles/def.tgz?X-Sig=one").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn bundle_key_is_short_lowercase_hex() {
        let key = bundle_key("https://example.com/x.tgz").unwrap();
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn entry_path_validation() {
        assert!(validate_entry_path(Path::new("pkg/mod.py")).is_ok());
        assert!(validate_entry_path(Path::new("./pkg/mod.py")).is_ok());
        assert!(validate_entry_path(Path::new("../evil.py")).is_err());
        assert!(validate_entry_path(Path::new("/etc/passwd")).is_err());
        assert!(validate_entry_path(Path::new("a/../../evil.py")).is_err());
    }
}
