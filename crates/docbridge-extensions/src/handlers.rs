//! Source handlers: manifest discovery and code download per URL scheme
//!
//! Two handlers ship with the runtime:
//! - [`GitHubHandler`] for `https://github.com/<owner>/<repo>[/tree/<ref>]`
//! - [`ArchiveHandler`] for URLs of `.tar.gz` / `.tgz` archives
//!
//! Both run the same three-tier manifest fallback: a multi-extension manifest,
//! then a single-extension manifest, then a bare entry file from which a
//! manifest is inferred.

use async_trait::async_trait;
use docbridge_core::types::{
    Manifest, NetworkConfig, DEFAULT_ENTRY_POINT, MULTI_PLUGIN_MANIFEST, SINGLE_PLUGIN_MANIFEST,
};
use flate2::read::GzDecoder;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tar::{Archive, EntryType};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::source_manager::SourceError;

static GITHUB_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?github\.com/([^/]+)/([^/]+?)(?:\.git)?(?:/tree/([^/]+(?:/[^/]+)*))?/?$")
        .expect("GitHub URL regex is valid")
});

/// A manifest together with where it was found
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    pub manifest: Manifest,
    /// URL or archive member the manifest was read from
    pub location: String,
}

/// Fetches manifests and code for one kind of source URL
#[async_trait]
pub trait SourceHandler: Send + Sync {
    /// Handler name for logging
    fn name(&self) -> &'static str;

    /// Run the manifest fallback against `url`
    async fn fetch_manifest(&self, url: &str) -> Result<FetchedManifest, SourceError>;

    /// Download the sub-tree `path` of the source into `dest`
    async fn download(&self, url: &str, path: &str, dest: &Path) -> Result<(), SourceError>;
}

/// Pick the handler for `url`
pub fn resolve_handler(url: &str, network: &NetworkConfig) -> Result<Box<dyn SourceHandler>, SourceError> {
    if GitHubRepo::parse(url, &network.default_ref).is_some() {
        return Ok(Box::new(GitHubHandler::new(network)?));
    }
    if ArchiveHandler::handles(url) {
        return Ok(Box::new(ArchiveHandler::new(network)?));
    }
    Err(SourceError::UnsupportedUrl(url.to_string()))
}

fn http_client(network: &NetworkConfig) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(&network.user_agent)
        .timeout(Duration::from_secs(network.http_timeout_secs))
        .build()
        .map_err(|e| SourceError::Fetch {
            url: String::new(),
            reason: format!("Failed to create HTTP client: {}", e),
        })
}

/// GET `url`; `Ok(None)` on 404, error on any other failure
async fn get_optional(
    client: &reqwest::Client,
    url: &str,
    timeout: Option<Duration>,
) -> Result<Option<Vec<u8>>, SourceError> {
    let fetch_error = |reason: String| SourceError::Fetch {
        url: url.to_string(),
        reason,
    };

    let mut request = client.get(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    let response = request.send().await.map_err(|e| fetch_error(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        debug!("Not found: {}", url);
        return Ok(None);
    }
    if !status.is_success() {
        return Err(fetch_error(format!("HTTP {}", status)));
    }

    let body = response.bytes().await.map_err(|e| fetch_error(e.to_string()))?;
    Ok(Some(body.to_vec()))
}

fn invalid_manifest(location: &str, error: docbridge_core::Error) -> SourceError {
    SourceError::InvalidManifest {
        location: location.to_string(),
        reason: error.to_string(),
    }
}

/// Owner, repository and ref parsed from a GitHub URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepo {
    pub owner: String,
    pub repo: String,
    pub git_ref: String,
}

impl GitHubRepo {
    pub fn parse(url: &str, default_ref: &str) -> Option<Self> {
        let captures = GITHUB_URL.captures(url.trim())?;
        Some(Self {
            owner: captures[1].to_string(),
            repo: captures[2].to_string(),
            git_ref: captures
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| default_ref.to_string()),
        })
    }
}

/// Handler for GitHub repositories
pub struct GitHubHandler {
    client: reqwest::Client,
    raw_base: String,
    archive_base: String,
    default_ref: String,
    download_timeout: Duration,
}

impl GitHubHandler {
    pub fn new(network: &NetworkConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: http_client(network)?,
            raw_base: network.github_raw_base.trim_end_matches('/').to_string(),
            archive_base: network.github_archive_base.trim_end_matches('/').to_string(),
            default_ref: network.default_ref.clone(),
            download_timeout: Duration::from_secs(network.download_timeout_secs),
        })
    }

    fn repo(&self, url: &str) -> Result<GitHubRepo, SourceError> {
        GitHubRepo::parse(url, &self.default_ref).ok_or_else(|| SourceError::UnsupportedUrl(url.to_string()))
    }

    fn raw_url(&self, repo: &GitHubRepo, file: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.raw_base, repo.owner, repo.repo, repo.git_ref, file
        )
    }

    fn archive_url(&self, repo: &GitHubRepo) -> String {
        format!(
            "{}/{}/{}/archive/refs/heads/{}.tar.gz",
            self.archive_base, repo.owner, repo.repo, repo.git_ref
        )
    }
}

#[async_trait]
impl SourceHandler for GitHubHandler {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn fetch_manifest(&self, url: &str) -> Result<FetchedManifest, SourceError> {
        let repo = self.repo(url)?;

        let multi_url = self.raw_url(&repo, MULTI_PLUGIN_MANIFEST);
        if let Some(content) = get_optional(&self.client, &multi_url, None).await? {
            let manifest = Manifest::parse_multi(&content).map_err(|e| invalid_manifest(&multi_url, e))?;
            return Ok(FetchedManifest {
                manifest,
                location: multi_url,
            });
        }

        let single_url = self.raw_url(&repo, SINGLE_PLUGIN_MANIFEST);
        if let Some(content) = get_optional(&self.client, &single_url, None).await? {
            let manifest = Manifest::parse_single(&content).map_err(|e| invalid_manifest(&single_url, e))?;
            return Ok(FetchedManifest {
                manifest,
                location: single_url,
            });
        }

        let entry_url = self.raw_url(&repo, DEFAULT_ENTRY_POINT);
        if get_optional(&self.client, &entry_url, None).await?.is_some() {
            debug!("No manifest in {}/{}, inferring one", repo.owner, repo.repo);
            return Ok(FetchedManifest {
                manifest: Manifest::inferred(&repo.repo),
                location: entry_url,
            });
        }

        Err(SourceError::ManifestNotFound(url.to_string()))
    }

    async fn download(&self, url: &str, path: &str, dest: &Path) -> Result<(), SourceError> {
        let repo = self.repo(url)?;
        let archive_url = self.archive_url(&repo);

        info!("Downloading {}", archive_url);
        let data = get_optional(&self.client, &archive_url, Some(self.download_timeout))
            .await?
            .ok_or_else(|| SourceError::Fetch {
                url: archive_url.clone(),
                reason: "HTTP 404 Not Found".to_string(),
            })?;

        install_subtree(data, path.to_string(), dest.to_path_buf()).await
    }
}

/// Handler for `.tar.gz` / `.tgz` archive URLs
pub struct ArchiveHandler {
    client: reqwest::Client,
    download_timeout: Duration,
}

impl ArchiveHandler {
    pub fn new(network: &NetworkConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: http_client(network)?,
            download_timeout: Duration::from_secs(network.download_timeout_secs),
        })
    }

    /// Whether `url` points at a gzipped tarball
    pub fn handles(url: &str) -> bool {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        (path.starts_with("http://") || path.starts_with("https://"))
            && (path.ends_with(".tar.gz") || path.ends_with(".tgz"))
    }

    /// Archive name without extension, used when inferring a manifest
    fn archive_name(url: &str) -> String {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or(path);
        file.trim_end_matches(".tar.gz").trim_end_matches(".tgz").to_string()
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        get_optional(&self.client, url, Some(self.download_timeout))
            .await?
            .ok_or_else(|| SourceError::ManifestNotFound(url.to_string()))
    }
}

#[async_trait]
impl SourceHandler for ArchiveHandler {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn fetch_manifest(&self, url: &str) -> Result<FetchedManifest, SourceError> {
        let data = self.fetch(url).await?;
        let name = Self::archive_name(url);
        let url = url.to_string();

        tokio::task::spawn_blocking(move || {
            let staging = TempDir::new()?;
            extract_archive(&data, staging.path())?;
            let root = archive_root(staging.path())?;
            read_local_manifest(&root, &name)?.ok_or(SourceError::ManifestNotFound(url))
        })
        .await
        .map_err(|e| SourceError::Io(std::io::Error::other(e)))?
    }

    async fn download(&self, url: &str, path: &str, dest: &Path) -> Result<(), SourceError> {
        info!("Downloading {}", url);
        let data = self.fetch(url).await?;
        install_subtree(data, path.to_string(), dest.to_path_buf()).await
    }
}

/// Read a manifest from an extracted source tree
fn read_local_manifest(root: &Path, name: &str) -> Result<Option<FetchedManifest>, SourceError> {
    let multi = root.join(MULTI_PLUGIN_MANIFEST);
    if multi.is_file() {
        let location = multi.display().to_string();
        let manifest = Manifest::parse_multi(&std::fs::read(&multi)?).map_err(|e| invalid_manifest(&location, e))?;
        return Ok(Some(FetchedManifest { manifest, location }));
    }

    let single = root.join(SINGLE_PLUGIN_MANIFEST);
    if single.is_file() {
        let location = single.display().to_string();
        let manifest = Manifest::parse_single(&std::fs::read(&single)?).map_err(|e| invalid_manifest(&location, e))?;
        return Ok(Some(FetchedManifest { manifest, location }));
    }

    let entry = root.join(DEFAULT_ENTRY_POINT);
    if entry.is_file() {
        return Ok(Some(FetchedManifest {
            manifest: Manifest::inferred(name),
            location: entry.display().to_string(),
        }));
    }

    Ok(None)
}

/// Extract `data` into a staging dir and copy `<root>/<path>` into `dest`
async fn install_subtree(data: Vec<u8>, path: String, dest: PathBuf) -> Result<(), SourceError> {
    tokio::task::spawn_blocking(move || {
        let staging = TempDir::new()?;
        extract_archive(&data, staging.path())?;
        let root = archive_root(staging.path())?;

        let relative = safe_relative_path(Path::new(&path))
            .ok_or_else(|| SourceError::Invalid(format!("Unsafe extension path '{}'", path)))?;
        let subtree = root.join(relative);
        if !subtree.is_dir() {
            return Err(SourceError::Invalid(format!(
                "Path '{}' does not exist in the downloaded source",
                path
            )));
        }

        let copied = copy_tree(&subtree, &dest)?;
        debug!("Copied {} files into {}", copied, dest.display());
        Ok(())
    })
    .await
    .map_err(|e| SourceError::Io(std::io::Error::other(e)))?
}

/// Normalise an archive member path, rejecting `..` and absolute paths
pub(crate) fn safe_relative_path(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

/// Extract regular files and directories of a gzipped tarball into `dest`
///
/// Entries with unsafe paths and links are skipped. Returns the number of
/// files written.
pub fn extract_archive(data: &[u8], dest: &Path) -> Result<usize, SourceError> {
    let mut archive = Archive::new(GzDecoder::new(data));
    let mut files = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();

        let Some(relative) = safe_relative_path(&raw_path) else {
            warn!("Skipping unsafe archive entry: {}", raw_path.display());
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(&relative);
        match entry.header().entry_type() {
            EntryType::Directory => std::fs::create_dir_all(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry.unpack(&target)?;
                files += 1;
            }
            other => debug!("Skipping {:?} archive entry: {}", other, raw_path.display()),
        }
    }

    Ok(files)
}

/// The single top-level directory of an extracted archive, or `dir` itself
pub fn archive_root(dir: &Path) -> Result<PathBuf, SourceError> {
    let entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();

    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(dir.to_path_buf()),
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<usize, SourceError> {
    std::fs::create_dir_all(to)?;
    let mut copied = 0;

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| SourceError::Io(std::io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| SourceError::Io(std::io::Error::other(e)))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Mark an extension entry file executable (0o755)
pub fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.is_file() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
