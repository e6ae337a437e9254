//! Fixtures for hosted extensions and remote sources
//!
//! Hosted extensions are small `/bin/sh` scripts that answer the extension
//! host protocol with canned JSON. Sources are served by a wiremock server
//! standing in for GitHub's raw-file and archive endpoints.

#![allow(dead_code)]

use docbridge_core::types::NetworkConfig;
use docbridge_extensions::registry::ExtensionRegistry;
use docbridge_extensions::store::MemoryStore;
use docbridge_extensions::{DynamicLoader, LifecycleLedger, SourceManager};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Describe payload of a hosted extension with one pre-processor
pub fn describe_json(slug: &str, name: &str, version: &str, component: &str) -> String {
    format!(
        r#"{{"plugin":{{"slug":"{slug}","name":"{name}","version":"{version}","dependencies":["requests>=2,<3"]}},"preprocessors":[{{"slug":"{component}","name":"{component}","config_schema":{{"type":"object","properties":{{"min_words":{{"type":"integer","default":1}}}}}}}}]}}"#
    )
}

/// Shell script answering `describe`, `validate_config` and `preprocess`
pub fn plugin_script(describe: &str) -> String {
    format!(
        r#"#!/bin/sh
request=$(cat)
case "$request" in
  *'"call":"describe"'*)
    echo '{{"ok":true,"result":{describe}}}'
    ;;
  *'"call":"validate_config"'*)
    echo '{{"ok":true,"result":[]}}'
    ;;
  *'"call":"preprocess"'*)
    echo '{{"ok":true,"result":{{"success":true,"message":"counted"}}}}'
    ;;
  *)
    echo '{{"ok":false,"error":"unsupported call"}}'
    ;;
esac
"#
    )
}

/// Script for the `word-count` extension at `version`
pub fn word_count_script(version: &str) -> String {
    plugin_script(&describe_json("word-count", "Word Count", version, "count"))
}

/// Write an executable entry file into `dir`
pub fn write_entry(dir: &Path, entry_point: &str, content: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let entry = dir.join(entry_point);
    std::fs::write(&entry, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&entry, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    entry
}

/// Gzipped tarball with every file under a single top-level directory
pub fn tarball(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", root, name), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Repository archive holding `word-count/plugin` at `version`
pub fn word_count_archive(version: &str) -> Vec<u8> {
    tarball("plugins-main", &[("word-count/plugin", &word_count_script(version))])
}

/// Multi-extension manifest offering `word-count` at `version`
pub fn word_count_manifest(version: &str) -> String {
    format!(
        r#"{{"version":"{version}","plugins":[{{"slug":"word-count","name":"Word Count","version":"{version}","description":"Counts words","path":"word-count","entry_point":"plugin"}}]}}"#
    )
}

/// Mock server answering GitHub raw and archive requests
pub struct GitHubMock {
    pub server: MockServer,
}

impl GitHubMock {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            github_raw_base: self.server.uri(),
            github_archive_base: self.server.uri(),
            http_timeout_secs: 5,
            download_timeout_secs: 5,
            ..NetworkConfig::default()
        }
    }

    /// Serve `docbridge-plugins.json` for `owner/repo` on the default branch
    pub async fn serve_manifest(&self, owner: &str, repo: &str, body: &str) {
        self.serve_file(owner, repo, "docbridge-plugins.json", body).await;
    }

    /// Serve a raw file of `owner/repo` on the default branch
    pub async fn serve_file(&self, owner: &str, repo: &str, file: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{}/{}/main/{}", owner, repo, file)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Serve raw bytes at an arbitrary path
    pub async fn serve_bytes(&self, at: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    /// Serve the default-branch tarball of `owner/repo`
    pub async fn serve_archive(&self, owner: &str, repo: &str, archive: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/{}/{}/archive/refs/heads/main.tar.gz", owner, repo)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&self.server)
            .await;
    }

    /// Drop every mounted response
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of archive downloads served so far
    pub async fn archive_downloads(&self) -> usize {
        self.requests_ending_with(".tar.gz").await
    }

    /// Number of multi-extension manifest requests received so far
    pub async fn manifest_requests(&self) -> usize {
        self.requests_ending_with("/docbridge-plugins.json").await
    }

    /// Request paths received so far, in order
    pub async fn requested_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }

    async fn requests_ending_with(&self, suffix: &str) -> usize {
        self.requested_paths()
            .await
            .iter()
            .filter(|path| path.ends_with(suffix))
            .count()
    }
}

/// A source manager over a memory store, caching into a temp directory
pub struct ManagerFixture {
    pub store: Arc<MemoryStore>,
    pub manager: SourceManager,
    pub temp: TempDir,
}

impl ManagerFixture {
    pub fn new(network: NetworkConfig) -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let manager = SourceManager::new(
            store.clone(),
            ExtensionRegistry::new().into_shared(),
            DynamicLoader::new(Duration::from_secs(10)),
            temp.path().join("cache"),
            network,
        )
        .with_ledger(LifecycleLedger::new(temp.path().join("ledger.jsonl")));

        Self { store, manager, temp }
    }

    pub fn ledger(&self) -> LifecycleLedger {
        LifecycleLedger::new(self.temp.path().join("ledger.jsonl"))
    }
}
