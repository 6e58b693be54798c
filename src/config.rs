//! Loads the seed `mirrors.toml` (`spec.md` §6, `SPEC_FULL.md` §D) — since
//! this crate ships without the external administrative API, mirrors are
//! declared once and loaded at startup and parsed with `toml` + `serde`
//! before any network activity starts.

use crate::mirror::{EcosystemType, Mirror};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
}

/// One `[[mirror]]` table in `mirrors.toml`. Field names match `spec.md` §3
/// verbatim, `cache_time` is in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub ecosystem: EcosystemType,
    pub upstream_url: String,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub proxy_url: Option<String>,
    pub access_url: String,
    pub service_url: String,
    pub blob_path: PathBuf,
    pub max_size: u64,
    pub cache_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MirrorsFile {
    #[serde(default, rename = "mirror")]
    pub mirrors: Vec<MirrorConfig>,
}

impl MirrorConfig {
    /// Turns a config entry into an in-memory [`Mirror`] with fresh
    /// timestamps and a placeholder id — the catalogue assigns the real id
    /// on `upsert_mirror`.
    pub fn into_mirror(self) -> Mirror {
        let now = Utc::now();
        Mirror {
            id: 0,
            name: self.name,
            ecosystem: self.ecosystem,
            upstream_url: self.upstream_url,
            use_proxy: self.use_proxy,
            proxy_url: self.proxy_url,
            access_url: self.access_url,
            service_url: self.service_url,
            blob_path: self.blob_path,
            max_size: self.max_size,
            cache_time_minutes: self.cache_time,
            last_used_time: None,
            created_at: now,
            updated_at: now,
            last_cleanup: None,
            request_count: 0,
            hit_count: 0,
        }
    }
}

pub async fn load_mirrors_file(path: &Path) -> Result<MirrorsFile, ConfigError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_mirror_table() {
        let toml = r#"
            [[mirror]]
            name = "npm-main"
            type = "NPM"
            upstream_url = "https://registry.npmjs.org"
            access_url = "/npm"
            service_url = "https://proxy.example.com"
            blob_path = "/var/cache/npm"
            max_size = 10737418240
            cache_time = 10
        "#;
        let parsed: MirrorsFile = toml::from_str(toml).unwrap();
        assert_eq!(parsed.mirrors.len(), 1);
        assert_eq!(parsed.mirrors[0].name, "npm-main");
        assert!(!parsed.mirrors[0].use_proxy);
    }

    #[test]
    fn parses_proxied_mirror() {
        let toml = r#"
            [[mirror]]
            name = "maven-central"
            type = "Maven"
            upstream_url = "https://repo1.maven.org/maven2"
            use_proxy = true
            proxy_url = "http://proxy.internal:3128"
            access_url = "/mvn"
            service_url = "https://proxy.example.com"
            blob_path = "/var/cache/mvn"
            max_size = 53687091200
            cache_time = 60
        "#;
        let parsed: MirrorsFile = toml::from_str(toml).unwrap();
        let m = &parsed.mirrors[0];
        assert!(m.use_proxy);
        assert_eq!(m.proxy_url.as_deref(), Some("http://proxy.internal:3128"));
    }
}
