//! The [`Mirror`] configuration record and its ecosystem tag (`spec.md` §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The closed set of ecosystems a Mirror can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcosystemType {
    #[serde(rename = "NPM")]
    Npm,
    Maven,
    PyPI,
    R,
    RubyGems,
    Cargo,
    Conda,
    Go,
    Docker,
}

impl EcosystemType {
    /// Whether this ecosystem has caching policy (`spec.md` §4.5) versus pure
    /// passthrough.
    pub fn is_cached(&self) -> bool {
        matches!(self, EcosystemType::Npm | EcosystemType::Maven)
    }
}

impl std::fmt::Display for EcosystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EcosystemType::Npm => "NPM",
            EcosystemType::Maven => "Maven",
            EcosystemType::PyPI => "PyPI",
            EcosystemType::R => "R",
            EcosystemType::RubyGems => "RubyGems",
            EcosystemType::Cargo => "Cargo",
            EcosystemType::Conda => "Conda",
            EcosystemType::Go => "Go",
            EcosystemType::Docker => "Docker",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for EcosystemType {
    type Err = crate::error::RegMirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NPM" => EcosystemType::Npm,
            "Maven" => EcosystemType::Maven,
            "PyPI" => EcosystemType::PyPI,
            "R" => EcosystemType::R,
            "RubyGems" => EcosystemType::RubyGems,
            "Cargo" => EcosystemType::Cargo,
            "Conda" => EcosystemType::Conda,
            "Go" => EcosystemType::Go,
            "Docker" => EcosystemType::Docker,
            other => {
                return Err(crate::error::RegMirrorError::UnknownEcosystem(other.to_string()));
            }
        })
    }
}

/// A configured upstream plus local cache policy (`spec.md` §3).
///
/// Immutable once exposed through the [`crate::mirror_index::MirrorIndex`] —
/// updates replace the map entry rather than mutating fields in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub id: i64,
    pub name: String,
    pub ecosystem: EcosystemType,

    pub upstream_url: String,
    pub use_proxy: bool,
    pub proxy_url: Option<String>,

    pub access_url: String,
    pub service_url: String,

    pub blob_path: PathBuf,

    pub max_size: u64,
    pub cache_time_minutes: i64,

    pub last_used_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_cleanup: Option<DateTime<Utc>>,

    pub request_count: i64,
    pub hit_count: i64,
}

impl Mirror {
    /// `access_url` with leading/trailing slashes stripped (`spec.md` §4.1).
    pub fn normalized_access_url(&self) -> &str {
        self.access_url.trim_matches('/')
    }

    /// Upstream URL with trailing slashes stripped, ready for `join("/relative")`.
    pub fn upstream_base(&self) -> &str {
        self.upstream_url.trim_end_matches('/')
    }

    pub fn cache_time(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache_time_minutes)
    }
}
