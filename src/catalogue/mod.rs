//! The transactional artifact index (`spec.md` §4.2).
//!
//! [`Catalogue`] is the seam the dispatcher and handlers code against;
//! [`sqlite::SqliteCatalogue`] is the only implementation shipped, but tests
//! substitute an in-memory pool rather than a mock, per the Design Note on
//! process-wide state being constructed once and passed explicitly.

pub mod sqlite;

use crate::error::CatalogueError;
use crate::mirror::Mirror;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpmFileType {
    Json,
    Tarball,
}

impl NpmFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NpmFileType::Json => "JSON",
            NpmFileType::Tarball => "TARBALL",
        }
    }
}

impl std::str::FromStr for NpmFileType {
    type Err = CatalogueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "JSON" => Ok(NpmFileType::Json),
            "TARBALL" => Ok(NpmFileType::Tarball),
            _ => Err(CatalogueError::Storage(sqlx::Error::Decode(
                format!("unknown npm file_type: {s}").into(),
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MavenFileType {
    Normal,
    Metadata,
}

impl MavenFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MavenFileType::Normal => "NORMAL",
            MavenFileType::Metadata => "METADATA",
        }
    }
}

impl std::str::FromStr for MavenFileType {
    type Err = CatalogueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(MavenFileType::Normal),
            "METADATA" => Ok(MavenFileType::Metadata),
            _ => Err(CatalogueError::Storage(sqlx::Error::Decode(
                format!("unknown maven file_type: {s}").into(),
            ))),
        }
    }
}

/// `spec.md` §3, NPM variant.
#[derive(Debug, Clone)]
pub struct NpmArtifact {
    pub id: i64,
    pub mirror_id: i64,
    pub package_id: String,
    pub version: String,
    pub file_name: String,
    pub file_type: NpmFileType,
    pub file_size: i64,
    pub save_path: PathBuf,
    pub integrity: Option<String>,
    pub shasum: Option<String>,
    pub downloaded_at: DateTime<Utc>,
    pub last_used_time: Option<DateTime<Utc>>,
}

/// `spec.md` §3, Maven variant.
#[derive(Debug, Clone)]
pub struct MavenArtifact {
    pub id: i64,
    pub mirror_id: i64,
    pub relative_path: String,
    pub file_type: MavenFileType,
    pub file_size: i64,
    pub save_path: PathBuf,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub is_snapshot: bool,
    pub downloaded_at: DateTime<Utc>,
    pub last_used_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum ArtifactRecord {
    Npm(NpmArtifact),
    Maven(MavenArtifact),
}

impl ArtifactRecord {
    pub fn id(&self) -> i64 {
        match self {
            ArtifactRecord::Npm(a) => a.id,
            ArtifactRecord::Maven(a) => a.id,
        }
    }

    pub fn mirror_id(&self) -> i64 {
        match self {
            ArtifactRecord::Npm(a) => a.mirror_id,
            ArtifactRecord::Maven(a) => a.mirror_id,
        }
    }

    pub fn file_size(&self) -> i64 {
        match self {
            ArtifactRecord::Npm(a) => a.file_size,
            ArtifactRecord::Maven(a) => a.file_size,
        }
    }

    pub fn save_path(&self) -> &std::path::Path {
        match self {
            ArtifactRecord::Npm(a) => &a.save_path,
            ArtifactRecord::Maven(a) => &a.save_path,
        }
    }

    /// Ordering key for LRU eviction: `coalesce(last_used_time, downloaded_at)`.
    pub fn recency(&self) -> DateTime<Utc> {
        match self {
            ArtifactRecord::Npm(a) => a.last_used_time.unwrap_or(a.downloaded_at),
            ArtifactRecord::Maven(a) => a.last_used_time.unwrap_or(a.downloaded_at),
        }
    }
}

/// An artifact's id, tagged by which table it names. `npm_artifacts` and
/// `maven_artifacts` each have their own independent `AUTOINCREMENT`
/// sequence, so a bare `i64` id is ambiguous between the two tables — this
/// keeps `update_artifact`/`delete_artifact` targeting exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactId {
    Npm(i64),
    Maven(i64),
}

impl ArtifactRecord {
    pub fn tagged_id(&self) -> ArtifactId {
        match self {
            ArtifactRecord::Npm(a) => ArtifactId::Npm(a.id),
            ArtifactRecord::Maven(a) => ArtifactId::Maven(a.id),
        }
    }
}

/// Lookup key for `find_artifact` (`spec.md` §3's two unique-key shapes).
pub enum Selector {
    Npm {
        mirror_id: i64,
        package_id: String,
        version: String,
        file_type: NpmFileType,
    },
    Maven {
        mirror_id: i64,
        relative_path: String,
    },
}

/// A not-yet-assigned-an-id artifact, as produced by a successful miss-fetch.
pub enum NewArtifact {
    Npm {
        mirror_id: i64,
        package_id: String,
        version: String,
        file_name: String,
        file_type: NpmFileType,
        file_size: i64,
        save_path: PathBuf,
        integrity: Option<String>,
        shasum: Option<String>,
        downloaded_at: DateTime<Utc>,
    },
    Maven {
        mirror_id: i64,
        relative_path: String,
        file_type: MavenFileType,
        file_size: i64,
        save_path: PathBuf,
        content_type: Option<String>,
        content_encoding: Option<String>,
        is_snapshot: bool,
        downloaded_at: DateTime<Utc>,
    },
}

/// Partial update for `update_artifact`; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ArtifactUpdate {
    pub last_used_time: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
}

impl ArtifactUpdate {
    pub fn touch(at: DateTime<Utc>) -> Self {
        Self {
            last_used_time: Some(at),
            ..Default::default()
        }
    }
}

/// Which slice of artifacts an eviction stage is operating over (`spec.md`
/// §4.7's staged NPM policy vs Maven's single-stage any-variant policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldestQuery {
    NpmJson,
    NpmTarball,
    MavenAny,
}

#[async_trait]
pub trait Catalogue: Send + Sync {
    async fn find_artifact(&self, selector: &Selector) -> Result<Option<ArtifactRecord>, CatalogueError>;

    /// Fails with [`CatalogueError::AlreadyExists`] on duplicate key.
    async fn insert_artifact(&self, record: NewArtifact) -> Result<ArtifactRecord, CatalogueError>;

    async fn update_artifact(&self, id: ArtifactId, update: ArtifactUpdate) -> Result<(), CatalogueError>;

    /// Idempotent: deleting a nonexistent id is not an error (`spec.md` §4.7).
    async fn delete_artifact(&self, id: ArtifactId) -> Result<(), CatalogueError>;

    async fn oldest_artifact(
        &self,
        mirror_id: i64,
        query: OldestQuery,
    ) -> Result<Option<ArtifactRecord>, CatalogueError>;

    /// NPM JSON artifacts with `downloaded_at < before` (`spec.md` §4.7 stage 1).
    async fn expired_json_artifacts(
        &self,
        mirror_id: i64,
        before: DateTime<Utc>,
    ) -> Result<Vec<ArtifactRecord>, CatalogueError>;

    async fn sum_size(&self, mirror_id: i64) -> Result<i64, CatalogueError>;

    async fn bump_counters(&self, mirror_id: i64, hit: bool) -> Result<(), CatalogueError>;

    async fn touch_mirror_last_used(
        &self,
        mirror_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogueError>;

    /// Insert-if-absent-by-`name`, mirroring `initMirrorCache` loading persisted
    /// mirrors at boot. Returns the row's id.
    async fn upsert_mirror(&self, mirror: &Mirror) -> Result<i64, CatalogueError>;

    async fn list_mirrors(&self) -> Result<Vec<Mirror>, CatalogueError>;
}
