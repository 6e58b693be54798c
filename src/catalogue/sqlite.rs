//! SQLite-backed [`Catalogue`].
//!
//! Uses the runtime `sqlx::query` API rather than the `query!`/`query_as!`
//! compile-time macros: those require a live `DATABASE_URL` (or a checked-in
//! `.sqlx` offline cache) at compile time, which this workspace has no way to
//! produce or validate. Every statement here is built and bound by hand.

use super::{
    ArtifactId, ArtifactRecord, ArtifactUpdate, Catalogue, MavenArtifact, MavenFileType, NewArtifact,
    NpmArtifact, NpmFileType, OldestQuery, Selector,
};
use crate::error::CatalogueError;
use crate::mirror::{EcosystemType, Mirror};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;

const TARGET: &str = "regmirror::catalogue::sqlite";

pub struct SqliteCatalogue {
    pool: SqlitePool,
}

impl SqliteCatalogue {
    pub async fn connect(url: &str) -> Result<Self, CatalogueError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let catalogue = Self { pool };
        catalogue.run_migrations().await?;
        Ok(catalogue)
    }

    /// Used directly by tests to share a single in-memory connection.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), CatalogueError> {
        tracing::debug!(target: TARGET, "running schema migrations");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mirrors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                ecosystem TEXT NOT NULL,
                upstream_url TEXT NOT NULL,
                use_proxy INTEGER NOT NULL,
                proxy_url TEXT,
                access_url TEXT NOT NULL,
                service_url TEXT NOT NULL,
                blob_path TEXT NOT NULL,
                max_size INTEGER NOT NULL,
                cache_time_minutes INTEGER NOT NULL,
                last_used_time TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_cleanup TEXT,
                request_count INTEGER NOT NULL DEFAULT 0,
                hit_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS npm_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mirror_id INTEGER NOT NULL,
                package_id TEXT NOT NULL,
                version TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                save_path TEXT NOT NULL,
                integrity TEXT,
                shasum TEXT,
                downloaded_at TEXT NOT NULL,
                last_used_time TEXT,
                UNIQUE(mirror_id, package_id, version, file_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS maven_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mirror_id INTEGER NOT NULL,
                relative_path TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                save_path TEXT NOT NULL,
                content_type TEXT,
                content_encoding TEXT,
                is_snapshot INTEGER NOT NULL,
                downloaded_at TEXT NOT NULL,
                last_used_time TEXT,
                UNIQUE(mirror_id, relative_path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn npm_from_row(row: &SqliteRow) -> Result<NpmArtifact, CatalogueError> {
    let file_type: String = row.try_get("file_type")?;
    Ok(NpmArtifact {
        id: row.try_get("id")?,
        mirror_id: row.try_get("mirror_id")?,
        package_id: row.try_get("package_id")?,
        version: row.try_get("version")?,
        file_name: row.try_get("file_name")?,
        file_type: NpmFileType::from_str(&file_type)?,
        file_size: row.try_get("file_size")?,
        save_path: PathBuf::from(row.try_get::<String, _>("save_path")?),
        integrity: row.try_get("integrity")?,
        shasum: row.try_get("shasum")?,
        downloaded_at: row.try_get("downloaded_at")?,
        last_used_time: row.try_get("last_used_time")?,
    })
}

fn maven_from_row(row: &SqliteRow) -> Result<MavenArtifact, CatalogueError> {
    let file_type: String = row.try_get("file_type")?;
    Ok(MavenArtifact {
        id: row.try_get("id")?,
        mirror_id: row.try_get("mirror_id")?,
        relative_path: row.try_get("relative_path")?,
        file_type: MavenFileType::from_str(&file_type)?,
        file_size: row.try_get("file_size")?,
        save_path: PathBuf::from(row.try_get::<String, _>("save_path")?),
        content_type: row.try_get("content_type")?,
        content_encoding: row.try_get("content_encoding")?,
        is_snapshot: row.try_get("is_snapshot")?,
        downloaded_at: row.try_get("downloaded_at")?,
        last_used_time: row.try_get("last_used_time")?,
    })
}

fn mirror_from_row(row: &SqliteRow) -> Result<Mirror, CatalogueError> {
    let ecosystem: String = row.try_get("ecosystem")?;
    let ecosystem = EcosystemType::from_str(&ecosystem)
        .map_err(|e| CatalogueError::Storage(sqlx::Error::Decode(e.to_string().into())))?;
    Ok(Mirror {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        ecosystem,
        upstream_url: row.try_get("upstream_url")?,
        use_proxy: row.try_get("use_proxy")?,
        proxy_url: row.try_get("proxy_url")?,
        access_url: row.try_get("access_url")?,
        service_url: row.try_get("service_url")?,
        blob_path: PathBuf::from(row.try_get::<String, _>("blob_path")?),
        max_size: row.try_get::<i64, _>("max_size")? as u64,
        cache_time_minutes: row.try_get("cache_time_minutes")?,
        last_used_time: row.try_get("last_used_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_cleanup: row.try_get("last_cleanup")?,
        request_count: row.try_get("request_count")?,
        hit_count: row.try_get("hit_count")?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e.as_database_error(), Some(db) if db.is_unique_violation())
}

#[async_trait]
impl Catalogue for SqliteCatalogue {
    async fn find_artifact(&self, selector: &Selector) -> Result<Option<ArtifactRecord>, CatalogueError> {
        match selector {
            Selector::Npm {
                mirror_id,
                package_id,
                version,
                file_type,
            } => {
                let row = sqlx::query(
                    "SELECT * FROM npm_artifacts WHERE mirror_id = ? AND package_id = ? AND version = ? AND file_type = ?",
                )
                .bind(mirror_id)
                .bind(package_id)
                .bind(version)
                .bind(file_type.as_str())
                .fetch_optional(&self.pool)
                .await?;
                row.map(|r| npm_from_row(&r).map(ArtifactRecord::Npm)).transpose()
            }
            Selector::Maven {
                mirror_id,
                relative_path,
            } => {
                let row = sqlx::query(
                    "SELECT * FROM maven_artifacts WHERE mirror_id = ? AND relative_path = ?",
                )
                .bind(mirror_id)
                .bind(relative_path)
                .fetch_optional(&self.pool)
                .await?;
                row.map(|r| maven_from_row(&r).map(ArtifactRecord::Maven)).transpose()
            }
        }
    }

    async fn insert_artifact(&self, record: NewArtifact) -> Result<ArtifactRecord, CatalogueError> {
        match record {
            NewArtifact::Npm {
                mirror_id,
                package_id,
                version,
                file_name,
                file_type,
                file_size,
                save_path,
                integrity,
                shasum,
                downloaded_at,
            } => {
                let result = sqlx::query(
                    "INSERT INTO npm_artifacts
                     (mirror_id, package_id, version, file_name, file_type, file_size, save_path, integrity, shasum, downloaded_at, last_used_time)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
                )
                .bind(mirror_id)
                .bind(&package_id)
                .bind(&version)
                .bind(&file_name)
                .bind(file_type.as_str())
                .bind(file_size)
                .bind(save_path.to_string_lossy().to_string())
                .bind(&integrity)
                .bind(&shasum)
                .bind(downloaded_at)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        CatalogueError::AlreadyExists
                    } else {
                        e.into()
                    }
                })?;

                Ok(ArtifactRecord::Npm(NpmArtifact {
                    id: result.last_insert_rowid(),
                    mirror_id,
                    package_id,
                    version,
                    file_name,
                    file_type,
                    file_size,
                    save_path,
                    integrity,
                    shasum,
                    downloaded_at,
                    last_used_time: None,
                }))
            }
            NewArtifact::Maven {
                mirror_id,
                relative_path,
                file_type,
                file_size,
                save_path,
                content_type,
                content_encoding,
                is_snapshot,
                downloaded_at,
            } => {
                let result = sqlx::query(
                    "INSERT INTO maven_artifacts
                     (mirror_id, relative_path, file_type, file_size, save_path, content_type, content_encoding, is_snapshot, downloaded_at, last_used_time)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
                )
                .bind(mirror_id)
                .bind(&relative_path)
                .bind(file_type.as_str())
                .bind(file_size)
                .bind(save_path.to_string_lossy().to_string())
                .bind(&content_type)
                .bind(&content_encoding)
                .bind(is_snapshot)
                .bind(downloaded_at)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        CatalogueError::AlreadyExists
                    } else {
                        e.into()
                    }
                })?;

                Ok(ArtifactRecord::Maven(MavenArtifact {
                    id: result.last_insert_rowid(),
                    mirror_id,
                    relative_path,
                    file_type,
                    file_size,
                    save_path,
                    content_type,
                    content_encoding,
                    is_snapshot,
                    downloaded_at,
                    last_used_time: None,
                }))
            }
        }
    }

    async fn update_artifact(&self, id: ArtifactId, update: ArtifactUpdate) -> Result<(), CatalogueError> {
        let (table, row_id) = match id {
            ArtifactId::Npm(id) => ("npm_artifacts", id),
            ArtifactId::Maven(id) => ("maven_artifacts", id),
        };

        let mut sets = Vec::new();
        if update.last_used_time.is_some() {
            sets.push("last_used_time = ?");
        }
        if update.downloaded_at.is_some() {
            sets.push("downloaded_at = ?");
        }
        if update.file_size.is_some() {
            sets.push("file_size = ?");
        }
        if sets.is_empty() {
            return Ok(());
        }
        let sql = format!("UPDATE {table} SET {} WHERE id = ?", sets.join(", "));
        let mut q = sqlx::query(&sql);
        if let Some(v) = update.last_used_time {
            q = q.bind(v);
        }
        if let Some(v) = update.downloaded_at {
            q = q.bind(v);
        }
        if let Some(v) = update.file_size {
            q = q.bind(v);
        }
        let result = q.bind(row_id).execute(&self.pool).await?;
        if result.rows_affected() > 0 {
            Ok(())
        } else {
            Err(CatalogueError::NotFound)
        }
    }

    async fn delete_artifact(&self, id: ArtifactId) -> Result<(), CatalogueError> {
        let (table, row_id) = match id {
            ArtifactId::Npm(id) => ("npm_artifacts", id),
            ArtifactId::Maven(id) => ("maven_artifacts", id),
        };
        let sql = format!("DELETE FROM {table} WHERE id = ?");
        sqlx::query(&sql).bind(row_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn oldest_artifact(
        &self,
        mirror_id: i64,
        query: OldestQuery,
    ) -> Result<Option<ArtifactRecord>, CatalogueError> {
        match query {
            OldestQuery::NpmJson | OldestQuery::NpmTarball => {
                let file_type = if query == OldestQuery::NpmJson {
                    NpmFileType::Json
                } else {
                    NpmFileType::Tarball
                };
                let row = sqlx::query(
                    "SELECT * FROM npm_artifacts WHERE mirror_id = ? AND file_type = ?
                     ORDER BY coalesce(last_used_time, downloaded_at) ASC LIMIT 1",
                )
                .bind(mirror_id)
                .bind(file_type.as_str())
                .fetch_optional(&self.pool)
                .await?;
                row.map(|r| npm_from_row(&r).map(ArtifactRecord::Npm)).transpose()
            }
            OldestQuery::MavenAny => {
                let row = sqlx::query(
                    "SELECT * FROM maven_artifacts WHERE mirror_id = ?
                     ORDER BY coalesce(last_used_time, downloaded_at) ASC LIMIT 1",
                )
                .bind(mirror_id)
                .fetch_optional(&self.pool)
                .await?;
                row.map(|r| maven_from_row(&r).map(ArtifactRecord::Maven)).transpose()
            }
        }
    }

    async fn expired_json_artifacts(
        &self,
        mirror_id: i64,
        before: DateTime<Utc>,
    ) -> Result<Vec<ArtifactRecord>, CatalogueError> {
        let rows = sqlx::query(
            "SELECT * FROM npm_artifacts WHERE mirror_id = ? AND file_type = 'JSON' AND downloaded_at < ?",
        )
        .bind(mirror_id)
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| npm_from_row(r).map(ArtifactRecord::Npm))
            .collect()
    }

    async fn sum_size(&self, mirror_id: i64) -> Result<i64, CatalogueError> {
        let npm_sum: Option<i64> = sqlx::query_scalar("SELECT SUM(file_size) FROM npm_artifacts WHERE mirror_id = ?")
            .bind(mirror_id)
            .fetch_one(&self.pool)
            .await?;
        let maven_sum: Option<i64> =
            sqlx::query_scalar("SELECT SUM(file_size) FROM maven_artifacts WHERE mirror_id = ?")
                .bind(mirror_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(npm_sum.unwrap_or(0) + maven_sum.unwrap_or(0))
    }

    async fn bump_counters(&self, mirror_id: i64, hit: bool) -> Result<(), CatalogueError> {
        sqlx::query(
            "UPDATE mirrors SET request_count = request_count + 1, hit_count = hit_count + ? WHERE id = ?",
        )
        .bind(if hit { 1 } else { 0 })
        .bind(mirror_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_mirror_last_used(
        &self,
        mirror_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), CatalogueError> {
        sqlx::query("UPDATE mirrors SET last_used_time = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(mirror_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_mirror(&self, mirror: &Mirror) -> Result<i64, CatalogueError> {
        sqlx::query(
            "INSERT INTO mirrors
             (name, ecosystem, upstream_url, use_proxy, proxy_url, access_url, service_url, blob_path, max_size, cache_time_minutes, created_at, updated_at, request_count, hit_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&mirror.name)
        .bind(mirror.ecosystem.to_string())
        .bind(&mirror.upstream_url)
        .bind(mirror.use_proxy)
        .bind(&mirror.proxy_url)
        .bind(&mirror.access_url)
        .bind(&mirror.service_url)
        .bind(mirror.blob_path.to_string_lossy().to_string())
        .bind(mirror.max_size as i64)
        .bind(mirror.cache_time_minutes)
        .bind(mirror.created_at)
        .bind(mirror.updated_at)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM mirrors WHERE name = ?")
            .bind(&mirror.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn list_mirrors(&self) -> Result<Vec<Mirror>, CatalogueError> {
        let rows = sqlx::query("SELECT * FROM mirrors").fetch_all(&self.pool).await?;
        rows.iter().map(mirror_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::EcosystemType;
    use chrono::Utc;

    async fn test_catalogue() -> SqliteCatalogue {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let catalogue = SqliteCatalogue::from_pool(pool);
        catalogue.run_migrations().await.unwrap();
        catalogue
    }

    fn sample_mirror(name: &str) -> Mirror {
        let now = Utc::now();
        Mirror {
            id: 0,
            name: name.to_string(),
            ecosystem: EcosystemType::Npm,
            upstream_url: "https://registry.npmjs.org".into(),
            use_proxy: false,
            proxy_url: None,
            access_url: "/npm".into(),
            service_url: "https://proxy.example.com".into(),
            blob_path: "/var/cache/npm".into(),
            max_size: 1_000_000,
            cache_time_minutes: 10,
            last_used_time: None,
            created_at: now,
            updated_at: now,
            last_cleanup: None,
            request_count: 0,
            hit_count: 0,
        }
    }

    #[tokio::test]
    async fn upsert_mirror_is_idempotent_by_name() {
        let cat = test_catalogue().await;
        let m = sample_mirror("npm-main");
        let id1 = cat.upsert_mirror(&m).await.unwrap();
        let id2 = cat.upsert_mirror(&m).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(cat.list_mirrors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_artifact_rejects_duplicate_key() {
        let cat = test_catalogue().await;
        let mirror_id = cat.upsert_mirror(&sample_mirror("npm-main")).await.unwrap();
        let new = |size| NewArtifact::Npm {
            mirror_id,
            package_id: "left-pad".into(),
            version: "1.0.0".into(),
            file_name: "left-pad-1.0.0.tgz".into(),
            file_type: NpmFileType::Tarball,
            file_size: size,
            save_path: "/var/cache/npm/left-pad/-/left-pad-1.0.0.tgz".into(),
            integrity: None,
            shasum: None,
            downloaded_at: Utc::now(),
        };
        cat.insert_artifact(new(10)).await.unwrap();
        let err = cat.insert_artifact(new(20)).await.unwrap_err();
        assert!(matches!(err, CatalogueError::AlreadyExists));
    }

    #[tokio::test]
    async fn update_and_delete_artifact_target_the_correct_table_on_colliding_ids() {
        let cat = test_catalogue().await;
        let mirror_id = cat.upsert_mirror(&sample_mirror("npm-main")).await.unwrap();

        let npm = cat
            .insert_artifact(NewArtifact::Npm {
                mirror_id,
                package_id: "left-pad".into(),
                version: "1.0.0".into(),
                file_name: "left-pad-1.0.0.tgz".into(),
                file_type: NpmFileType::Tarball,
                file_size: 10,
                save_path: "/var/cache/npm/left-pad/-/left-pad-1.0.0.tgz".into(),
                integrity: None,
                shasum: None,
                downloaded_at: Utc::now(),
            })
            .await
            .unwrap();
        let maven = cat
            .insert_artifact(NewArtifact::Maven {
                mirror_id,
                relative_path: "com/example/lib/1.0/lib-1.0.jar".into(),
                file_type: MavenFileType::Normal,
                file_size: 20,
                save_path: "/var/cache/maven/com/example/lib/1.0/lib-1.0.jar".into(),
                content_type: None,
                content_encoding: None,
                is_snapshot: false,
                downloaded_at: Utc::now(),
            })
            .await
            .unwrap();

        // Both rows land on id 1 in their own table's AUTOINCREMENT sequence.
        assert_eq!(npm.id(), 1);
        assert_eq!(maven.id(), 1);

        cat.update_artifact(ArtifactId::Npm(npm.id()), ArtifactUpdate::touch(Utc::now()))
            .await
            .unwrap();

        let maven_selector = Selector::Maven {
            mirror_id,
            relative_path: "com/example/lib/1.0/lib-1.0.jar".into(),
        };
        let maven_before = cat.find_artifact(&maven_selector).await.unwrap();
        assert!(maven_before.is_some(), "maven row must survive the npm update");

        cat.delete_artifact(ArtifactId::Npm(npm.id())).await.unwrap();

        let npm_selector = Selector::Npm {
            mirror_id,
            package_id: "left-pad".into(),
            version: "1.0.0".into(),
            file_type: NpmFileType::Tarball,
        };
        assert!(cat.find_artifact(&npm_selector).await.unwrap().is_none());
        assert!(
            cat.find_artifact(&maven_selector).await.unwrap().is_some(),
            "deleting the npm artifact must not delete the colliding-id maven artifact"
        );
    }

    #[tokio::test]
    async fn bump_counters_increments_both_on_hit() {
        let cat = test_catalogue().await;
        let mirror_id = cat.upsert_mirror(&sample_mirror("npm-main")).await.unwrap();
        cat.bump_counters(mirror_id, true).await.unwrap();
        cat.bump_counters(mirror_id, false).await.unwrap();
        let mirrors = cat.list_mirrors().await.unwrap();
        let m = &mirrors[0];
        assert_eq!(m.request_count, 2);
        assert_eq!(m.hit_count, 1);
    }

    #[tokio::test]
    async fn oldest_artifact_orders_by_recency() {
        let cat = test_catalogue().await;
        let mirror_id = cat.upsert_mirror(&sample_mirror("npm-main")).await.unwrap();
        let old = NewArtifact::Npm {
            mirror_id,
            package_id: "old-pkg".into(),
            version: "1.0.0".into(),
            file_name: "old-pkg-1.0.0.tgz".into(),
            file_type: NpmFileType::Tarball,
            file_size: 1,
            save_path: "/x/old".into(),
            integrity: None,
            shasum: None,
            downloaded_at: Utc::now() - chrono::Duration::days(2),
        };
        let recent = NewArtifact::Npm {
            mirror_id,
            package_id: "new-pkg".into(),
            version: "1.0.0".into(),
            file_name: "new-pkg-1.0.0.tgz".into(),
            file_type: NpmFileType::Tarball,
            file_size: 1,
            save_path: "/x/new".into(),
            integrity: None,
            shasum: None,
            downloaded_at: Utc::now(),
        };
        cat.insert_artifact(old).await.unwrap();
        cat.insert_artifact(recent).await.unwrap();

        let oldest = cat
            .oldest_artifact(mirror_id, OldestQuery::NpmTarball)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(oldest.mirror_id(), mirror_id);
        assert!(matches!(oldest, ArtifactRecord::Npm(ref a) if a.package_id == "old-pkg"));
    }

    #[tokio::test]
    async fn sum_size_adds_both_variants() {
        let cat = test_catalogue().await;
        let mirror_id = cat.upsert_mirror(&sample_mirror("npm-main")).await.unwrap();
        cat.insert_artifact(NewArtifact::Npm {
            mirror_id,
            package_id: "a".into(),
            version: "1.0.0".into(),
            file_name: "a-1.0.0.tgz".into(),
            file_type: NpmFileType::Tarball,
            file_size: 100,
            save_path: "/x/a".into(),
            integrity: None,
            shasum: None,
            downloaded_at: Utc::now(),
        })
        .await
        .unwrap();
        assert_eq!(cat.sum_size(mirror_id).await.unwrap(), 100);
    }
}
