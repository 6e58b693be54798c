//! NPM handler: tarball checksum verification, metadata TTL + URL rewriting
//! (`spec.md` §4.5.3).

use super::{Handler, HandlerContext};
use crate::catalogue::{ArtifactId, ArtifactRecord, ArtifactUpdate, NewArtifact, NpmFileType, OldestQuery, Selector};
use crate::error::HandlerError;
use crate::mirror::{EcosystemType, Mirror};
use crate::request::RequestContext;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use sha1::Sha1;
use sha2::{Digest, Sha512};

const TARGET: &str = "regmirror::handler::npm";

#[derive(Default)]
pub struct NpmHandler;

/// Result of [`parse_tarball_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNpmInfo {
    pub package_name: String,
    pub version: String,
}

/// Mirrors `parseNpmTarballPath`: unscoped `pkg/-/pkg-1.2.3.tgz` yields
/// `package="pkg"`, `version="1.2.3"`; scoped `@scope/name/-/name-1.2.3.tgz`
/// yields `package="@scope/name"` by joining the first two segments and
/// stripping only the unscoped `name-` prefix from the filename. Build
/// metadata (`+...`) is stripped from the version in both cases.
pub fn parse_tarball_path(path: &str) -> Option<ParsedNpmInfo> {
    let path = path.trim_start_matches('/');
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 2 {
        return None;
    }

    let filename = parts.last()?.strip_suffix(".tgz").unwrap_or(parts.last()?);

    let (package_name, filename) = if let Some(scope) = parts[0].strip_prefix('@') {
        if parts.len() < 3 {
            return None;
        }
        let package_name = format!("@{scope}/{}", parts[1]);
        let prefix = format!("{}-", parts[1]);
        let filename = filename.strip_prefix(&prefix).unwrap_or(filename);
        (package_name, filename)
    } else {
        let package_name = parts[0].to_string();
        let prefix = format!("{package_name}-");
        let filename = filename.strip_prefix(&prefix).unwrap_or(filename);
        (package_name, filename)
    };

    let version = match filename.find('+') {
        Some(idx) => &filename[..idx],
        None => filename,
    };

    Some(ParsedNpmInfo {
        package_name,
        version: version.to_string(),
    })
}

/// Verifies `body` against an `integrity` (`sha512-<base64>`) or legacy
/// `shasum` (hex SHA-1) string. `Ok(())` when no checksum is available — a
/// warning is logged by the caller.
fn verify_checksum(body: &[u8], integrity: Option<&str>, shasum: Option<&str>) -> Result<(), HandlerError> {
    if let Some(integrity) = integrity {
        let (algo, expected) = integrity
            .split_once('-')
            .ok_or(HandlerError::UnsupportedHash(integrity.to_string()))?;
        match algo {
            "sha512" => {
                let actual = base64::engine::general_purpose::STANDARD.encode(Sha512::digest(body));
                if actual != expected {
                    return Err(HandlerError::ChecksumMismatch);
                }
                Ok(())
            }
            other => Err(HandlerError::UnsupportedHash(other.to_string())),
        }
    } else if let Some(shasum) = shasum {
        let mut hasher = Sha1::new();
        hasher.update(body);
        let actual = hex::encode(hasher.finalize());
        if actual.eq_ignore_ascii_case(shasum) {
            Ok(())
        } else {
            Err(HandlerError::ChecksumMismatch)
        }
    } else {
        tracing::warn!(target: TARGET, "no checksum available for tarball, accepting unverified");
        Ok(())
    }
}

/// Looks up the cached JSON metadata record for `package` and extracts
/// `versions[version].dist.{integrity, shasum}`, if present.
async fn expected_checksums(
    ctx: &HandlerContext,
    mirror: &Mirror,
    package: &str,
    version: &str,
) -> (Option<String>, Option<String>) {
    let selector = Selector::Npm {
        mirror_id: mirror.id,
        package_id: package.to_string(),
        version: String::new(),
        file_type: NpmFileType::Json,
    };
    let Ok(Some(ArtifactRecord::Npm(record))) = ctx.catalogue.find_artifact(&selector).await else {
        return (None, None);
    };
    let Ok(bytes) = ctx.blob_store.get(&record.save_path).await else {
        return (None, None);
    };
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return (None, None);
    };
    let dist = json.pointer(&format!("/versions/{version}/dist"));
    let integrity = dist
        .and_then(|d| d.get("integrity"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let shasum = dist
        .and_then(|d| d.get("shasum"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    (integrity, shasum)
}

/// Rewrites every `versions.*.dist.tarball` URL that starts with
/// `mirror.upstream_url` to point at this proxy instead (`spec.md` §4.5.3,
/// P6). Mutates `json` in place.
fn rewrite_tarball_urls(json: &mut serde_json::Value, mirror: &Mirror) {
    let Some(versions) = json.get_mut("versions").and_then(|v| v.as_object_mut()) else {
        return;
    };
    let new_prefix = format!(
        "{}/{}/",
        mirror.service_url.trim_end_matches('/'),
        mirror.normalized_access_url(),
    );
    let old_prefix = mirror.upstream_base();
    for version in versions.values_mut() {
        let Some(tarball) = version.pointer_mut("/dist/tarball") else {
            continue;
        };
        if let Some(url) = tarball.as_str() {
            if let Some(rest) = url.strip_prefix(old_prefix) {
                *tarball = serde_json::Value::String(format!("{new_prefix}{}", rest.trim_start_matches('/')));
            }
        }
    }
}

#[async_trait]
impl Handler for NpmHandler {
    fn supported_type(&self) -> EcosystemType {
        EcosystemType::Npm
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        request: &mut dyn RequestContext,
        mirror: &Mirror,
        relative_path: &str,
    ) -> Result<(), HandlerError> {
        if relative_path.ends_with(".tgz") {
            self.handle_tarball(ctx, request, mirror, relative_path).await
        } else {
            self.handle_metadata(ctx, request, mirror, relative_path).await
        }
    }

    async fn cleanup_cache(&self, ctx: &HandlerContext, mirror: &Mirror) -> Result<(), HandlerError> {
        let used = ctx.catalogue.sum_size(mirror.id).await?;
        if mirror.max_size == 0 || (used as f64) / (mirror.max_size as f64) < 0.95 {
            return Ok(());
        }

        // Stage 1: expire stale JSON metadata outright.
        let cutoff = Utc::now() - mirror.cache_time();
        let expired = ctx.catalogue.expired_json_artifacts(mirror.id, cutoff).await?;
        for record in expired {
            if let Err(e) = ctx.blob_store.remove(record.save_path()).await {
                tracing::warn!(target: TARGET, error = %e, "blob delete failed during json expiry");
            }
            if let Err(e) = ctx.catalogue.delete_artifact(record.tagged_id()).await {
                tracing::warn!(target: TARGET, error = %e, "record delete failed during json expiry");
            }
        }

        // Stage 2: LRU-evict tarballs while over target.
        loop {
            let used = ctx.catalogue.sum_size(mirror.id).await?;
            if (used as f64) / (mirror.max_size as f64) <= 0.80 {
                return Ok(());
            }
            match ctx.catalogue.oldest_artifact(mirror.id, OldestQuery::NpmTarball).await? {
                Some(record) => {
                    if let Err(e) = ctx.blob_store.remove(record.save_path()).await {
                        tracing::warn!(target: TARGET, error = %e, "blob delete failed during tarball eviction");
                    }
                    if let Err(e) = ctx.catalogue.delete_artifact(record.tagged_id()).await {
                        tracing::warn!(target: TARGET, error = %e, "record delete failed during tarball eviction");
                        return Ok(());
                    }
                }
                None => break,
            }
        }

        // Stage 3: no tarballs left, fall back to evicting JSON by LRU.
        loop {
            let used = ctx.catalogue.sum_size(mirror.id).await?;
            if (used as f64) / (mirror.max_size as f64) <= 0.80 {
                return Ok(());
            }
            match ctx.catalogue.oldest_artifact(mirror.id, OldestQuery::NpmJson).await? {
                Some(record) => {
                    if let Err(e) = ctx.blob_store.remove(record.save_path()).await {
                        tracing::warn!(target: TARGET, error = %e, "blob delete failed during json lru eviction");
                    }
                    if let Err(e) = ctx.catalogue.delete_artifact(record.tagged_id()).await {
                        tracing::warn!(target: TARGET, error = %e, "record delete failed during json lru eviction");
                        return Ok(());
                    }
                }
                None => return Ok(()),
            }
        }
    }
}

impl NpmHandler {
    async fn handle_tarball(
        &self,
        ctx: &HandlerContext,
        request: &mut dyn RequestContext,
        mirror: &Mirror,
        relative_path: &str,
    ) -> Result<(), HandlerError> {
        let info = parse_tarball_path(relative_path).ok_or(HandlerError::CacheCorrupt)?;

        let selector = Selector::Npm {
            mirror_id: mirror.id,
            package_id: info.package_name.clone(),
            version: info.version.clone(),
            file_type: NpmFileType::Tarball,
        };

        if let Some(ArtifactRecord::Npm(artifact)) = ctx.catalogue.find_artifact(&selector).await? {
            if let Err(e) = ctx.catalogue.bump_counters(mirror.id, true).await {
                tracing::warn!(target: TARGET, error = %e, "counter bump failed");
            }
            if let Err(e) = ctx
                .catalogue
                .update_artifact(ArtifactId::Npm(artifact.id), ArtifactUpdate::touch(Utc::now()))
                .await
            {
                tracing::warn!(target: TARGET, error = %e, "last_used_time update failed");
            }

            let bytes = ctx.blob_store.get(&artifact.save_path).await?;
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, "application/octet-stream".parse().unwrap());
            request.respond(200, headers, bytes);
            return Ok(());
        }

        if let Err(e) = ctx.catalogue.bump_counters(mirror.id, false).await {
            tracing::warn!(target: TARGET, error = %e, "counter bump failed");
        }

        let response = ctx.fetcher.fetch(mirror, relative_path, request.headers()).await?;
        if !response.is_success() {
            request.respond(response.status, response.headers, response.body.to_vec());
            return Ok(());
        }

        let (integrity, shasum) = expected_checksums(ctx, mirror, &info.package_name, &info.version).await;
        let save_path = mirror.blob_path.join(relative_path);
        crate::blob_store::BlobStore::guard_within(&mirror.blob_path, &save_path)?;

        if let Err(e) = verify_checksum(&response.body, integrity.as_deref(), shasum.as_deref()) {
            let _ = ctx.blob_store.remove(&save_path).await;
            return Err(e);
        }

        ctx.blob_store.put(&save_path, &response.body).await?;

        let new = NewArtifact::Npm {
            mirror_id: mirror.id,
            package_id: info.package_name,
            version: info.version,
            file_name: relative_path.rsplit('/').next().unwrap_or(relative_path).to_string(),
            file_type: NpmFileType::Tarball,
            file_size: response.body.len() as i64,
            save_path,
            integrity,
            shasum,
            downloaded_at: Utc::now(),
        };
        if let Err(e) = ctx.catalogue.insert_artifact(new).await {
            tracing::warn!(target: TARGET, error = %e, "catalogue insert failed after cache write");
        }

        request.respond(response.status, response.headers, response.body.to_vec());
        Ok(())
    }

    async fn handle_metadata(
        &self,
        ctx: &HandlerContext,
        request: &mut dyn RequestContext,
        mirror: &Mirror,
        relative_path: &str,
    ) -> Result<(), HandlerError> {
        let selector = Selector::Npm {
            mirror_id: mirror.id,
            package_id: relative_path.to_string(),
            version: String::new(),
            file_type: NpmFileType::Json,
        };

        if let Some(ArtifactRecord::Npm(artifact)) = ctx.catalogue.find_artifact(&selector).await? {
            let fresh = Utc::now() < artifact.downloaded_at + mirror.cache_time();
            if fresh {
                let bytes = ctx.blob_store.get(&artifact.save_path).await?;
                serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|_| HandlerError::CacheCorrupt)?;

                if let Err(e) = ctx.catalogue.bump_counters(mirror.id, true).await {
                    tracing::warn!(target: TARGET, error = %e, "counter bump failed");
                }
                if let Err(e) = ctx
                    .catalogue
                    .update_artifact(ArtifactId::Npm(artifact.id), ArtifactUpdate::touch(Utc::now()))
                    .await
                {
                    tracing::warn!(target: TARGET, error = %e, "last_used_time update failed");
                }

                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
                request.respond(200, headers, bytes);
                return Ok(());
            }
        }

        if let Err(e) = ctx.catalogue.bump_counters(mirror.id, false).await {
            tracing::warn!(target: TARGET, error = %e, "counter bump failed");
        }

        let response = ctx.fetcher.fetch(mirror, relative_path, request.headers()).await?;

        let is_json = response
            .header_str(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.contains("application/json"));

        if !response.is_success() || !is_json {
            request.respond(response.status, response.headers, response.body.to_vec());
            return Ok(());
        }

        let mut json: serde_json::Value =
            serde_json::from_slice(&response.body).map_err(|_| HandlerError::CacheCorrupt)?;
        rewrite_tarball_urls(&mut json, mirror);

        let compact = serde_json::to_vec(&json).map_err(|_| HandlerError::CacheCorrupt)?;
        let pretty = serde_json::to_vec_pretty(&json).map_err(|_| HandlerError::CacheCorrupt)?;

        let save_path = mirror.blob_path.join(format!("{relative_path}.json"));
        crate::blob_store::BlobStore::guard_within(&mirror.blob_path, &save_path)?;
        ctx.blob_store.put(&save_path, &pretty).await?;

        let selector = Selector::Npm {
            mirror_id: mirror.id,
            package_id: relative_path.to_string(),
            version: String::new(),
            file_type: NpmFileType::Json,
        };
        match ctx.catalogue.find_artifact(&selector).await? {
            Some(ArtifactRecord::Npm(existing)) => {
                let update = ArtifactUpdate {
                    downloaded_at: Some(Utc::now()),
                    file_size: Some(pretty.len() as i64),
                    ..Default::default()
                };
                if let Err(e) = ctx.catalogue.update_artifact(ArtifactId::Npm(existing.id), update).await {
                    tracing::warn!(target: TARGET, error = %e, "metadata update failed");
                }
            }
            _ => {
                let new = NewArtifact::Npm {
                    mirror_id: mirror.id,
                    package_id: relative_path.to_string(),
                    version: String::new(),
                    file_name: relative_path.to_string(),
                    file_type: NpmFileType::Json,
                    file_size: pretty.len() as i64,
                    save_path,
                    integrity: None,
                    shasum: None,
                    downloaded_at: Utc::now(),
                };
                if let Err(e) = ctx.catalogue.insert_artifact(new).await {
                    tracing::warn!(target: TARGET, error = %e, "catalogue insert failed after cache write");
                }
            }
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        request.respond(response.status, headers, compact);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unscoped_tarball_path() {
        let info = parse_tarball_path("left-pad/-/left-pad-1.3.0.tgz").unwrap();
        assert_eq!(info.package_name, "left-pad");
        assert_eq!(info.version, "1.3.0");
    }

    #[test]
    fn parses_scoped_tarball_path() {
        let info = parse_tarball_path("@gulp-sourcemaps/map-sources/-/map-sources-2.0.1.tgz").unwrap();
        assert_eq!(info.package_name, "@gulp-sourcemaps/map-sources");
        assert_eq!(info.version, "2.0.1");
    }

    #[test]
    fn strips_build_metadata_from_version() {
        let info = parse_tarball_path("foo/-/foo-1.0.0+build5.tgz").unwrap();
        assert_eq!(info.version, "1.0.0");
    }

    #[test]
    fn verify_checksum_detects_sha512_mismatch() {
        let digest = base64::engine::general_purpose::STANDARD.encode(Sha512::digest(b"real body"));
        let err = verify_checksum(b"tampered body", Some(&format!("sha512-{digest}")), None).unwrap_err();
        assert!(matches!(err, HandlerError::ChecksumMismatch));
    }

    #[test]
    fn verify_checksum_accepts_matching_shasum() {
        let mut hasher = Sha1::new();
        hasher.update(b"hello");
        let digest = hex::encode(hasher.finalize());
        verify_checksum(b"hello", None, Some(&digest)).unwrap();
    }

    #[test]
    fn rewrite_tarball_urls_replaces_upstream_prefix() {
        let mirror = crate::mirror::Mirror {
            id: 1,
            name: "npm".into(),
            ecosystem: EcosystemType::Npm,
            upstream_url: "https://registry.npmjs.org".into(),
            use_proxy: false,
            proxy_url: None,
            access_url: "/npm".into(),
            service_url: "https://proxy.example.com".into(),
            blob_path: "/tmp/npm".into(),
            max_size: 1024,
            cache_time_minutes: 10,
            last_used_time: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_cleanup: None,
            request_count: 0,
            hit_count: 0,
        };
        let mut json = serde_json::json!({
            "versions": {
                "1.0.0": { "dist": { "tarball": "https://registry.npmjs.org/foo/-/foo-1.0.0.tgz" } }
            }
        });
        rewrite_tarball_urls(&mut json, &mirror);
        assert_eq!(
            json["versions"]["1.0.0"]["dist"]["tarball"],
            "https://proxy.example.com/npm/foo/-/foo-1.0.0.tgz"
        );
    }
}
