//! Maven handler: SNAPSHOT/metadata bypass, else cache `NORMAL` files
//! (`spec.md` §4.5.2).

use super::{Handler, HandlerContext};
use crate::blob_store::BlobStore;
use crate::catalogue::{ArtifactId, ArtifactUpdate, MavenFileType, NewArtifact, OldestQuery, Selector};
use crate::catalogue::ArtifactRecord;
use crate::error::HandlerError;
use crate::mirror::{EcosystemType, Mirror};
use crate::request::RequestContext;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};

const TARGET: &str = "regmirror::handler::maven";

#[derive(Default)]
pub struct MavenHandler;

fn is_proxy_only(relative_path: &str) -> bool {
    relative_path.contains("SNAPSHOT") || relative_path.ends_with("maven-metadata.xml")
}

#[async_trait]
impl Handler for MavenHandler {
    fn supported_type(&self) -> EcosystemType {
        EcosystemType::Maven
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        request: &mut dyn RequestContext,
        mirror: &Mirror,
        relative_path: &str,
    ) -> Result<(), HandlerError> {
        if is_proxy_only(relative_path) {
            tracing::debug!(target: TARGET, relative_path, "snapshot/metadata bypass");
            if let Err(e) = ctx.catalogue.bump_counters(mirror.id, false).await {
                tracing::warn!(target: TARGET, error = %e, "counter bump failed");
            }
            let response = ctx.fetcher.fetch(mirror, relative_path, request.headers()).await?;
            request.respond(response.status, response.headers, response.body.to_vec());
            return Ok(());
        }

        let selector = Selector::Maven {
            mirror_id: mirror.id,
            relative_path: relative_path.to_string(),
        };

        match ctx.catalogue.find_artifact(&selector).await? {
            Some(ArtifactRecord::Maven(artifact)) => {
                if let Err(e) = ctx.catalogue.bump_counters(mirror.id, true).await {
                    tracing::warn!(target: TARGET, error = %e, "counter bump failed");
                }
                if let Err(e) = ctx
                    .catalogue
                    .update_artifact(ArtifactId::Maven(artifact.id), ArtifactUpdate::touch(Utc::now()))
                    .await
                {
                    tracing::warn!(target: TARGET, error = %e, "last_used_time update failed");
                }

                let bytes = ctx.blob_store.get(&artifact.save_path).await?;
                let mut headers = HeaderMap::new();
                if let Some(ct) = &artifact.content_type {
                    if let Ok(v) = ct.parse() {
                        headers.insert(CONTENT_TYPE, v);
                    }
                }
                if let Some(ce) = &artifact.content_encoding {
                    if let Ok(v) = ce.parse() {
                        headers.insert(CONTENT_ENCODING, v);
                    }
                }
                request.respond(200, headers, bytes);
                Ok(())
            }
            _ => {
                if let Err(e) = ctx.catalogue.bump_counters(mirror.id, false).await {
                    tracing::warn!(target: TARGET, error = %e, "counter bump failed");
                }

                let response = ctx.fetcher.fetch(mirror, relative_path, request.headers()).await?;

                if response.is_success() {
                    let save_path = mirror.blob_path.join(relative_path);
                    BlobStore::guard_within(&mirror.blob_path, &save_path)?;
                    ctx.blob_store.put(&save_path, &response.body).await?;

                    let content_type = response.header_str(CONTENT_TYPE.as_str()).map(str::to_string);
                    let content_encoding = response.header_str(CONTENT_ENCODING.as_str()).map(str::to_string);

                    let new = NewArtifact::Maven {
                        mirror_id: mirror.id,
                        relative_path: relative_path.to_string(),
                        file_type: MavenFileType::Normal,
                        file_size: response.body.len() as i64,
                        save_path,
                        content_type,
                        content_encoding,
                        is_snapshot: false,
                        downloaded_at: Utc::now(),
                    };
                    if let Err(e) = ctx.catalogue.insert_artifact(new).await {
                        tracing::warn!(target: TARGET, error = %e, "catalogue insert failed after cache write");
                    }
                }

                request.respond(response.status, response.headers, response.body.to_vec());
                Ok(())
            }
        }
    }

    async fn cleanup_cache(&self, ctx: &HandlerContext, mirror: &Mirror) -> Result<(), HandlerError> {
        loop {
            let used = ctx.catalogue.sum_size(mirror.id).await?;
            if mirror.max_size == 0 || (used as f64) / (mirror.max_size as f64) < 0.95 {
                return Ok(());
            }
            if (used as f64) / (mirror.max_size as f64) <= 0.80 {
                return Ok(());
            }

            match ctx.catalogue.oldest_artifact(mirror.id, OldestQuery::MavenAny).await? {
                Some(record) => {
                    if let Err(e) = ctx.blob_store.remove(record.save_path()).await {
                        tracing::warn!(target: TARGET, error = %e, "blob delete failed during eviction");
                    }
                    if let Err(e) = ctx.catalogue.delete_artifact(record.tagged_id()).await {
                        tracing::warn!(target: TARGET, error = %e, "record delete failed during eviction");
                        return Ok(());
                    }
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_snapshot_and_metadata_as_proxy_only() {
        assert!(is_proxy_only("org/foo/bar/1.0-SNAPSHOT/bar-1.0-20240101.123456-1.jar"));
        assert!(is_proxy_only("org/foo/bar/maven-metadata.xml"));
        assert!(!is_proxy_only("org/foo/bar/1.0/bar-1.0.jar"));
    }
}
