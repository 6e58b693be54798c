//! In-memory registry of active mirrors with longest-prefix lookup (`spec.md` §4.1).

use crate::mirror::Mirror;
use ahash::AHashMap;
use std::sync::{Arc, RwLock};

const TARGET: &str = "regmirror::mirror_index";

/// Many concurrent readers, rare writers. Mirrors are immutable once exposed:
/// `set` replaces the map entry wholesale rather than mutating fields, so a
/// reader holding an `Arc<Mirror>` never observes a torn update.
#[derive(Debug, Default)]
pub struct MirrorIndex {
    mirrors: RwLock<AHashMap<i64, Arc<Mirror>>>,
}

impl MirrorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mirror: Mirror) {
        let id = mirror.id;
        tracing::debug!(target: TARGET, id, name = %mirror.name, "registering mirror");
        self.mirrors.write().unwrap().insert(id, Arc::new(mirror));
    }

    pub fn remove(&self, id: i64) {
        self.mirrors.write().unwrap().remove(&id);
    }

    pub fn clear(&self) {
        self.mirrors.write().unwrap().clear();
    }

    pub fn get(&self, id: i64) -> Option<Arc<Mirror>> {
        self.mirrors.read().unwrap().get(&id).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<Mirror>> {
        self.mirrors.read().unwrap().values().cloned().collect()
    }

    /// Longest-prefix match of `path` against every mirror's normalized
    /// `access_url`. Returns the matched mirror and the path relative to its
    /// mount prefix, with any immediately following `/` also stripped.
    ///
    /// Tie-breaking on equal-length prefixes is undefined (the admin layer is
    /// assumed to guarantee unique prefixes — `spec.md` §4.1 and the Open
    /// Questions in §9).
    pub fn resolve(&self, path: &str) -> Option<(Arc<Mirror>, String)> {
        let path = path.trim_matches('/');
        let mirrors = self.mirrors.read().unwrap();

        let mut best: Option<&Arc<Mirror>> = None;
        for mirror in mirrors.values() {
            let prefix = mirror.normalized_access_url();
            let matches = if prefix.is_empty() {
                true
            } else {
                path == prefix || path.starts_with(&format!("{prefix}/"))
            };
            if !matches {
                continue;
            }
            match best {
                Some(current) if current.normalized_access_url().len() >= prefix.len() => {}
                _ => best = Some(mirror),
            }
        }

        best.map(|mirror| {
            let prefix = mirror.normalized_access_url();
            let rest = path.strip_prefix(prefix).unwrap_or(path);
            let rest = rest.trim_start_matches('/');
            (mirror.clone(), rest.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::EcosystemType;
    use chrono::Utc;

    fn mirror(id: i64, name: &str, access_url: &str) -> Mirror {
        Mirror {
            id,
            name: name.to_string(),
            ecosystem: EcosystemType::Npm,
            upstream_url: "https://registry.npmjs.org".into(),
            use_proxy: false,
            proxy_url: None,
            access_url: access_url.to_string(),
            service_url: "https://proxy.example.com".into(),
            blob_path: format!("/tmp/{name}").into(),
            max_size: 1024,
            cache_time_minutes: 10,
            last_used_time: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_cleanup: None,
            request_count: 0,
            hit_count: 0,
        }
    }

    #[test]
    fn resolve_strips_prefix_and_slashes() {
        let index = MirrorIndex::new();
        index.set(mirror(1, "npm", "/npm"));

        let (m, rest) = index.resolve("/npm/foo/-/foo-1.0.0.tgz").unwrap();
        assert_eq!(m.id, 1);
        assert_eq!(rest, "foo/-/foo-1.0.0.tgz");
    }

    #[test]
    fn resolve_picks_longest_prefix() {
        let index = MirrorIndex::new();
        index.set(mirror(1, "mvn", "/mvn"));
        index.set(mirror(2, "mvn-snap", "/mvn/snapshots"));

        let (m, rest) = index.resolve("mvn/snapshots/org/foo/1.0/foo-1.0.jar").unwrap();
        assert_eq!(m.id, 2);
        assert_eq!(rest, "org/foo/1.0/foo-1.0.jar");
    }

    #[test]
    fn resolve_no_match() {
        let index = MirrorIndex::new();
        index.set(mirror(1, "npm", "/npm"));
        assert!(index.resolve("/maven/foo").is_none());
    }

    #[test]
    fn remove_and_clear() {
        let index = MirrorIndex::new();
        index.set(mirror(1, "npm", "/npm"));
        index.remove(1);
        assert!(index.get_all().is_empty());

        index.set(mirror(2, "mvn", "/mvn"));
        index.clear();
        assert!(index.get_all().is_empty());
    }
}
