//! Outbound HTTP to upstream registries (`spec.md` §4.4).

use crate::error::FetchError;
use crate::mirror::Mirror;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Client;

const TARGET: &str = "regmirror::fetcher";
const DEFAULT_USER_AGENT: &str = concat!("regmirror/", env!("CARGO_PKG_VERSION"));

/// A fetched upstream response, headers and body fully buffered for the
/// handlers that need to inspect or checksum them. The fetcher itself does
/// not parse bodies (`spec.md` §4.4).
pub struct FetchedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    async fn fetch(
        &self,
        mirror: &Mirror,
        relative_path: &str,
        inbound_headers: &HeaderMap,
    ) -> Result<FetchedResponse, FetchError>;
}

/// `reqwest`-backed fetcher. One shared default client; mirrors with
/// `use_proxy` get a one-off client built with their configured proxy,
/// mirroring `proxy.go`'s `ProxyRequest` building a fresh `http.Client` only
/// when a proxy is configured.
pub struct ReqwestFetcher {
    default_client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let default_client = Client::builder()
            .build()
            .map_err(FetchError::UpstreamUnavailable)?;
        Ok(Self { default_client })
    }

    fn proxied_client(proxy_url: &str) -> Result<Client, FetchError> {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|_| FetchError::InvalidProxyUrl(proxy_url.to_string()))?;
        Client::builder()
            .proxy(proxy)
            .build()
            .map_err(FetchError::UpstreamUnavailable)
    }
}

#[async_trait]
impl UpstreamFetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        mirror: &Mirror,
        relative_path: &str,
        inbound_headers: &HeaderMap,
    ) -> Result<FetchedResponse, FetchError> {
        let url = format!("{}/{}", mirror.upstream_base(), relative_path.trim_start_matches('/'));
        let url = reqwest::Url::parse(&url).map_err(|_| FetchError::InvalidUrl(url.clone()))?;

        let client = if mirror.use_proxy {
            let proxy_url = mirror
                .proxy_url
                .as_deref()
                .ok_or_else(|| FetchError::InvalidProxyUrl("use_proxy set without proxy_url".into()))?;
            Self::proxied_client(proxy_url)?
        } else {
            self.default_client.clone()
        };

        let mut headers = inbound_headers.clone();
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }

        tracing::debug!(target: TARGET, %url, mirror = mirror.name, "fetching upstream");
        let response = client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(FetchError::UpstreamUnavailable)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(FetchError::UpstreamUnavailable)?;

        Ok(FetchedResponse { status, headers, body })
    }
}

/// Builds a `HeaderMap` from `(name, value)` pairs, skipping anything that
/// doesn't round-trip through `reqwest`'s header types — used when the
/// inbound request context hands over raw string headers.
pub fn headers_from_pairs<I, K, V>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut headers = HeaderMap::new();
    for (k, v) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(k.as_ref().as_bytes()),
            HeaderValue::from_str(v.as_ref()),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::EcosystemType;
    use chrono::Utc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mirror(upstream_url: String) -> Mirror {
        let now = Utc::now();
        Mirror {
            id: 1,
            name: "npm".into(),
            ecosystem: EcosystemType::Npm,
            upstream_url,
            use_proxy: false,
            proxy_url: None,
            access_url: "/npm".into(),
            service_url: "https://proxy.example.com".into(),
            blob_path: "/tmp/npm".into(),
            max_size: 1024,
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
    async fn fetch_adds_default_user_agent_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(|req: &wiremock::Request| {
                let ua = req.headers.get("user-agent").unwrap().to_str().unwrap();
                assert!(ua.starts_with("regmirror/"));
                ResponseTemplate::new(200).set_body_bytes("{}")
            })
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new().unwrap();
        let m = mirror(server.uri());
        let resp = fetcher.fetch(&m, "left-pad", &HeaderMap::new()).await.unwrap();
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn fetch_passes_through_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new().unwrap();
        let m = mirror(server.uri());
        let resp = fetcher.fetch(&m, "missing", &HeaderMap::new()).await.unwrap();
        assert_eq!(resp.status, 404);
        assert!(!resp.is_success());
    }
}
