use async_trait::async_trait;
use bytes::Bytes;
use log::{trace, warn};
use reqwest::{header, Method, StatusCode};
use sha2::{Digest as _, Sha256};
use tokio_util::sync::CancellationToken;

use crate::auth::{parse_bearer_challenge, AuthManager};
use crate::error::{Error, Result};
use crate::reference::Reference;
use crate::types::{Descriptor, ManifestDescriptor};

const ACCEPT_MANIFEST: &str =
    "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json, application/vnd.docker.distribution.manifest.v1+json";
const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// The capability set the copy engine consumes. Implementations are injected at
/// construction so the engine never depends on protocol-specific HTTP semantics beyond
/// these five operations.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn get_descriptor(&self, ctx: &CancellationToken, reference: &Reference) -> Result<Option<ManifestDescriptor>>;
    async fn head_blob(&self, ctx: &CancellationToken, repo: &str, digest: &str) -> Result<Option<Descriptor>>;
    async fn pull_blob(&self, ctx: &CancellationToken, repo: &str, digest: &str) -> Result<Bytes>;
    async fn push_blob(&self, ctx: &CancellationToken, repo: &str, digest: &str, data: Bytes) -> Result<String>;
    async fn push_manifest(&self, ctx: &CancellationToken, repo: &str, reference: &str, data: Bytes, media_type: &str) -> Result<String>;
}

/// An OCI distribution-compatible client over `reqwest`. Bearer token exchange, rate
/// limit cooldowns, and registry host resolution are delegated to an `AuthManager`
/// shared with whatever else in the process talks to the same registries.
#[derive(Clone)]
pub struct HttpRegistryClient {
    client: reqwest::Client,
    auth: AuthManager,
}

impl HttpRegistryClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(4))
            .build()
            .map_err(Error::from)?;
        let auth = AuthManager::new(client.clone());
        Ok(Self { client, auth })
    }

    pub fn with_auth_manager(client: reqwest::Client, auth: AuthManager) -> Self {
        Self { client, auth }
    }

    pub fn auth_manager(&self) -> &AuthManager {
        &self.auth
    }

    /// Sends `req`, retrying once with a freshly-fetched bearer token on 401. Checks
    /// and records registry rate-limit cooldowns around the send, the request's one
    /// suspension point, raced against `ctx`.
    async fn send(&self, ctx: &CancellationToken, registry: &str, repo: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.auth.check_ratelimit(registry).await?;

        let retry = req.try_clone();
        let res = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            res = req.send() => res?,
        };
        self.auth.handle_ratelimit(registry, &res).await;

        if res.status() != StatusCode::UNAUTHORIZED {
            return Ok(res);
        }
        let Some(retry) = retry else {
            return Ok(res);
        };
        let Some(challenge) = res.headers().get(header::WWW_AUTHENTICATE).and_then(parse_bearer_challenge) else {
            return Ok(res);
        };
        let Some(token) = self.auth.token_for(registry, repo, &challenge).await? else {
            return Ok(res);
        };
        let res = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            res = retry.bearer_auth(token).send() => res?,
        };
        self.auth.handle_ratelimit(registry, &res).await;
        Ok(res)
    }
}

fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

async fn status_error(res: reqwest::Response) -> Error {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Error::Status { status, body }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    /// Fetches the manifest for `reference` and extracts its layer and config
    /// descriptors. A 404 is the expected "source not found" path and returns `None`
    /// rather than an error so callers can tell it apart from a network failure.
    async fn get_descriptor(&self, ctx: &CancellationToken, reference: &Reference) -> Result<Option<ManifestDescriptor>> {
        let url = format!("https://{}/v2/{}/manifests/{}", reference.registry, reference.repository, reference.manifest_path_segment());
        trace!("GET {url}");
        let req = self.client.request(Method::GET, &url).header(header::ACCEPT, ACCEPT_MANIFEST);
        let res = self.send(ctx, &reference.registry, &reference.repository, req).await?;

        match res.status() {
            StatusCode::OK => {
                let media_type = res
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let header_digest = res
                    .headers()
                    .get(DOCKER_CONTENT_DIGEST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let data = res.bytes().await?;
                let digest = header_digest.unwrap_or_else(|| digest_of(&data));
                let (config_digest, layers) = parse_layer_refs(&data);
                Ok(Some(ManifestDescriptor {
                    descriptor: Descriptor { digest, media_type, size: data.len() as u64 },
                    data,
                    config_digest,
                    layers,
                }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error(res).await),
        }
    }

    async fn head_blob(&self, ctx: &CancellationToken, repo: &str, digest: &str) -> Result<Option<Descriptor>> {
        let url = format!("https://{repo}/blobs/{digest}");
        trace!("HEAD {url}");
        let (registry, repository) = split_host(repo);
        let req = self.client.request(Method::HEAD, &url);
        let res = self.send(ctx, registry, repository, req).await?;
        match res.status() {
            StatusCode::OK => {
                let size = res.headers().get(header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok()).unwrap_or(0);
                Ok(Some(Descriptor { digest: digest.to_string(), media_type: "application/octet-stream".to_string(), size }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error(res).await),
        }
    }

    async fn pull_blob(&self, ctx: &CancellationToken, repo: &str, digest: &str) -> Result<Bytes> {
        let url = format!("https://{repo}/blobs/{digest}");
        trace!("GET {url}");
        let (registry, repository) = split_host(repo);
        let req = self.client.request(Method::GET, &url);
        let res = self.send(ctx, registry, repository, req).await?;
        match res.status() {
            StatusCode::OK => {
                let data = res.bytes().await?;
                let actual = digest_of(&data);
                if actual != digest {
                    return Err(Error::Corruption { digest: digest.to_string(), expected: digest.to_string(), actual });
                }
                Ok(data)
            }
            StatusCode::NOT_FOUND => Err(Error::NotFound(digest.to_string())),
            _ => Err(status_error(res).await),
        }
    }

    /// Two-step monolithic upload: obtain an upload URL with `POST`, then complete it
    /// with a `PUT` that carries the digest as a query parameter, per the OCI
    /// distribution spec's single-chunk push path.
    async fn push_blob(&self, ctx: &CancellationToken, repo: &str, digest: &str, data: Bytes) -> Result<String> {
        let (registry, repository) = split_host(repo);
        let start_url = format!("https://{registry}/v2/{repository}/blobs/uploads/");
        trace!("POST {start_url}");
        let req = self.client.request(Method::POST, &start_url);
        let res = self.send(ctx, registry, repository, req).await?;
        if res.status() != StatusCode::ACCEPTED {
            return Err(status_error(res).await);
        }
        let upload_url = res
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Internal("registry did not return an upload location".to_string()))?
            .to_string();

        let sep = if upload_url.contains('?') { '&' } else { '?' };
        let complete_url = format!("{upload_url}{sep}digest={digest}");
        trace!("PUT {complete_url}");
        let req = self
            .client
            .request(Method::PUT, &complete_url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let res = self.send(ctx, registry, repository, req).await?;
        match res.status() {
            StatusCode::CREATED => Ok(digest.to_string()),
            _ => Err(status_error(res).await),
        }
    }

    async fn push_manifest(&self, ctx: &CancellationToken, repo: &str, reference: &str, data: Bytes, media_type: &str) -> Result<String> {
        let (registry, repository) = split_host(repo);
        let url = format!("https://{registry}/v2/{repository}/manifests/{reference}");
        trace!("PUT {url}");
        let expected = digest_of(&data);
        let req = self.client.request(Method::PUT, &url).header(header::CONTENT_TYPE, media_type).body(data);
        let res = self.send(ctx, registry, repository, req).await?;
        match res.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let digest = res
                    .headers()
                    .get(DOCKER_CONTENT_DIGEST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .unwrap_or(expected);
                Ok(digest)
            }
            _ => Err(status_error(res).await),
        }
    }
}

/// `repo` as passed to `head_blob`/`pull_blob`/`push_blob` is `{registry}/{repository}`;
/// split it back apart for URL construction. Registry hosts never contain a `/`, so the
/// first segment is always the host.
fn split_host(repo: &str) -> (&str, &str) {
    repo.split_once('/').unwrap_or((repo, ""))
}

/// Extracts the config blob digest and ordered layer descriptors common to Docker
/// Schema 2 and OCI manifests. Schema 1 manifests carry neither in this shape and are
/// returned with an empty layer list; the copy engine treats that as a zero-layer copy.
fn parse_layer_refs(data: &[u8]) -> (Option<String>, Vec<Descriptor>) {
    #[derive(serde::Deserialize)]
    struct RawDescriptor {
        digest: String,
        #[serde(rename = "mediaType", default)]
        media_type: String,
        #[serde(default)]
        size: u64,
    }
    #[derive(serde::Deserialize, Default)]
    struct RawManifest {
        #[serde(default)]
        config: Option<RawDescriptor>,
        #[serde(default)]
        layers: Vec<RawDescriptor>,
    }
    let parsed: RawManifest = match serde_json::from_slice(data) {
        Ok(m) => m,
        Err(e) => {
            warn!("manifest body did not parse as schema2/OCI json: {e}");
            RawManifest::default()
        }
    };
    let layers = parsed
        .layers
        .into_iter()
        .map(|l| Descriptor { digest: l.digest, media_type: l.media_type, size: l.size })
        .collect();
    (parsed.config.map(|c| c.digest), layers)
}
