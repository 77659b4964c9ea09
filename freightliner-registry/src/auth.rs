use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use log::{info, trace, warn};
use moka::future::Cache;
use moka::Expiry;
use reqwest::header::HeaderValue;
use reqwest::{header, Response};

use crate::error::{Error, Result};

#[derive(Debug)]
pub enum Auth {
    None,
    UserPass(String, String),
}

pub type AuthMap = BTreeMap<String, Auth>;
type RatelimitMap = BTreeMap<String, DateTime<Utc>>;

#[derive(PartialEq, Eq, Hash, Debug, Clone)]
struct TokenCacheKey(String);

#[derive(Clone)]
struct Token {
    pub value: String,
    expires_in: Duration,
}

#[derive(Default)]
struct ExpireToken;

impl Expiry<TokenCacheKey, Token> for ExpireToken {
    fn expire_after_create(&self, _key: &TokenCacheKey, value: &Token, _now: Instant) -> Option<Duration> {
        Some(value.expires_in)
    }
}

/// Bearer-token cache keyed by `registry/repository`, plus the registered auth store and
/// a rolling rate-limit cooldown per registry host. This is the one place the
/// replication engine keeps a moka cache: unlike the registry metadata cache (which is
/// hand-rolled with its own eviction policy), tokens are naturally TTL-only.
#[derive(Clone)]
pub struct AuthManager {
    client: reqwest::Client,
    token_cache: Cache<TokenCacheKey, Token>,
    auth_store: Arc<ArcSwap<AuthMap>>,
    ratelimit: Arc<tokio::sync::RwLock<RatelimitMap>>,
}

impl AuthManager {
    pub fn new(client: reqwest::Client) -> Self {
        let token_cache = Cache::builder()
            .max_capacity(10_000)
            .weigher(|k: &TokenCacheKey, v: &Token| (k.0.len() + v.value.len()).try_into().unwrap_or(u32::MAX))
            .expire_after(ExpireToken)
            .build();
        Self {
            client,
            token_cache,
            auth_store: Arc::new(ArcSwap::from_pointee(BTreeMap::new())),
            ratelimit: Arc::new(tokio::sync::RwLock::new(BTreeMap::new())),
        }
    }

    pub fn set_auth(&self, auth: AuthMap) {
        self.auth_store.store(auth.into());
    }

    pub async fn check_ratelimit(&self, registry: &str) -> Result<()> {
        if let Some(reset_at) = self.ratelimit.read().await.get(registry).copied() {
            if Utc::now() < reset_at {
                warn!("{registry}: still inside rate-limit cooldown");
                return Err(Error::RateLimited { registry: registry.to_string(), reset_at });
            }
            self.ratelimit.write().await.remove(registry);
        }
        Ok(())
    }

    pub async fn handle_ratelimit(&self, registry: &str, res: &Response) {
        if res.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return;
        }
        let reset_at = get_ratelimit_reset(res.headers()).unwrap_or_else(|| Utc::now() + Duration::from_secs(60));
        info!("{registry}: hit rate limit, resets at {reset_at}");
        self.ratelimit.write().await.insert(registry.to_string(), reset_at);
    }

    /// Fetches (and caches) a bearer token for `registry/repo`, performing the
    /// client-credentials or user/pass exchange the realm's challenge demands.
    pub async fn token_for(&self, registry: &str, repo: &str, www_auth: &BearerChallenge<'_>) -> Result<Option<String>> {
        let key = TokenCacheKey(format!("{registry}/{repo}"));
        match self.auth_store.load().get(registry) {
            Some(Auth::None) | None => Ok(None),
            Some(Auth::UserPass(user, pass)) => {
                let www_auth = www_auth.clone();
                let client = self.client.clone();
                let user = user.clone();
                let pass = pass.clone();
                let entry = self
                    .token_cache
                    .entry(key)
                    .or_try_insert_with(async move { fetch_token(&client, &www_auth, &user, &pass).await })
                    .await
                    .map_err(|e: Arc<Error>| Error::Internal(format!("token fetch failed: {e}")))?;
                Ok(Some(entry.into_value().value))
            }
        }
    }
}

async fn fetch_token(client: &reqwest::Client, www_auth: &BearerChallenge<'_>, user: &str, pass: &str) -> Result<Token> {
    let mut req = client.get(www_auth.realm).query(&[("service", www_auth.service)]);
    if let Some(scope) = www_auth.scope {
        req = req.query(&[("scope", scope)]);
    }
    let res = req.basic_auth(user, Some(pass)).send().await?;
    if !res.status().is_success() {
        return Err(Error::Internal(format!("token endpoint returned {}", res.status())));
    }
    #[derive(serde::Deserialize)]
    struct TokenResponse {
        #[serde(alias = "access_token")]
        token: String,
        #[serde(default = "default_expires_in")]
        expires_in: u64,
    }
    fn default_expires_in() -> u64 {
        60
    }
    let parsed: TokenResponse = res.json().await?;
    trace!("fetched bearer token, expires in {}s", parsed.expires_in);
    Ok(Token {
        value: parsed.token,
        expires_in: Duration::from_secs(parsed.expires_in),
    })
}

#[derive(Debug, Clone)]
pub struct BearerChallenge<'a> {
    pub realm: &'a str,
    pub service: &'a str,
    pub scope: Option<&'a str>,
}

/// Parses a `WWW-Authenticate: Bearer realm="...",service="...",scope="..."` header.
pub fn parse_bearer_challenge(input: &HeaderValue) -> Option<BearerChallenge<'_>> {
    parse_bearer_challenge_str(input.to_str().ok()?)
}

fn parse_bearer_challenge_str(input: &str) -> Option<BearerChallenge<'_>> {
    use nom::bytes::complete::{tag, take_until1};
    use nom::character::complete::{alpha1, char};
    use nom::multi::{many0, many1, separated_list0};
    use nom::sequence::{delimited, preceded, separated_pair, terminated};
    use nom::{IResult, Parser};

    fn parser(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
        preceded(
            terminated(tag("Bearer"), many1(tag(" "))),
            separated_list0(
                terminated(tag(","), many0(tag(" "))),
                separated_pair(alpha1, tag("="), delimited(char('"'), take_until1("\""), char('"'))),
            ),
        )
        .parse(input)
    }

    let (_, pairs) = parser(input).ok()?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for (k, v) in pairs {
        match k {
            "realm" => realm = Some(v),
            "service" => service = Some(v),
            "scope" => scope = Some(v),
            _ => {}
        }
    }
    Some(BearerChallenge { realm: realm?, service: service?, scope })
}

fn get_ratelimit_reset(headers: &header::HeaderMap) -> Option<DateTime<Utc>> {
    let value = headers.get("ratelimit-reset").or_else(|| headers.get("x-ratelimit-reset"))?;
    let secs: i64 = value.to_str().ok()?.parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge() {
        let header = HeaderValue::from_static(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#,
        );
        let challenge = parse_bearer_challenge(&header).unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service, "registry.docker.io");
        assert_eq!(challenge.scope, Some("repository:library/alpine:pull"));
    }

    #[test]
    fn rejects_non_bearer_challenge() {
        let header = HeaderValue::from_static(r#"Basic realm="x""#);
        assert!(parse_bearer_challenge(&header).is_none());
    }
}
