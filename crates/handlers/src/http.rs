//! Outbound HTTP for handlers, backed by `reqwest`.
//!
//! Every hop (including redirects) is checked against the host policy, with
//! DNS resolution, before the request is sent. Response bodies are read up to a byte cap.

use std::{collections::BTreeMap, net::IpAddr, time::Duration};

use {
    async_trait::async_trait,
    patchbay_config::HttpConfig,
    reqwest::{Method, StatusCode, header},
    tracing::debug,
    url::{Host, Url},
};

use crate::{
    collaborators::{CollaboratorResult, HttpFetcher, HttpRequest, HttpResponse},
    error::CollaboratorError,
};

/// Which hosts handlers may reach. Blocked entries are checked first; an
/// empty allow list permits every host that is not blocked. Unless private
/// networks are allowed, hosts must resolve only to public addresses.
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    allowed: Vec<String>,
    blocked: Vec<String>,
    allow_private: bool,
}

impl HostPolicy {
    pub fn new(allowed: Vec<String>, blocked: Vec<String>) -> Self {
        let lower = |hosts: Vec<String>| hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect();
        Self {
            allowed: lower(allowed),
            blocked: lower(blocked),
            allow_private: false,
        }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(config.allowed_hosts.clone(), config.blocked_hosts.clone())
            .allow_private(config.allow_private_networks)
    }

    #[must_use]
    pub fn allow_private(mut self, allow: bool) -> Self {
        self.allow_private = allow;
        self
    }

    /// Scheme, host lists, and literal IP addresses. Does not touch DNS.
    pub fn check_host(&self, url: &Url) -> CollaboratorResult<()> {
        match url.scheme() {
            "http" | "https" => {},
            s => return Err(CollaboratorError::http(format!("unsupported URL scheme: {s}"))),
        }
        let (host, literal) = match url.host() {
            Some(Host::Domain(d)) => (d.to_ascii_lowercase(), None),
            Some(Host::Ipv4(ip)) => (ip.to_string(), Some(IpAddr::V4(ip))),
            Some(Host::Ipv6(ip)) => (ip.to_string(), Some(IpAddr::V6(ip))),
            None => return Err(CollaboratorError::http("URL has no host")),
        };

        if self.blocked.iter().any(|b| *b == host) {
            return Err(CollaboratorError::http(format!("host '{host}' is blocked")));
        }
        if !self.allowed.is_empty() && !self.allowed.iter().any(|a| *a == host) {
            return Err(CollaboratorError::http(format!(
                "host '{host}' is not in the allowed list"
            )));
        }
        if !self.allow_private
            && let Some(ip) = literal
            && is_private_ip(&ip)
        {
            return Err(CollaboratorError::http(format!(
                "host '{host}' is a private address"
            )));
        }
        Ok(())
    }

    /// [`Self::check_host`], then resolve domain hosts and refuse any that
    /// map to a private address.
    pub async fn check(&self, url: &Url) -> CollaboratorResult<()> {
        self.check_host(url)?;
        if self.allow_private {
            return Ok(());
        }
        let Some(Host::Domain(domain)) = url.host() else {
            return Ok(());
        };

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<_> = tokio::net::lookup_host((domain, port))
            .await
            .map_err(|e| CollaboratorError::http(format!("DNS resolution failed for {domain}: {e}")))?
            .collect();
        if addrs.is_empty() {
            return Err(CollaboratorError::http(format!(
                "DNS resolution failed for {domain}"
            )));
        }
        if let Some(addr) = addrs.iter().find(|a| is_private_ip(&a.ip())) {
            return Err(CollaboratorError::http(format!(
                "host '{domain}' resolves to private address {}",
                addr.ip()
            )));
        }
        Ok(())
    }
}

/// Loopback, private, link-local, CGNAT, broadcast, or unspecified.
/// IPv4-mapped IPv6 addresses are judged by their IPv4 form.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10
                || (a == 100 && (b & 0xC0) == 64)
                // 192.0.0.0/24
                || (a == 192 && b == 0 && c == 0)
        },
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_ip(&IpAddr::V4(v4)),
            None => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    // fc00::/7
                    || (v6.segments()[0] & 0xFE00) == 0xFC00
                    // fe80::/10
                    || (v6.segments()[0] & 0xFFC0) == 0xFE80
            },
        },
    }
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
    policy: HostPolicy,
    max_body_bytes: usize,
    max_redirects: usize,
}

impl ReqwestFetcher {
    /// `fallback_timeout_ms` applies when the config sets no HTTP timeout.
    pub fn from_config(config: &HttpConfig, fallback_timeout_ms: u64) -> crate::Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(fallback_timeout_ms));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| crate::Error::message(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            policy: HostPolicy::from_config(config),
            max_body_bytes: config.max_body_bytes,
            max_redirects: config.max_redirects,
        })
    }

    fn build(&self, method: &Method, url: &Url, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method.clone(), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let has_content_type = request
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()));
        match &request.body {
            None => builder,
            Some(serde_json::Value::String(text)) => {
                if !has_content_type {
                    builder = builder.header(header::CONTENT_TYPE, "text/plain");
                }
                builder.body(text.clone())
            },
            Some(value) => {
                if !has_content_type {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                }
                builder.body(value.to_string())
            },
        }
    }

    async fn read_body(&self, mut resp: reqwest::Response) -> CollaboratorResult<Vec<u8>> {
        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| CollaboratorError::http(e.to_string()))?
        {
            let room = self.max_body_bytes.saturating_sub(body.len());
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                debug!(limit = self.max_body_bytes, "response body truncated");
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: HttpRequest) -> CollaboratorResult<HttpResponse> {
        let mut method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CollaboratorError::http(format!("invalid method '{}'", request.method)))?;
        let mut url =
            Url::parse(&request.url).map_err(|e| CollaboratorError::http(format!("invalid URL: {e}")))?;
        let mut request = request;
        let mut hops = 0usize;

        let resp = loop {
            self.policy.check(&url).await?;
            let resp = self
                .build(&method, &url, &request)
                .send()
                .await
                .map_err(|e| CollaboratorError::http(e.to_string()))?;

            if !resp.status().is_redirection() {
                break resp;
            }
            let Some(location) = resp
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                break resp;
            };
            if hops >= self.max_redirects {
                return Err(CollaboratorError::http(format!(
                    "too many redirects (max {})",
                    self.max_redirects
                )));
            }
            url = url
                .join(location)
                .map_err(|e| CollaboratorError::http(format!("bad redirect location: {e}")))?;
            if !matches!(
                resp.status(),
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
            ) {
                method = Method::GET;
                request.body = None;
            }
            hops += 1;
        };

        let status = resp.status();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let is_json = headers
            .get(header::CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));

        let bytes = self.read_body(resp).await?;
        let body = String::from_utf8_lossy(&bytes).into_owned();
        let json = is_json
            .then(|| serde_json::from_str(&body).ok())
            .flatten();

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            ok: status.is_success(),
            headers,
            body,
            json,
        })
    }
}
