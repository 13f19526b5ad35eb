//! Outbound HTTP confined to the policy's allowlist and response size cap.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, SandboxError};
use crate::policy::{NetworkConsent, SandboxPolicy};

/// A general HTTP request issued by a script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    /// HTTP method, e.g. `GET` (defaults to `GET`)
    pub method: String,
    /// Target URL
    pub url: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
    /// Request body
    pub body: Option<String>,
}

/// Response returned to the script for a general request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers (non-UTF-8 values are dropped)
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: String,
}

/// Maximum redirect hops followed for one request.
const MAX_REDIRECTS: usize = 10;

/// Scheme, allowlist and consent rules applied to every URL a request touches.
#[derive(Debug)]
struct UrlRules {
    allowed_domains: Vec<String>,
    consent: Option<NetworkConsent>,
}

impl UrlRules {
    fn check(&self, raw: &str, url: &Url) -> Result<()> {
        if !matches!(url.scheme(), "http" | "https") {
            tracing::warn!(url = %raw, scheme = url.scheme(), "scheme rejected");
            return Err(SandboxError::SecurityViolation(format!(
                "scheme '{}' is not allowed; only http and https",
                url.scheme()
            )));
        }

        if self.allowed_domains.is_empty() {
            return Ok(());
        }

        let host = url
            .host_str()
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .unwrap_or_default();
        if self.host_allowed(&host) {
            return Ok(());
        }
        if self.consent.as_ref().is_some_and(|c| c.approves(raw)) {
            tracing::info!(url = %raw, "non-allowlisted host approved by consent callback");
            return Ok(());
        }

        tracing::warn!(url = %raw, host = %host, "host not in allowlist");
        Err(SandboxError::SecurityViolation(format!(
            "host '{}' is not in the network allowlist",
            host
        )))
    }

    fn host_allowed(&self, host: &str) -> bool {
        !host.is_empty()
            && self.allowed_domains.iter().any(|domain| {
                host == domain
                    || host
                        .strip_suffix(domain.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            })
    }

    /// Redirect policy that re-checks every hop before it is requested.
    fn redirect_policy(rules: Arc<Self>) -> Policy {
        Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error(SandboxError::Http(format!(
                    "stopped after {} redirects",
                    MAX_REDIRECTS
                )));
            }
            let target = attempt.url().to_string();
            match rules.check(&target, attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(e) => {
                    tracing::warn!(url = %target, "redirect target rejected");
                    attempt.error(e)
                }
            }
        })
    }
}

/// Validates target URLs against the policy and performs size-capped requests.
///
/// Redirects are followed only when each hop passes the same checks as the
/// original URL.
#[derive(Debug, Clone)]
pub struct NetworkGuard {
    client: Client,
    rules: Arc<UrlRules>,
    max_response_bytes: usize,
}

impl NetworkGuard {
    /// Create a guard from the sandbox policy.
    pub fn new(policy: &SandboxPolicy) -> Result<Self> {
        let rules = Arc::new(UrlRules {
            allowed_domains: policy
                .allowed_domains
                .iter()
                .map(|d| d.trim().to_ascii_lowercase())
                .collect(),
            consent: policy.network_consent.clone(),
        });

        let client = Client::builder()
            .timeout(policy.request_timeout())
            .redirect(UrlRules::redirect_policy(rules.clone()))
            .build()
            .map_err(|e| SandboxError::Config(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            rules,
            max_response_bytes: policy.max_response_bytes,
        })
    }

    /// Parse and validate a URL. Nothing is sent.
    pub fn check_url(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw)
            .map_err(|e| SandboxError::InvalidArgument(format!("invalid URL '{}': {}", raw, e)))?;
        self.rules.check(raw, &url)?;
        Ok(url)
    }

    /// GET a URL and return the body as text.
    pub async fn get(&self, url: &str) -> Result<String> {
        let url = self.check_url(url)?;
        let response = self.client.get(url).send().await?;
        let (_, _, body) = self.finish(response).await?;
        Ok(body)
    }

    /// POST a JSON body and return the response body as text.
    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<String> {
        let url = self.check_url(url)?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;
        let (_, _, body) = self.finish(response).await?;
        Ok(body)
    }

    /// Issue an arbitrary request and return status, headers and body.
    pub async fn request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.check_url(&request.url)?;
        let method = if request.method.is_empty() {
            Method::GET
        } else {
            Method::from_bytes(request.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
                SandboxError::InvalidArgument(format!("invalid HTTP method '{}'", request.method))
            })?
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                SandboxError::InvalidArgument(format!("invalid header name '{}'", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                SandboxError::InvalidArgument(format!("invalid value for header '{}'", name))
            })?;
            headers.insert(name, value);
        }

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let (status, headers, body) = self.finish(builder.send().await?).await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn finish(&self, response: Response) -> Result<(u16, BTreeMap<String, String>, String)> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = read_capped(response, self.max_response_bytes).await?;
        Ok((status, headers, String::from_utf8_lossy(&body).into_owned()))
    }
}

/// Read a response body chunk by chunk, aborting once `limit` is exceeded.
async fn read_capped(mut response: Response, limit: usize) -> Result<Vec<u8>> {
    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(SandboxError::ResponseTooLarge { limit });
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            tracing::warn!(limit, read = body.len() + chunk.len(), "response body over cap");
            return Err(SandboxError::ResponseTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(policy: SandboxPolicy) -> NetworkGuard {
        NetworkGuard::new(&policy).unwrap()
    }

    #[test]
    fn test_scheme_rejected() {
        let guard = guard(SandboxPolicy::default());
        assert!(guard.check_url("file:///etc/passwd").unwrap_err().is_security_violation());
        assert!(guard.check_url("ftp://example.com/").unwrap_err().is_security_violation());
        assert!(guard.check_url("https://example.com/").is_ok());
    }

    #[test]
    fn test_empty_allowlist_allows_any_host() {
        let guard = guard(SandboxPolicy::default());
        assert!(guard.check_url("http://anything.test/x").is_ok());
    }

    #[test]
    fn test_allowlist_matching() {
        let guard = guard(SandboxPolicy::default().allow_domain("api.example.com"));
        assert!(guard.check_url("https://api.example.com/v1").is_ok());
        assert!(guard.check_url("https://API.Example.com/v1").is_ok());
        assert!(guard.check_url("https://eu.api.example.com/v1").is_ok());

        assert!(guard.check_url("https://example.com/").unwrap_err().is_security_violation());
        assert!(guard
            .check_url("https://evilapi.example.com/")
            .unwrap_err()
            .is_security_violation());
        assert!(guard
            .check_url("https://api.example.com.evil.test/")
            .unwrap_err()
            .is_security_violation());
    }

    #[test]
    fn test_network_consent() {
        let guard = guard(
            SandboxPolicy::default()
                .allow_domain("api.example.com")
                .network_consent(|url| url.starts_with("https://status.other.test/")),
        );
        assert!(guard.check_url("https://status.other.test/ping").is_ok());
        assert!(guard
            .check_url("https://other.test/")
            .unwrap_err()
            .is_security_violation());
    }

    #[test]
    fn test_invalid_url() {
        let guard = guard(SandboxPolicy::default());
        assert!(matches!(
            guard.check_url("not a url"),
            Err(SandboxError::InvalidArgument(_))
        ));
    }

    /// Serve one chunked response with no Content-Length, `chunks` x 512 bytes.
    async fn chunked_server(chunks: usize) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }

            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n")
                .await;
            for _ in 0..chunks {
                let mut chunk = b"200\r\n".to_vec();
                chunk.extend(std::iter::repeat(b'x').take(512));
                chunk.extend_from_slice(b"\r\n");
                if socket.write_all(&chunk).await.is_err() {
                    return;
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });
        format!("http://{}/stream", addr)
    }

    #[tokio::test]
    async fn test_chunked_body_over_cap_is_cut_off() {
        let url = chunked_server(8).await;
        let guard = guard(SandboxPolicy::default().max_response_bytes(1024));

        let err = guard.get(&url).await.unwrap_err();
        assert!(matches!(err, SandboxError::ResponseTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn test_chunked_body_under_cap_is_read() {
        let url = chunked_server(2).await;
        let guard = guard(SandboxPolicy::default().max_response_bytes(1024));

        let body = guard.get(&url).await.unwrap();
        assert_eq!(body.len(), 1024);
    }

    #[tokio::test]
    async fn test_redirect_off_allowlist_is_refused() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
            .mount(&target)
            .await;

        let origin = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/go"))
            .respond_with(ResponseTemplate::new(302).insert_header(
                "Location",
                format!("http://localhost:{}/secret", target.address().port()),
            ))
            .mount(&origin)
            .await;

        let guard = guard(SandboxPolicy::default().allow_domain("127.0.0.1"));
        let err = guard.get(&format!("{}/go", origin.uri())).await.unwrap_err();

        assert!(err.is_security_violation(), "got {err:?}");
        assert!(target.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redirect_within_allowlist_is_followed() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/go"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/landed"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/landed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("here"))
            .mount(&server)
            .await;

        let guard = guard(SandboxPolicy::default().allow_domain("127.0.0.1"));
        let body = guard.get(&format!("{}/go", server.uri())).await.unwrap();
        assert_eq!(body, "here");
    }
}
