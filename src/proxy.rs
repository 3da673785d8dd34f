use crate::error::{ServerError, ServerResult};
use crate::http::{write_head, Headers, Status};
use crate::logging::RequestLog;
use crate::pages::Pages;
use once_cell::sync::OnceCell;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Headers that describe a single hop and are never relayed
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// What an upstream server answered; the body is read lazily
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Headers,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("body", &"<stream>")
            .finish()
    }
}

/// Outbound HTTP client used by the proxy
pub trait Fetch: Send + Sync {
    /// Fetch `target`, an absolute URL; transport failures are errors, any status is not
    fn fetch(&self, target: &str) -> ServerResult<UpstreamResponse>;
}

static CLIENT: OnceCell<HttpClient> = OnceCell::new();

/// Process-wide client, built on first use and shared read-only afterwards
pub fn shared_client() -> ServerResult<&'static HttpClient> {
    CLIENT.get_or_try_init(|| {
        HttpClient::builder()
            .redirect(Policy::none())
            .no_proxy()
            .timeout(None::<Duration>)
            .build()
            .map_err(ServerError::from)
    })
}

/// `Fetch` backed by the shared blocking `reqwest` client
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFetcher;

impl Fetch for HttpFetcher {
    fn fetch(&self, target: &str) -> ServerResult<UpstreamResponse> {
        let response = shared_client()?.get(target).send()?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                // Values outside visible ASCII are kept, with invalid UTF-8 replaced
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Ok(UpstreamResponse {
            status,
            content_type,
            headers,
            body: Box::new(response),
        })
    }
}

/// Blocking outbound calls for handlers, made with the shared client
#[derive(Debug, Clone, Copy, Default)]
pub struct Client;

impl Client {
    /// Fetch `url` and return its body as text; a non-2xx status is an error
    pub fn get(url: &str) -> ServerResult<String> {
        let response = shared_client()?.get(url).send()?.error_for_status()?;
        Ok(response.text()?)
    }

    /// Post `form` as `application/x-www-form-urlencoded` and return the
    /// response body, whatever the status
    pub fn post(url: &str, form: &[(&str, &str)]) -> ServerResult<String> {
        let response = shared_client()?.post(url).form(&form).send()?;
        Ok(response.text()?)
    }
}

/// Relays requests to the URL in their request target.
///
/// A successful fetch is always answered with `200 OK`, whatever status the
/// upstream sent; only the upstream headers and body are passed through.
/// Transport failures become a 502 page.
#[derive(Clone)]
pub struct ProxyForwarder {
    fetcher: Arc<dyn Fetch>,
    pages: Pages,
    log: RequestLog,
}

impl fmt::Debug for ProxyForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyForwarder")
            .field("fetcher", &"<fetch>")
            .field("pages", &self.pages)
            .finish()
    }
}

impl ProxyForwarder {
    pub fn new(fetcher: Arc<dyn Fetch>, pages: Pages) -> Self {
        Self {
            fetcher,
            pages,
            log: RequestLog::default(),
        }
    }

    pub fn with_log(mut self, log: RequestLog) -> Self {
        self.log = log;
        self
    }

    /// Fetch `target` and write the complete response to `out`.
    ///
    /// Returns the status sent to the client.
    pub fn forward<W: Write>(&self, target: &str, out: &mut W) -> ServerResult<u16> {
        self.log.info(format_args!("Trying to form gateway to {}", target));

        match self.fetcher.fetch(target) {
            Ok(upstream) => {
                let copied = self.relay(target, upstream, out)?;
                log::debug!("Relayed {} bytes from {}", copied, target);
                Ok(Status::Ok.code())
            }
            Err(e) => {
                self.log.error(Status::BadGateway.code(), format_args!("{}", e));
                let response = self.pages.error(Status::BadGateway);
                out.write_all(&response.serialize()?)?;
                out.flush()?;
                Ok(response.status)
            }
        }
    }

    fn relay<W: Write>(&self, target: &str, mut upstream: UpstreamResponse, out: &mut W) -> ServerResult<u64> {
        if upstream.status != Status::Ok.code() {
            log::debug!("Upstream {} answered {}, relaying as 200", target, upstream.status);
        }

        let mut headers = Headers::new();
        for (name, value) in upstream.headers.iter() {
            if !HOP_BY_HOP.iter().any(|hop| hop.eq_ignore_ascii_case(name)) {
                headers.append(name, value);
            }
        }
        if let Some(content_type) = &upstream.content_type {
            headers.insert("Content-Type", content_type);
        }
        headers.insert("Connection", "close");

        write_head(out, Status::Ok.code(), &headers)?;
        let copied = io::copy(&mut upstream.body, out)?;
        out.flush()?;

        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::error_page;
    use std::io::Cursor;

    struct CannedFetch {
        status: u16,
        body: &'static str,
    }

    impl Fetch for CannedFetch {
        fn fetch(&self, _target: &str) -> ServerResult<UpstreamResponse> {
            let headers: Headers = vec![
                ("content-type", "text/plain"),
                ("x-upstream", "canned"),
                ("transfer-encoding", "chunked"),
                ("connection", "keep-alive"),
            ]
            .into_iter()
            .collect();

            Ok(UpstreamResponse {
                status: self.status,
                content_type: Some("text/plain".to_string()),
                headers,
                body: Box::new(Cursor::new(self.body.as_bytes().to_vec())),
            })
        }
    }

    struct Unreachable;

    impl Fetch for Unreachable {
        fn fetch(&self, target: &str) -> ServerResult<UpstreamResponse> {
            Err(ServerError::Upstream(format!("connection refused: {}", target)))
        }
    }

    fn forward(fetcher: impl Fetch + 'static) -> (u16, String) {
        let forwarder = ProxyForwarder::new(Arc::new(fetcher), Pages::new("missing_template.html"));
        let mut out = Vec::new();
        let status = forwarder.forward("http://upstream.test/page", &mut out).unwrap();
        (status, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_success_relays_body_and_headers() {
        let (status, text) = forward(CannedFetch { status: 200, body: "upstream body" });

        assert_eq!(status, 200);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.contains("x-upstream: canned\r\n"));
        assert!(text.ends_with("\r\n\r\nupstream body"));
    }

    #[test]
    fn test_upstream_status_is_reported_as_200() {
        // Upstream 404s are not propagated; the client sees 200 with the upstream body
        let (status, text) = forward(CannedFetch { status: 404, body: "missing upstream" });

        assert_eq!(status, 200);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("missing upstream"));
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let (_, text) = forward(CannedFetch { status: 200, body: "" });

        assert!(!text.contains("transfer-encoding"));
        assert!(!text.contains("keep-alive"));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_unreachable_upstream_is_502() {
        let (status, text) = forward(Unreachable);

        assert_eq!(status, 502);
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
        assert!(text.ends_with(&error_page(502).unwrap()));
    }

    #[test]
    fn test_http_fetcher_errors() {
        // Nothing listens on port 1
        assert!(matches!(
            HttpFetcher.fetch("http://127.0.0.1:1/"),
            Err(ServerError::Upstream(_))
        ));
        // Origin-form targets have no host to connect to
        assert!(HttpFetcher.fetch("/relative/path").is_err());
    }
}
