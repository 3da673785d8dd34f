use crate::error::{ServerError, ServerResult};
use bytes::{BufMut, Bytes, BytesMut};
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::io::Write;
use std::net::SocketAddr;
use std::str::{self, FromStr};
use url::{form_urlencoded, Url};

/// HTTP Status Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Continue = 100,
    SwitchingProtocols = 101,

    Ok = 200,
    Created = 201,
    Accepted = 202,
    NoContent = 204,

    MovedPermanently = 301,
    Found = 302,
    SeeOther = 303,
    NotModified = 304,
    TemporaryRedirect = 307,
    PermanentRedirect = 308,

    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    RequestTimeout = 408,
    Gone = 410,
    PayloadTooLarge = 413,
    UnsupportedMediaType = 415,
    TooManyRequests = 429,

    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
}

impl Status {
    pub const ALL: [Status; 27] = [
        Status::Continue,
        Status::SwitchingProtocols,
        Status::Ok,
        Status::Created,
        Status::Accepted,
        Status::NoContent,
        Status::MovedPermanently,
        Status::Found,
        Status::SeeOther,
        Status::NotModified,
        Status::TemporaryRedirect,
        Status::PermanentRedirect,
        Status::BadRequest,
        Status::Unauthorized,
        Status::Forbidden,
        Status::NotFound,
        Status::MethodNotAllowed,
        Status::RequestTimeout,
        Status::Gone,
        Status::PayloadTooLarge,
        Status::UnsupportedMediaType,
        Status::TooManyRequests,
        Status::InternalServerError,
        Status::NotImplemented,
        Status::BadGateway,
        Status::ServiceUnavailable,
        Status::GatewayTimeout,
    ];

    /// Look up a known status by its numeric code
    pub fn from_code(code: u16) -> Option<Status> {
        Self::ALL.iter().copied().find(|status| status.code() == code)
    }

    /// The numeric status code
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Get the text description for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Continue => "Continue",
            Status::SwitchingProtocols => "Switching Protocols",

            Status::Ok => "OK",
            Status::Created => "Created",
            Status::Accepted => "Accepted",
            Status::NoContent => "No Content",

            Status::MovedPermanently => "Moved Permanently",
            Status::Found => "Found",
            Status::SeeOther => "See Other",
            Status::NotModified => "Not Modified",
            Status::TemporaryRedirect => "Temporary Redirect",
            Status::PermanentRedirect => "Permanent Redirect",

            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::RequestTimeout => "Request Timeout",
            Status::Gone => "Gone",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::UnsupportedMediaType => "Unsupported Media Type",
            Status::TooManyRequests => "Too Many Requests",

            Status::InternalServerError => "Internal Server Error",
            Status::NotImplemented => "Not Implemented",
            Status::BadGateway => "Bad Gateway",
            Status::ServiceUnavailable => "Service Unavailable",
            Status::GatewayTimeout => "Gateway Timeout",
        }
    }
}

/// Reason phrase for any status code, including ones without a `Status` variant
pub fn reason_phrase(code: u16) -> &'static str {
    Status::from_code(code).map(|s| s.as_str()).unwrap_or("Unknown")
}

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
}

impl Method {
    /// Convert the method to a string
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
        }
    }
}

impl FromStr for Method {
    type Err = ServerError;

    fn from_str(s: &str) -> ServerResult<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "CONNECT" => Ok(Method::Connect),
            "PATCH" => Ok(Method::Patch),
            _ => Err(ServerError::HttpParse(format!("Invalid method: {}", s))),
        }
    }
}

/// Text encodings a request body can be decoded from and a response body encoded to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    /// Parse a charset label such as `utf-8` or `ISO-8859-1`
    pub fn from_label(label: &str) -> Option<Charset> {
        match label.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Charset::Utf8),
            "iso-8859-1" | "latin1" | "l1" | "iso8859-1" => Some(Charset::Latin1),
            "us-ascii" | "ascii" => Some(Charset::Ascii),
            _ => None,
        }
    }

    /// Pick the charset parameter out of a `Content-Type` value, UTF-8 if absent or unknown
    pub fn from_content_type(content_type: &str) -> Charset {
        content_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
            .and_then(|(_, value)| Charset::from_label(value))
            .unwrap_or_default()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8 => "utf-8",
            Charset::Latin1 => "iso-8859-1",
            Charset::Ascii => "us-ascii",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Charset::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
        }
    }

    /// Characters the charset cannot represent are written as `?`
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Latin1 => text
                .chars()
                .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
                .collect(),
            Charset::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

/// Ordered header list; lookups ignore case, duplicates are allowed via `append`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the first value for a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a header, replacing every existing value with the same name.
    /// The first existing position is kept.
    pub fn insert(&mut self, name: &str, value: &str) {
        match self.entries.iter().position(|(key, _)| key.eq_ignore_ascii_case(name)) {
            Some(pos) => {
                self.entries[pos].1 = value.to_string();
                let mut index = 0;
                self.entries.retain(|(key, _)| {
                    let keep = index <= pos || !key.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.append(name, value),
        }
    }

    /// Add a header without touching existing values
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Query parameters in their original order, repeated keys kept
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryString {
    pairs: Vec<(String, String)>,
}

impl QueryString {
    /// Parse a raw query (without the leading `?`)
    pub fn parse(raw: &str) -> Self {
        Self {
            pairs: form_urlencoded::parse(raw.as_bytes()).into_owned().collect(),
        }
    }

    /// First value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Every value for a key, in order
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// HTTP Parser State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpParserState {
    RequestLine,
    Headers,
    Body,
    Complete,
}

/// Position inside a `Transfer-Encoding: chunked` body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    Trailer,
}

/// Incremental HTTP/1.x request parser.
///
/// Bytes are fed with `parse` as they arrive; the head is buffered until the
/// blank line. The body is then either exactly `Content-Length` bytes or a
/// chunked body decoded up to its terminating zero-size chunk.
pub struct HttpParser {
    pub state: HttpParserState,
    pub method: Option<Method>,
    pub target: Option<String>,
    pub version: Option<String>,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub content_length: usize,
    head: Vec<u8>,
    chunked: Option<ChunkState>,
    pending: Vec<u8>,
    max_header_size: usize,
}

impl HttpParser {
    /// Create a new HTTP parser
    pub fn new() -> Self {
        Self::with_max_header_size(16 * 1024)
    }

    pub fn with_max_header_size(max_header_size: usize) -> Self {
        Self {
            state: HttpParserState::RequestLine,
            method: None,
            target: None,
            version: None,
            headers: Headers::new(),
            body: Vec::new(),
            content_length: 0,
            head: Vec::new(),
            chunked: None,
            pending: Vec::new(),
            max_header_size,
        }
    }

    /// Parse a chunk of data
    pub fn parse(&mut self, data: &[u8]) -> ServerResult<()> {
        match self.state {
            HttpParserState::RequestLine | HttpParserState::Headers => {
                self.head.extend_from_slice(data);

                let Some(headers_end) = find_head_end(&self.head) else {
                    if self.head.len() > self.max_header_size {
                        return Err(ServerError::HttpParse("Request head too large".to_string()));
                    }
                    return Ok(());
                };
                if headers_end > self.max_header_size {
                    return Err(ServerError::HttpParse("Request head too large".to_string()));
                }

                let head = std::mem::take(&mut self.head);
                let head_str = str::from_utf8(&head[..headers_end])
                    .map_err(|_| ServerError::HttpParse("Invalid UTF-8".to_string()))?;

                let mut lines = head_str.split("\r\n");
                self.parse_request_line(lines.next().unwrap_or(""))?;
                self.state = HttpParserState::Headers;

                for line in lines.filter(|line| !line.is_empty()) {
                    self.parse_header(line)?;
                }

                if let Some(encoding) = self.headers.get("transfer-encoding") {
                    // Chunked must be the final coding; it takes precedence over Content-Length
                    let last = encoding.rsplit(',').next().unwrap_or("").trim();
                    if !last.eq_ignore_ascii_case("chunked") {
                        return Err(ServerError::HttpParse(format!(
                            "Unsupported Transfer-Encoding: {}",
                            encoding
                        )));
                    }
                    self.chunked = Some(ChunkState::Size);
                } else if let Some(content_length) = self.headers.get("content-length") {
                    self.content_length = content_length.trim().parse().map_err(|_| {
                        ServerError::HttpParse(format!("Invalid Content-Length: {}", content_length))
                    })?;
                }

                // Body starts after the \r\n\r\n marker
                self.state = HttpParserState::Body;
                self.push_body(&head[headers_end + 4..])?;
            }
            HttpParserState::Body => self.push_body(data)?,
            HttpParserState::Complete => {}
        }

        Ok(())
    }

    fn push_body(&mut self, data: &[u8]) -> ServerResult<()> {
        if self.chunked.is_some() {
            self.pending.extend_from_slice(data);
            return self.decode_chunks();
        }

        let wanted = self.content_length - self.body.len();
        self.body.extend_from_slice(&data[..data.len().min(wanted)]);
        if self.body.len() >= self.content_length {
            self.state = HttpParserState::Complete;
        }
        Ok(())
    }

    /// Move every complete chunk from `pending` into the body
    fn decode_chunks(&mut self) -> ServerResult<()> {
        while let Some(chunk) = self.chunked {
            match chunk {
                ChunkState::Size => {
                    let Some(end) = self.pending_line_end()? else {
                        return Ok(());
                    };
                    let size = parse_chunk_size(&self.pending[..end])?;
                    self.pending.drain(..end + 2);
                    self.chunked = Some(if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    });
                }
                ChunkState::Data(size) => {
                    let framed = size
                        .checked_add(2)
                        .ok_or_else(|| ServerError::HttpParse("Chunk size too large".to_string()))?;
                    if self.pending.len() < framed {
                        return Ok(());
                    }
                    if &self.pending[size..framed] != b"\r\n" {
                        return Err(ServerError::HttpParse("Chunk data not followed by CRLF".to_string()));
                    }
                    self.body.extend_from_slice(&self.pending[..size]);
                    self.pending.drain(..framed);
                    self.chunked = Some(ChunkState::Size);
                }
                ChunkState::Trailer => {
                    let Some(end) = self.pending_line_end()? else {
                        return Ok(());
                    };
                    self.pending.drain(..end + 2);
                    // Trailer fields are skipped; the empty line ends the message
                    if end == 0 {
                        self.pending.clear();
                        self.chunked = None;
                        self.state = HttpParserState::Complete;
                    }
                }
            }
        }

        Ok(())
    }

    /// Offset of the next CRLF in `pending`; an overlong line is an error
    fn pending_line_end(&self) -> ServerResult<Option<usize>> {
        match self.pending.windows(2).position(|window| window == b"\r\n") {
            Some(end) => Ok(Some(end)),
            None if self.pending.len() > self.max_header_size => {
                Err(ServerError::HttpParse("Chunk line too long".to_string()))
            }
            None => Ok(None),
        }
    }

    /// Parse a request line
    fn parse_request_line(&mut self, line: &str) -> ServerResult<()> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 || !parts[2].starts_with("HTTP/") {
            return Err(ServerError::HttpParse(format!("Invalid request line: {:?}", line)));
        }

        self.method = Some(parts[0].parse()?);
        self.target = Some(parts[1].to_string());
        self.version = Some(parts[2].to_string());

        Ok(())
    }

    /// Parse a header line
    fn parse_header(&mut self, line: &str) -> ServerResult<()> {
        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                self.headers.append(key.trim(), value.trim());
                Ok(())
            }
            _ => Err(ServerError::HttpParse(format!("Invalid header: {:?}", line))),
        }
    }

    /// Check if the parser has completed parsing a request
    pub fn is_complete(&self) -> bool {
        self.state == HttpParserState::Complete
    }

    /// Build the request for a completely parsed message received from `peer`
    pub fn get_request(&self, peer: SocketAddr) -> ServerResult<Request> {
        if !self.is_complete() {
            return Err(ServerError::HttpParse("Request not complete".to_string()));
        }

        let method = self
            .method
            .ok_or_else(|| ServerError::HttpParse("Method not set".to_string()))?;
        let target = self
            .target
            .as_deref()
            .ok_or_else(|| ServerError::HttpParse("Target not set".to_string()))?;

        let host = self.headers.get("host").unwrap_or("localhost");
        let charset = self
            .headers
            .get("content-type")
            .map(Charset::from_content_type)
            .unwrap_or_default();

        let mut request = Request::from_target(method, target, host)?;
        request.client_address = peer.ip().to_string();
        request.headers = self.headers.clone();
        request.body = charset.decode(&self.body);
        Ok(request)
    }
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Hex chunk size, ignoring any `;name=value` extensions
fn parse_chunk_size(line: &[u8]) -> ServerResult<usize> {
    let invalid = || ServerError::HttpParse(format!("Invalid chunk size: {:?}", String::from_utf8_lossy(line)));

    let line = str::from_utf8(line).map_err(|_| invalid())?;
    let digits = line.split(';').next().unwrap_or("").trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    usize::from_str_radix(digits, 16).map_err(|_| invalid())
}

/// HTTP Request
#[derive(Debug, Clone)]
pub struct Request {
    /// Decoded absolute path, without the query
    pub path: String,
    pub query: QueryString,
    /// Absolute URL of the request
    pub url: String,
    /// Request target exactly as it appeared on the request line
    pub raw_url: String,
    pub method: Method,
    /// Peer IP address, port stripped
    pub client_address: String,
    pub headers: Headers,
    /// Fully drained body, decoded with the request's charset
    pub body: String,
}

impl Request {
    /// Create a request for `target` as if sent from the loopback address
    pub fn new(method: Method, target: &str) -> ServerResult<Self> {
        Self::from_target(method, target, "localhost")
    }

    /// Replace the body; used when building requests outside a connection
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    fn from_target(method: Method, target: &str, host: &str) -> ServerResult<Self> {
        let url = if target.starts_with("http://") || target.starts_with("https://") {
            Url::parse(target)
        } else if target.starts_with('/') {
            Url::parse(&format!("http://{}{}", host, target))
        } else {
            return Err(ServerError::HttpParse(format!("Unsupported request target: {}", target)));
        }
        .map_err(|e| ServerError::HttpParse(format!("Invalid request target {}: {}", target, e)))?;

        Ok(Self {
            path: percent_decode_str(url.path()).decode_utf8_lossy().into_owned(),
            query: QueryString::parse(url.query().unwrap_or("")),
            url: url.to_string(),
            raw_url: target.to_string(),
            method,
            client_address: "127.0.0.1".to_string(),
            headers: Headers::new(),
            body: String::new(),
        })
    }
}

/// HTTP Response produced by a handler
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub body: String,
    pub status: u16,
    pub content_type: String,
    pub content_encoding: Charset,
    pub headers: Headers,
    /// When set, the client is redirected here and `body` is not sent
    pub redirect: Option<String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            body: String::new(),
            status: Status::Ok.code(),
            content_type: "text/plain".to_string(),
            content_encoding: Charset::Utf8,
            headers: Headers::new(),
            redirect: None,
        }
    }
}

impl Response {
    /// Create an empty `200 OK` text response
    pub fn new() -> Self {
        Self::default()
    }

    /// An HTML response with the given status
    pub fn html(status: Status, body: String) -> Self {
        Self::new()
            .with_status(status.code())
            .with_content_type("text/html")
            .with_body(body)
    }

    /// A `302 Found` redirect to `url`
    pub fn redirect_to(url: &str) -> Self {
        Self {
            status: Status::Found.code(),
            redirect: Some(url.to_string()),
            ..Self::default()
        }
    }

    pub fn with_body<S: Into<String>>(mut self, body: S) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    pub fn with_encoding(mut self, encoding: Charset) -> Self {
        self.content_encoding = encoding;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Status line code actually sent: redirects that did not pick a 3xx go out as 302
    pub fn wire_status(&self) -> u16 {
        match self.redirect {
            Some(_) if !(300..400).contains(&self.status) => Status::Found.code(),
            _ => self.status,
        }
    }

    /// Serialize the complete response, head and encoded body
    pub fn serialize(&self) -> ServerResult<Bytes> {
        let mut headers = self.headers.clone();
        headers.insert("Content-Type", &self.content_type);
        headers.insert("Connection", "close");

        let mut out = BytesMut::new();
        match &self.redirect {
            Some(location) => {
                headers.insert("Location", location);
                headers.insert("Content-Length", "0");
                encode_head(&mut out, self.wire_status(), &headers)?;
            }
            None => {
                let body = self.content_encoding.encode(&self.body);
                headers.insert("Content-Length", &body.len().to_string());
                encode_head(&mut out, self.status, &headers)?;
                out.put_slice(&body);
            }
        }

        Ok(out.freeze())
    }
}

fn encode_head(out: &mut BytesMut, status: u16, headers: &Headers) -> ServerResult<()> {
    let format_err = |_| ServerError::Connection("Failed to format response head".to_string());

    // Write status line
    write!(out, "HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).map_err(format_err)?;

    // Write headers; line breaks inside a name or value would start a new header
    for (name, value) in headers.iter() {
        write!(out, "{}: {}\r\n", strip_line_breaks(name), strip_line_breaks(value)).map_err(format_err)?;
    }

    // Write blank line
    out.put_slice(b"\r\n");

    Ok(())
}

fn strip_line_breaks(text: &str) -> Cow<'_, str> {
    let is_break = |c: char| c == '\r' || c == '\n';
    if text.contains(is_break) {
        Cow::Owned(text.replace(is_break, ""))
    } else {
        Cow::Borrowed(text)
    }
}

/// Write only a status line and headers; the caller streams the body afterwards
pub fn write_head<W: Write>(writer: &mut W, status: u16, headers: &Headers) -> ServerResult<()> {
    let mut out = BytesMut::new();
    encode_head(&mut out, status, headers)?;
    writer.write_all(&out).map_err(ServerError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.168.1.20:54321".parse().unwrap()
    }

    #[test]
    fn test_query_keeps_order_and_duplicates() {
        let request = Request::new(Method::Get, "/search?tag=b&q=rust+lang&tag=a&empty").unwrap();
        assert_eq!(request.path, "/search");
        assert_eq!(request.query.get_all("tag"), vec!["b", "a"]);
        assert_eq!(request.query.get("q"), Some("rust lang"));
        assert_eq!(request.query.get("empty"), Some(""));

        let keys: Vec<&str> = request.query.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["tag", "q", "tag", "empty"]);
    }

    #[test]
    fn test_path_is_decoded_and_raw_url_kept() {
        let request = Request::new(Method::Get, "/docs/hello%20world.txt?x=1").unwrap();
        assert_eq!(request.path, "/docs/hello world.txt");
        assert_eq!(request.raw_url, "/docs/hello%20world.txt?x=1");
        assert_eq!(request.url, "http://localhost/docs/hello%20world.txt?x=1");
    }

    #[test]
    fn test_absolute_form_target() {
        let request = Request::new(Method::Get, "http://upstream.test:8081/a/b?c=d").unwrap();
        assert_eq!(request.path, "/a/b");
        assert_eq!(request.raw_url, "http://upstream.test:8081/a/b?c=d");
        assert_eq!(request.query.get("c"), Some("d"));
    }

    #[test]
    fn test_parser_strips_port_from_client_address() {
        let mut parser = HttpParser::new();
        parser.parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        let request = parser.get_request(peer()).unwrap();
        assert_eq!(request.client_address, "192.168.1.20");

        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        let request = parser.get_request(v6).unwrap();
        assert_eq!(request.client_address, "::1");
    }

    #[test]
    fn test_parser_body_split_across_chunks() {
        let mut parser = HttpParser::new();
        parser
            .parse(b"POST /submit HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello")
            .unwrap();
        assert!(!parser.is_complete());

        parser.parse(b" world and more").unwrap();
        assert!(parser.is_complete());

        let request = parser.get_request(peer()).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.body, "hello world");
    }

    #[test]
    fn test_parser_head_split_across_chunks() {
        let mut parser = HttpParser::new();
        parser.parse(b"GET /a HTTP/1.1\r\nHo").unwrap();
        assert_eq!(parser.state, HttpParserState::RequestLine);
        parser.parse(b"st: x\r\n\r\n").unwrap();
        assert!(parser.is_complete());
        assert_eq!(parser.headers.get("HOST"), Some("x"));
    }

    #[test]
    fn test_parser_decodes_latin1_body() {
        let mut parser = HttpParser::new();
        let mut data =
            b"POST / HTTP/1.1\r\nContent-Type: text/plain; charset=ISO-8859-1\r\nContent-Length: 4\r\n\r\n"
                .to_vec();
        data.extend_from_slice(&[b'c', b'a', b'f', 0xE9]);
        parser.parse(&data).unwrap();

        let request = parser.get_request(peer()).unwrap();
        assert_eq!(request.body, "café");
    }

    #[test]
    fn test_parser_rejects_bad_input() {
        let mut parser = HttpParser::new();
        assert!(parser.parse(b"BREW /pot HTTP/1.1\r\n\r\n").is_err());

        let mut parser = HttpParser::new();
        assert!(parser.parse(b"GET /\r\n\r\n").is_err());

        let mut parser = HttpParser::with_max_header_size(16);
        assert!(parser.parse(b"GET /a-very-long-path HTTP/1.1\r\nX: y").is_err());
    }

    #[test]
    fn test_charset_encode_replaces_unrepresentable() {
        assert_eq!(Charset::Ascii.encode("naïve"), b"na?ve".to_vec());
        assert_eq!(Charset::Latin1.encode("é€"), vec![0xE9, b'?']);
        assert_eq!(Charset::from_content_type("text/html; charset=\"us-ascii\""), Charset::Ascii);
        assert_eq!(Charset::from_content_type("text/html; charset=koi8-r"), Charset::Utf8);
    }

    #[test]
    fn test_headers_insert_replaces_in_place() {
        let mut headers = Headers::new();
        headers.append("X-One", "1");
        headers.append("Content-Type", "text/plain");
        headers.append("content-type", "text/css");
        headers.insert("Content-Type", "text/html");

        let collected: Vec<(&str, &str)> = headers.iter().collect();
        assert_eq!(collected, vec![("X-One", "1"), ("Content-Type", "text/html")]);
    }

    #[test]
    fn test_response_defaults() {
        let response = Response::default();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "text/plain");
        assert_eq!(response.content_encoding, Charset::Utf8);
        assert!(response.headers.is_empty());
        assert!(response.body.is_empty());
        assert!(response.redirect.is_none());
    }

    #[test]
    fn test_serialize_sets_content_type_and_length() {
        let response = Response::new()
            .with_header("X-Trace", "abc")
            .with_content_type("application/json")
            .with_body("{\"ok\":true}");
        let bytes = response.serialize().unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("X-Trace: abc\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"ok\":true}"));
    }

    #[test]
    fn test_serialize_redirect_has_no_body() {
        let response = Response::redirect_to("https://example.com/x").with_body("ignored");
        let text = String::from_utf8(response.serialize().unwrap().to_vec()).unwrap();

        assert!(text.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(text.contains("Location: https://example.com/x\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn test_unknown_status_reason() {
        assert_eq!(reason_phrase(418), "Unknown");
        assert_eq!(Status::from_code(502), Some(Status::BadGateway));
    }

    #[test]
    fn test_parser_decodes_chunked_body() {
        let mut parser = HttpParser::new();
        parser
            .parse(b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n")
            .unwrap();
        assert!(!parser.is_complete());

        // Size line, data and terminator arrive split across reads
        parser.parse(b"7;ext=1\r\n, wor").unwrap();
        parser.parse(b"ld\r\n0\r\n").unwrap();
        assert!(!parser.is_complete());
        parser.parse(b"X-Checksum: 1\r\n\r\n").unwrap();
        assert!(parser.is_complete());

        let request = parser.get_request(peer()).unwrap();
        assert_eq!(request.body, "hello, world");
    }

    #[test]
    fn test_parser_chunked_overrides_content_length() {
        let mut parser = HttpParser::new();
        parser
            .parse(b"POST / HTTP/1.1\r\nContent-Length: 2\r\nTransfer-Encoding: gzip, chunked\r\n\r\nA\r\n0123456789\r\n0\r\n\r\n")
            .unwrap();
        assert!(parser.is_complete());
        assert_eq!(parser.get_request(peer()).unwrap().body, "0123456789");
    }

    #[test]
    fn test_parser_rejects_bad_chunks() {
        let head = "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        for body in ["zz\r\nhi\r\n0\r\n\r\n", "2\r\nhiX\r\n0\r\n\r\n", "\r\n"] {
            let mut parser = HttpParser::new();
            let result = parser.parse(format!("{}{}", head, body).as_bytes());
            assert!(matches!(result, Err(ServerError::HttpParse(_))), "accepted {:?}", body);
        }

        let mut parser = HttpParser::new();
        assert!(parser
            .parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n")
            .is_err());
    }

    #[test]
    fn test_serialize_strips_line_breaks_from_headers() {
        let response = Response::redirect_to("/next\r\nSet-Cookie: session=stolen")
            .with_header("X-Name", "a\nb");
        let text = String::from_utf8(response.serialize().unwrap().to_vec()).unwrap();

        assert!(text.contains("Location: /nextSet-Cookie: session=stolen\r\n"));
        assert!(text.contains("X-Name: ab\r\n"));
        assert!(!text.contains("\r\nSet-Cookie"));
    }
}
