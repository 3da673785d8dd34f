pub mod acceptor;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod mime;
pub mod pages;
pub mod proxy;
pub mod router;
pub mod routes;
pub mod server;
pub mod static_files;

/// Re-exports of common components for easier access
pub use acceptor::{Accept, ConnectionAcceptor};
pub use config::{ServeMode, ServerConfig};
pub use connection::{Connection, ConnectionState};
pub use error::{ServerError, ServerResult};
pub use http::{Charset, Headers, HttpParser, Method, QueryString, Request, Response, Status};
pub use logging::{init_logging, RequestLog};
pub use metrics::{Counter, Histogram, MetricsCollector, Timer};
pub use mime::mime_type;
pub use pages::{error_page, Pages};
pub use proxy::{Client, Fetch, HttpFetcher, ProxyForwarder, UpstreamResponse};
pub use router::RouteServer;
pub use routes::{handler, HandlerFn, Routes};
pub use server::{Server, ServerState};
pub use static_files::{FileLookup, StaticServer};
