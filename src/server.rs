use crate::acceptor::{Accept, ConnectionAcceptor};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::http::{Request, Response, Status};
use crate::logging::RequestLog;
use crate::metrics::MetricsCollector;
use crate::pages::Pages;
use crate::proxy::{Fetch, HttpFetcher, ProxyForwarder};
use crate::router::RouteServer;
use crate::routes::{HandlerFn, Routes};
use crate::static_files::StaticServer;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Lifecycle of a server's listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Listening,
    Stopped,
}

/// An HTTP server bound to one `host:port`.
///
/// The socket is bound by the constructor. `serve` and `proxy` then run the
/// accept loop until accepting fails, which stops the listener for good.
/// With `worker_threads == 0` each connection is read, dispatched, answered
/// and closed before the next one is accepted; otherwise accepted connections
/// are queued to a fixed pool of workers, each still handling one connection
/// start to finish.
pub struct Server {
    acceptor: Box<dyn Accept>,
    config: ServerConfig,
    serving_url: String,
    state: Mutex<ServerState>,
    metrics: Arc<MetricsCollector>,
    fetcher: Arc<dyn Fetch>,
    log: RequestLog,
}

impl Server {
    /// Bind a server with default settings
    pub fn new(host: &str, port: u16) -> ServerResult<Self> {
        Self::with_config(ServerConfig::new().with_address(host, port))
    }

    /// Bind a server from a full configuration
    pub fn with_config(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;

        let acceptor = ConnectionAcceptor::new(config.socket_address())?;
        Self::with_acceptor(config, Box::new(acceptor))
    }

    /// Serve connections handed out by an already bound listener
    pub fn with_acceptor(config: ServerConfig, acceptor: Box<dyn Accept>) -> ServerResult<Self> {
        config.validate()?;

        let serving_url = format!("http://{}:{}/", config.listen_address, acceptor.local_addr().port());

        Ok(Self {
            acceptor,
            serving_url,
            state: Mutex::new(ServerState::NotStarted),
            metrics: Arc::new(MetricsCollector::new()),
            fetcher: Arc::new(HttpFetcher),
            log: RequestLog::new(config.logging),
            config,
        })
    }

    /// Use a different outbound client for `proxy`
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// `http://host:port/` the server answers on
    pub fn serving_url(&self) -> &str {
        &self.serving_url
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Whether the listener is accepting; false once a fatal accept error stopped it
    pub fn is_listening(&self) -> bool {
        self.acceptor.is_listening()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Error-page builder using this server's default template and logging
    pub fn pages(&self) -> Pages {
        Pages::new(&self.config.default_error_template).with_log(self.log)
    }

    /// Handler that serves files, trying `routes` first.
    ///
    /// Files are read from `static_root` joined with `../` repeated
    /// `parent_directories` times; `/` serves `anchor`.
    pub fn static_server(&self, routes: Option<Routes>, parent_directories: usize, anchor: &str) -> HandlerFn {
        StaticServer::new(self.pages())
            .with_routes(routes.unwrap_or_default())
            .with_root(&self.config.static_root)
            .with_parent_directories(parent_directories)
            .with_anchor(anchor)
            .with_favicon_fallback(&self.config.favicon_fallback)
            .with_log(self.log)
            .into_handler()
    }

    /// Handler that only dispatches GET requests to `routes`
    pub fn route_server(&self, routes: Routes) -> HandlerFn {
        RouteServer::new(routes, self.pages())
            .with_log(self.log)
            .into_handler()
    }

    /// Run the accept loop, answering every request with `callback`
    pub fn serve(&self, callback: HandlerFn) -> ServerResult<()> {
        self.run(|connection| self.handle_connection(connection, &callback))
    }

    /// Run the accept loop as a reverse proxy for each request's target URL
    pub fn proxy(&self) -> ServerResult<()> {
        let forwarder = ProxyForwarder::new(self.fetcher.clone(), self.pages()).with_log(self.log);
        self.run(|connection| self.forward_connection(connection, &forwarder))
    }

    fn run<H>(&self, handle: H) -> ServerResult<()>
    where
        H: Fn(Connection) + Sync,
    {
        self.acceptor.start();
        *self.state.lock() = ServerState::Listening;
        info!("Listening at {}", self.serving_url);

        let result = if self.config.worker_threads == 0 {
            self.accept_loop(|connection| {
                handle(connection);
                Ok(())
            })
        } else {
            self.run_pool(&handle)
        };

        self.acceptor.stop();
        *self.state.lock() = ServerState::Stopped;
        result
    }

    fn accept_loop<F>(&self, mut dispatch: F) -> ServerResult<()>
    where
        F: FnMut(Connection) -> ServerResult<()>,
    {
        while self.acceptor.is_listening() {
            match self.acceptor.accept() {
                Ok(connection) => {
                    self.metrics.record_connection();
                    dispatch(connection)?;
                }
                Err(e) => {
                    error!("Accepting a connection failed, stopping {}: {}", self.serving_url, e);
                    self.acceptor.stop();
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    fn run_pool<H>(&self, handle: &H) -> ServerResult<()>
    where
        H: Fn(Connection) + Sync,
    {
        let workers = self.config.worker_threads;
        let (sender, receiver) = crossbeam::channel::bounded::<Connection>(self.config.queue_depth);

        crossbeam::thread::scope(|scope| {
            for id in 0..workers {
                let receiver = receiver.clone();
                scope.spawn(move |_| {
                    for connection in receiver.iter() {
                        handle(connection);
                    }
                    debug!("Worker {} exiting", id);
                });
            }
            drop(receiver);

            let result = self.accept_loop(|connection| {
                sender
                    .send(connection)
                    .map_err(|_| ServerError::Connection("Worker pool has shut down".to_string()))
            });

            // Workers drain what is queued, then see the closed channel
            drop(sender);
            result
        })
        .map_err(|_| ServerError::Connection("A worker thread panicked".to_string()))?
    }

    fn handle_connection(&self, mut connection: Connection, callback: &HandlerFn) {
        let Some(request) = self.read_request(&mut connection) else {
            return;
        };

        let response = {
            let _timer = self.metrics.time_request(request.method.as_str());
            self.dispatch(callback, &request)
        };

        if let Some(location) = &response.redirect {
            self.log.info(format_args!("[{}] Redirecting to {}", response.wire_status(), location));
        }

        match connection.write_response(&response) {
            Ok(()) => self
                .metrics
                .record_request(request.method.as_str(), response.wire_status()),
            Err(e) => warn!("Writing response to {} failed: {}", connection.peer_addr(), e),
        }
    }

    fn forward_connection(&self, mut connection: Connection, forwarder: &ProxyForwarder) {
        let Some(request) = self.read_request(&mut connection) else {
            return;
        };

        let _timer = self.metrics.time_request(request.method.as_str());
        match forwarder.forward(&request.raw_url, connection.writer()) {
            Ok(status) => {
                if status != Status::Ok.code() {
                    self.metrics.record_upstream_failure();
                }
                self.metrics.record_request(request.method.as_str(), status);
            }
            Err(e) => warn!("Relaying {} to {} failed: {}", request.raw_url, connection.peer_addr(), e),
        }
    }

    /// Read the request, answering malformed ones with a 400 page
    fn read_request(&self, connection: &mut Connection) -> Option<Request> {
        connection.set_max_header_size(self.config.max_header_size);
        if let Err(e) = connection.set_read_timeout(self.config.read_timeout) {
            warn!("Could not set read timeout on connection {}: {}", connection.id(), e);
        }

        match connection.read_request() {
            Ok(request) => Some(request),
            Err(ServerError::Connection(message)) => {
                debug!("{}", message);
                None
            }
            Err(ServerError::Io(e)) => {
                debug!("Reading from {} failed: {}", connection.peer_addr(), e);
                None
            }
            Err(e) => {
                self.log.error(
                    Status::BadRequest.code(),
                    format_args!("Malformed request from {}: {}", connection.peer_addr(), e),
                );
                self.metrics.record_bad_request();

                let response = self.pages().error(Status::BadRequest);
                if let Err(e) = connection.write_response(&response) {
                    warn!("Writing response to {} failed: {}", connection.peer_addr(), e);
                }
                None
            }
        }
    }

    /// Run the callback; errors and panics become the default error page
    fn dispatch(&self, callback: &HandlerFn, request: &Request) -> Response {
        let fault = match panic::catch_unwind(AssertUnwindSafe(|| callback(request))) {
            Ok(Ok(response)) => return response,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("Handler panicked: {}", panic_message(&*payload)),
        };

        self.log.error(Status::InternalServerError.code(), format_args!("{}", fault));
        self.metrics.record_handler_fault();
        self.pages().default_error()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
