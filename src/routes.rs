use crate::error::ServerResult;
use crate::http::{Request, Response};
use std::fmt;
use std::sync::Arc;

/// A handler function for processing HTTP requests
pub type HandlerFn = Arc<dyn Fn(&Request) -> ServerResult<Response> + Send + Sync>;

/// Wrap a closure as a `HandlerFn`
pub fn handler<F>(f: F) -> HandlerFn
where
    F: Fn(&Request) -> ServerResult<Response> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A route entry in the table
#[derive(Clone)]
struct RouteEntry {
    path: String,
    handler: HandlerFn,
}

// Custom Debug implementation for RouteEntry since handler can't be automatically derived
impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("path", &self.path)
            .field("handler", &"<function>")
            .finish()
    }
}

/// Exact path to handler table.
///
/// Paths are compared as plain strings: no wildcards, no parameters, and
/// `/foo` does not match `/foo/`. Entries keep their insertion order.
#[derive(Clone, Debug, Default)]
pub struct Routes {
    routes: Vec<RouteEntry>,
}

impl Routes {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, replacing the handler of an existing entry for the same path
    pub fn insert<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&Request) -> ServerResult<Response> + Send + Sync + 'static,
    {
        self.insert_handler(path, Arc::new(handler))
    }

    /// Add an already shared handler
    pub fn insert_handler(&mut self, path: &str, handler: HandlerFn) -> &mut Self {
        match self.routes.iter_mut().find(|route| route.path == path) {
            Some(route) => route.handler = handler,
            None => self.routes.push(RouteEntry {
                path: path.to_string(),
                handler,
            }),
        }
        self
    }

    /// Builder-style `insert`
    pub fn route<F>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(&Request) -> ServerResult<Response> + Send + Sync + 'static,
    {
        self.insert(path, handler);
        self
    }

    /// The handler registered for exactly `path`
    pub fn get(&self, path: &str) -> Option<&HandlerFn> {
        self.routes
            .iter()
            .find(|route| route.path == path)
            .map(|route| &route.handler)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Registered paths in insertion order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Run the handler for an exact match on the request path.
    ///
    /// The method is not checked; `None` means the table has no such path.
    pub fn dispatch(&self, request: &Request) -> Option<ServerResult<Response>> {
        self.get(&request.path).map(|handler| handler(request))
    }
}

impl FromIterator<(String, HandlerFn)> for Routes {
    fn from_iter<I: IntoIterator<Item = (String, HandlerFn)>>(iter: I) -> Self {
        let mut routes = Routes::new();
        for (path, handler) in iter {
            routes.insert_handler(&path, handler);
        }
        routes
    }
}
