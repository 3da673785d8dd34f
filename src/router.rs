use crate::error::ServerResult;
use crate::http::{Method, Request, Response, Status};
use crate::logging::RequestLog;
use crate::pages::Pages;
use crate::routes::{HandlerFn, Routes};
use std::sync::Arc;

/// Dispatches GET requests to an exact route table; never touches the filesystem
#[derive(Clone, Debug)]
pub struct RouteServer {
    routes: Routes,
    pages: Pages,
    log: RequestLog,
}

impl RouteServer {
    /// Create a new route server
    pub fn new(routes: Routes, pages: Pages) -> Self {
        Self {
            routes,
            pages,
            log: RequestLog::default(),
        }
    }

    pub fn with_log(mut self, log: RequestLog) -> Self {
        self.log = log;
        self
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    /// Handle a request: 501 for anything but GET, 404 when no route matches
    pub fn handle(&self, request: &Request) -> ServerResult<Response> {
        if request.method != Method::Get {
            self.log.error(
                Status::NotImplemented.code(),
                format_args!("Request method is not GET"),
            );
            return Ok(self.pages.error(Status::NotImplemented));
        }

        match self.routes.dispatch(request) {
            Some(response) => {
                self.log.info(format_args!("Trying to serve {}", request.path));
                response
            }
            None => {
                self.log.error(
                    Status::NotFound.code(),
                    format_args!("Requested page {} not found", request.path),
                );
                Ok(self.pages.error(Status::NotFound))
            }
        }
    }

    /// Share this router as a handler callback
    pub fn into_handler(self) -> HandlerFn {
        Arc::new(move |request| self.handle(request))
    }
}
