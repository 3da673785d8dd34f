//! Error-page synthesis and the last-resort default error page.

use crate::error::{ServerError, ServerResult};
use crate::http::{Response, Status};
use crate::logging::RequestLog;
use std::fs;
use std::path::{Path, PathBuf};

/// Renders the HTML body for an error status
pub type ErrorPageFn = fn(u16) -> ServerResult<String>;

/// Served when the default error template itself cannot be read
pub const INLINE_DEFAULT_ERROR: &str = "<!DOCTYPE html>\n\
<html><head><title>500 Internal Server Error</title></head>\n\
<body><h1>500</h1><p>Internal Server Error</p></body></html>\n";

/// Render an error page for a 4xx or 5xx status.
///
/// Codes outside those classes, or without a known reason phrase, are rejected
/// with `ServerError::InvalidStatus`.
pub fn error_page(code: u16) -> ServerResult<String> {
    let status = Status::from_code(code)
        .filter(|status| status.code() >= 400)
        .ok_or(ServerError::InvalidStatus(code))?;

    Ok(format!(
        "<!DOCTYPE html>\n\
         <html><head><title>{code} {reason}</title>\n\
         <style>body{{font-family:sans-serif;max-width:800px;margin:40px auto;text-align:center;}}</style>\n\
         </head><body><h1>{code}</h1><p>{reason}</p></body></html>\n",
        code = status.code(),
        reason = status.as_str(),
    ))
}

/// Builds error responses: synthesized pages first, the on-disk default
/// template when synthesis fails.
#[derive(Debug, Clone)]
pub struct Pages {
    render: ErrorPageFn,
    default_template: PathBuf,
    log: RequestLog,
}

impl Pages {
    pub fn new<P: Into<PathBuf>>(default_template: P) -> Self {
        Self {
            render: error_page,
            default_template: default_template.into(),
            log: RequestLog::default(),
        }
    }

    /// Replace the page renderer
    pub fn with_renderer(mut self, render: ErrorPageFn) -> Self {
        self.render = render;
        self
    }

    pub fn with_log(mut self, log: RequestLog) -> Self {
        self.log = log;
        self
    }

    pub fn default_template(&self) -> &Path {
        &self.default_template
    }

    /// Render the page body for `code` with the configured renderer
    pub fn render(&self, code: u16) -> ServerResult<String> {
        (self.render)(code)
    }

    /// An HTML response for `status`, or the default error page if rendering fails
    pub fn error(&self, status: Status) -> Response {
        match self.render(status.code()) {
            Ok(body) => Response::html(status, body),
            Err(e) => {
                self.log.error(
                    Status::InternalServerError.code(),
                    format_args!("Could not create error page: {}", e),
                );
                self.default_error()
            }
        }
    }

    /// The fixed `500` page read from the default template
    pub fn default_error(&self) -> Response {
        let body = match fs::read_to_string(&self.default_template) {
            Ok(body) => body,
            Err(e) => {
                // Always logged, regardless of the per-request switch
                log::error!(
                    "[500] Could not read default error template {}: {}",
                    self.default_template.display(),
                    e
                );
                INLINE_DEFAULT_ERROR.to_string()
            }
        };
        Response::html(Status::InternalServerError, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn failing_renderer(code: u16) -> ServerResult<String> {
        Err(ServerError::InvalidStatus(code))
    }

    #[test]
    fn test_error_page_known_codes() {
        let page = error_page(404).unwrap();
        assert!(page.contains("<h1>404</h1>"));
        assert!(page.contains("Not Found"));

        assert!(error_page(502).unwrap().contains("Bad Gateway"));
    }

    #[test]
    fn test_error_page_rejects_non_error_codes() {
        assert!(matches!(error_page(200), Err(ServerError::InvalidStatus(200))));
        assert!(matches!(error_page(299), Err(ServerError::InvalidStatus(299))));
        assert!(matches!(error_page(999), Err(ServerError::InvalidStatus(999))));
    }

    #[test]
    fn test_error_response_uses_renderer() {
        let pages = Pages::new("missing.html");
        let response = pages.error(Status::NotImplemented);

        assert_eq!(response.status, 501);
        assert_eq!(response.content_type, "text/html");
        assert_eq!(response.body, error_page(501).unwrap());
    }

    #[test]
    fn test_failed_synthesis_falls_back_to_template() {
        let mut template = tempfile::NamedTempFile::new().unwrap();
        write!(template, "<p>default error</p>").unwrap();

        let pages = Pages::new(template.path()).with_renderer(failing_renderer);
        let response = pages.error(Status::NotFound);

        assert_eq!(response.status, 500);
        assert_eq!(response.content_type, "text/html");
        assert_eq!(response.body, "<p>default error</p>");
    }

    #[test]
    fn test_missing_template_degrades_to_inline_page() {
        let dir = tempfile::tempdir().unwrap();
        let pages = Pages::new(dir.path().join("nope.html"));
        let response = pages.default_error();

        assert_eq!(response.status, 500);
        assert_eq!(response.body, INLINE_DEFAULT_ERROR);
    }
}
