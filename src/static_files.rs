use crate::config::DEFAULT_FAVICON_FALLBACK;
use crate::error::ServerResult;
use crate::http::{Method, Request, Response, Status};
use crate::logging::RequestLog;
use crate::mime::{mime_type, DEFAULT_MIME_TYPE};
use crate::pages::Pages;
use crate::routes::{HandlerFn, Routes};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Outcome of mapping a request path onto the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLookup {
    Found {
        content: String,
        mime_type: &'static str,
    },
    /// The directory exists but the file does not
    NotFound,
    /// A directory on the way to the file does not exist
    DirectoryNotFound,
}

/// Serves files from disk, consulting an exact route table first.
///
/// Non-GET requests that miss the table get a 501 page; missing files get a
/// 404 page, except `/favicon.ico` which redirects to a fallback image.
#[derive(Clone, Debug)]
pub struct StaticServer {
    routes: Routes,
    root: PathBuf,
    parent_directories: usize,
    anchor: String,
    favicon_fallback: String,
    pages: Pages,
    log: RequestLog,
}

impl StaticServer {
    /// Serve from the working directory with `index.html` as the anchor
    pub fn new(pages: Pages) -> Self {
        Self {
            routes: Routes::new(),
            root: PathBuf::from("."),
            parent_directories: 0,
            anchor: "index.html".to_string(),
            favicon_fallback: DEFAULT_FAVICON_FALLBACK.to_string(),
            pages,
            log: RequestLog::default(),
        }
    }

    pub fn with_routes(mut self, routes: Routes) -> Self {
        self.routes = routes;
        self
    }

    /// Directory that file names (after the `../` prefix) are resolved against
    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self
    }

    /// Number of `../` segments prepended to every file name
    pub fn with_parent_directories(mut self, count: usize) -> Self {
        self.parent_directories = count;
        self
    }

    /// File served for a request to `/`
    pub fn with_anchor(mut self, anchor: &str) -> Self {
        self.anchor = anchor.to_string();
        self
    }

    pub fn with_favicon_fallback(mut self, url: &str) -> Self {
        self.favicon_fallback = url.to_string();
        self
    }

    pub fn with_log(mut self, log: RequestLog) -> Self {
        self.log = log;
        self
    }

    /// File name for a request path: the anchor for `/`, else the path minus its leading slash
    pub fn file_name<'a>(&'a self, path: &'a str) -> &'a str {
        if path == "/" {
            &self.anchor
        } else {
            path.strip_prefix('/').unwrap_or(path)
        }
    }

    /// On-disk location for a file name, including the parent-directory prefix
    pub fn full_path(&self, file_name: &str) -> PathBuf {
        let mut full = self.root.clone();
        for _ in 0..self.parent_directories {
            full.push("..");
        }
        full.push(file_name);
        full
    }

    /// Map a request path to a file.
    ///
    /// Names that would leave the served directory, and directories, are
    /// reported as `NotFound`. Other read failures are returned as errors.
    pub fn resolve(&self, path: &str) -> ServerResult<FileLookup> {
        let file_name = self.file_name(path);
        let contained = Path::new(file_name)
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if file_name.is_empty() || !contained {
            return Ok(FileLookup::NotFound);
        }

        let full = self.full_path(file_name);
        if full.is_dir() {
            return Ok(FileLookup::NotFound);
        }

        match fs::read(&full) {
            Ok(bytes) => {
                let mime = full
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(mime_type)
                    .unwrap_or(DEFAULT_MIME_TYPE);
                Ok(FileLookup::Found {
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                    mime_type: mime,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let parent_exists = full.parent().map_or(false, Path::is_dir);
                if parent_exists {
                    Ok(FileLookup::NotFound)
                } else {
                    Ok(FileLookup::DirectoryNotFound)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Handle one request
    pub fn handle(&self, request: &Request) -> ServerResult<Response> {
        if let Some(response) = self.routes.dispatch(request) {
            self.log.info(format_args!("Trying to serve {}", request.path));
            return response;
        }

        if request.method != Method::Get {
            self.log.error(
                Status::NotImplemented.code(),
                format_args!("Request method is not GET for requested page {}", request.path),
            );
            return Ok(self.pages.error(Status::NotImplemented));
        }

        match self.resolve(&request.path)? {
            FileLookup::Found { content, mime_type } => {
                self.log.info(format_args!(
                    "Trying to serve {}",
                    self.full_path(self.file_name(&request.path)).display()
                ));
                Ok(Response::new().with_body(content).with_content_type(mime_type))
            }
            FileLookup::NotFound | FileLookup::DirectoryNotFound => {
                if request.path == "/favicon.ico" {
                    self.log.info(format_args!("Trying to serve /favicon.ico"));
                    return Ok(Response::redirect_to(&self.favicon_fallback).with_content_type("text/html"));
                }

                self.log.error(
                    Status::NotFound.code(),
                    format_args!("Requested page {} not found", request.path),
                );
                Ok(self.pages.error(Status::NotFound))
            }
        }
    }

    /// Share this server as a handler callback
    pub fn into_handler(self) -> HandlerFn {
        Arc::new(move |request| self.handle(request))
    }
}
