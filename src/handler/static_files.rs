use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{ErrorKind, HttpError};
use crate::handler::{Handler, ResponseWriter};
use crate::http::request::{Method, Request};
use crate::http::response::{CachePolicy, StatusCode};

const INDEX_FILE: &str = "index.html";

/// Serves files below a document root. The file is streamed by the writer
/// rather than read into the response buffer.
#[derive(Debug, Clone)]
pub struct StaticFileHandler {
    root: PathBuf,
}

impl StaticFileHandler {
    pub const NAME: &'static str = "static";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File for a request path, or `None` when the path tries to leave the
    /// document root.
    pub fn resolve_path(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Metadata of the file to send for `path`, descending into the index
    /// file when `path` is a directory.
    async fn locate(path: PathBuf) -> Option<(PathBuf, Metadata)> {
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        if metadata.is_file() {
            return Some((path, metadata));
        }
        if metadata.is_dir() {
            let index = path.join(INDEX_FILE);
            let metadata = tokio::fs::metadata(&index).await.ok()?;
            return metadata.is_file().then_some((index, metadata));
        }
        None
    }
}

#[async_trait]
impl Handler for StaticFileHandler {
    async fn process(
        &self,
        request: &mut Request,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), HttpError> {
        if !matches!(request.method, Method::GET | Method::HEAD) {
            return Err(HttpError::new(
                StatusCode::MethodNotAllowed,
                ErrorKind::Protocol,
                format!("{} is not allowed on static content", request.method.as_str()),
            ));
        }

        let path = self
            .resolve_path(&request.path)
            .ok_or_else(|| HttpError::not_found(&request.path))?;
        let (path, metadata) = Self::locate(path)
            .await
            .ok_or_else(|| HttpError::not_found(&request.path))?;

        response.set_content_type(content_type_for(&path))?;
        response.set_cache_policy(CachePolicy::Public { max_age: 3600 })?;
        response.send_file(path, metadata.len())?;
        Ok(())
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_refused() {
        let handler = StaticFileHandler::new("/srv/www");
        assert_eq!(handler.resolve_path("/../etc/passwd"), None);
        assert_eq!(
            handler.resolve_path("/css/site.css"),
            Some(PathBuf::from("/srv/www/css/site.css"))
        );
    }

    #[tokio::test]
    async fn directory_resolves_to_its_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs").join(INDEX_FILE), "hi").unwrap();

        let (path, metadata) = StaticFileHandler::locate(dir.path().join("docs")).await.unwrap();
        assert_eq!(path, dir.path().join("docs").join(INDEX_FILE));
        assert_eq!(metadata.len(), 2);

        assert!(StaticFileHandler::locate(dir.path().to_path_buf()).await.is_none());
        assert!(StaticFileHandler::locate(dir.path().join("absent")).await.is_none());
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("a/b.HTML")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }
}
