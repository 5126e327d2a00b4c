//! Turning an [`HttpError`] into a response body.
//!
//! A configured error folder may hold override pages named after the status
//! code; `404.htm`, `404.html` and `404.aspx` are tried in that order. Without
//! an override a built-in page is rendered showing the error kind, message
//! and the chain of underlying causes.

use std::error::Error as _;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::HttpError;

const CUSTOM_PAGE_EXTENSIONS: [&str; 3] = ["htm", "html", "aspx"];

/// Causes deeper than this are not shown.
const MAX_CAUSES: usize = 8;

/// Override page for `status`, if the folder has one.
pub async fn find_custom_page(folder: &Path, status: u16) -> Option<PathBuf> {
    for ext in CUSTOM_PAGE_EXTENSIONS {
        let candidate = folder.join(format!("{status}.{ext}"));
        if tokio::fs::metadata(&candidate)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Some(candidate);
        }
    }
    None
}

/// HTML body for `err`, from the custom folder when possible.
pub async fn render(err: &HttpError, custom_folder: Option<&Path>) -> String {
    if let Some(folder) = custom_folder {
        if let Some(page) = find_custom_page(folder, err.status.as_u16()).await {
            match tokio::fs::read(&page).await {
                Ok(bytes) => return String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => warn!(page = %page.display(), error = %e, "Custom error page unreadable"),
            }
        }
    }
    render_builtin(err)
}

pub fn render_builtin(err: &HttpError) -> String {
    let code = err.status.as_u16();
    let reason = err.status.reason_phrase();

    let mut causes = String::new();
    let mut source = err.source();
    let mut depth = 0;
    while let Some(cause) = source {
        if depth == MAX_CAUSES {
            causes.push_str("  ...\n");
            break;
        }
        causes.push_str("  caused by: ");
        causes.push_str(&escape_html(&cause.to_string()));
        causes.push('\n');
        source = cause.source();
        depth += 1;
    }

    let mut page = format!(
        "<html>\n<head><title>{code} {reason}</title></head>\n<body>\n\
         <h1>{code} {reason}</h1>\n\
         <h2>{kind}</h2>\n\
         <p>{message}</p>\n",
        kind = err.kind,
        message = escape_html(&err.message),
    );
    if !causes.is_empty() {
        page.push_str("<pre>\n");
        page.push_str(&causes);
        page.push_str("</pre>\n");
    }
    page.push_str("</body>\n</html>\n");
    page
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
