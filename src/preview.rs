//! Local preview server for the mirrored tree.
//!
//! Serves the output directory the way the eventual static host will, so a
//! run can be eyeballed before the deploy scripts push it anywhere.

use std::fs;
use std::path::{Component, Path, PathBuf};

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Resolve a request path to a file under the root, the way a dumb static
/// host would: directories serve their index.html, traversal is rejected.
fn resolve(root: &Path, raw_url: &str) -> Option<PathBuf> {
    let path = raw_url.split('?').next().unwrap_or(raw_url);
    let rel = path.trim_start_matches('/');

    let rel_path = Path::new(rel);
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let mut target = root.join(rel_path);
    if path.ends_with('/') || target.is_dir() {
        target = target.join("index.html");
    }
    target.is_file().then_some(target)
}

/// Serve `root` on localhost until interrupted.
pub fn serve(root: &Path, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let server = tiny_http::Server::http(("127.0.0.1", port))
        .map_err(|e| format!("failed to bind preview server: {}", e))?;

    println!("Preview: http://127.0.0.1:{}/ (Ctrl-C to stop)", port);

    for request in server.incoming_requests() {
        let response = match resolve(root, request.url()) {
            Some(file) => match fs::read(&file) {
                Ok(body) => {
                    let mut resp = tiny_http::Response::from_data(body);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        content_type(&file).as_bytes(),
                    ) {
                        resp.add_header(header);
                    }
                    resp
                }
                Err(_) => tiny_http::Response::from_string("500").with_status_code(500),
            },
            None => tiny_http::Response::from_string("404 not found").with_status_code(404),
        };

        if let Err(e) = request.respond(response) {
            tracing::debug!("preview response failed: {}", e);
        }
    }

    Ok(())
}
