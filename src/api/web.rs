use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use rust_embed::Embed;

/// Embedded SPA shell plus the tmux config template. In debug builds
/// rust-embed reads from disk, so editing `static/` takes effect on reload.
#[derive(Embed)]
#[folder = "static/"]
struct StaticAssets;

pub async fn static_asset(uri: axum::http::Uri) -> impl IntoResponse {
    let path = uri.path().trim_start_matches('/');

    // Exact path first, then index.html for SPA routing.
    let file = if path.is_empty() {
        StaticAssets::get("index.html")
    } else {
        StaticAssets::get(path).or_else(|| StaticAssets::get("index.html"))
    };

    match file {
        Some(content) => {
            let mime = if path.is_empty() || StaticAssets::get(path).is_none() {
                "text/html".to_string()
            } else {
                mime_guess::from_path(path).first_or_text_plain().to_string()
            };
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime)],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_assets_include_index_html() {
        let file = StaticAssets::get("index.html");
        assert!(file.is_some(), "static/index.html should be embedded");
    }

    #[test]
    fn index_contains_html() {
        let file = StaticAssets::get("index.html").unwrap();
        let content = std::str::from_utf8(&file.data).unwrap();
        assert!(content.contains("<html"));
    }
}
