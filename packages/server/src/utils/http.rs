use axum::http::{HeaderMap, header};
use url::Url;

/// Build a safe `Content-Disposition` header value.
///
/// `disposition` is `inline` or `attachment`. The plain `filename` keeps
/// printable ASCII only; `filename*` carries the full name percent-encoded.
pub fn content_disposition(disposition: &str, filename: &str) -> String {
    let ascii_safe: String = filename
        .chars()
        .filter(|c| c.is_ascii_graphic() && !matches!(c, '"' | ';' | '\\'))
        .collect();
    let ascii_name = if ascii_safe.is_empty() {
        "download".to_string()
    } else {
        ascii_safe
    };

    // RFC 5987 percent-encoding for filename*.
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => String::from(b as char),
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("{disposition}; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
}

/// Quote an entity tag for the `ETag` header.
pub fn quoted_etag(tag: &str) -> String {
    format!("\"{tag}\"")
}

/// Whether `If-None-Match` names `tag`. Accepts quoted, weak and bare forms.
pub fn etag_matches(headers: &HeaderMap, tag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    value.split(',').map(str::trim).any(|candidate| {
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate == "*" || candidate.trim_matches('"') == tag
    })
}

/// Host of an absolute URL such as a `Referer`, lowercased, with the port
/// kept only when it is not the scheme's default.
pub fn url_host(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    authority(&url)
}

/// Normalize a bare `host[:port]` the same way [`url_host`] does, so the two
/// can be compared.
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    let url = Url::parse(&format!("http://{host}")).ok()?;
    authority(&url)
}

fn authority(url: &Url) -> Option<String> {
    let host = url.host_str().filter(|h| !h.is_empty())?.to_ascii_lowercase();
    match url.port_or_known_default() {
        Some(80 | 443) | None => Some(host),
        Some(port) => Some(format!("{host}:{port}")),
    }
}

/// Hosts named by `Referer` and `Origin`, if any.
pub fn embedding_hosts(headers: &HeaderMap) -> Vec<String> {
    [header::REFERER, header::ORIGIN]
        .iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && *v != "null")
        .filter_map(url_host)
        .collect()
}

/// Host the request was addressed to.
pub fn request_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.to_ascii_lowercase())
}
