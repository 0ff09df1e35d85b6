//! Working-file names for downloads.
//!
//! The working directory is shared by every conversation, so the on-disk name
//! is the URL-derived name prefixed with a per-request token. The same request
//! always maps to the same path, which is what makes resume-by-file-size work.

const FALLBACK_NAME: &str = "download";
const MAX_NAME_LEN: usize = 120;

/// On-disk name: `<token>_<sanitized url name>`.
pub fn working_file_name(url: &str, token: &str) -> String {
    format!("{token}_{}", name_from_url(url))
}

/// Human-facing name derived from the last URL path segment.
pub fn name_from_url(url: &str) -> String {
    let raw = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()?
                .next_back()
                .filter(|s| !s.is_empty())
                .map(|s| {
                    urlencoding::decode(s)
                        .map(|d| d.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                })
        })
        .unwrap_or_default();
    sanitize(&raw)
}

/// Filename suggested by a `Content-Disposition` header, sanitized.
///
/// Handles `filename="a b.mp4"`, `filename=a.mp4` and RFC 5987
/// `filename*=UTF-8''a%20b.mp4` (preferred when both are present).
pub fn from_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in header.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = value
                    .split_once("''")
                    .map_or(value, |(_, rest)| rest)
                    .trim_matches('"');
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    extended = Some(decoded.into_owned());
                }
            },
            "filename" => plain = Some(value.trim().trim_matches('"').to_string()),
            _ => {},
        }
    }

    extended
        .or(plain)
        .filter(|n| !n.trim().is_empty())
        .map(|n| sanitize(&n))
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`, strip leading dots
/// (no hidden files, no `..`), and cap the length while keeping the extension.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    if cleaned.len() <= MAX_NAME_LEN {
        return cleaned.to_string();
    }

    // ASCII-only at this point, so byte slicing is safe.
    match cleaned.rfind('.') {
        Some(dot) if cleaned.len() - dot <= 10 => {
            let ext = &cleaned[dot..];
            format!("{}{ext}", &cleaned[..MAX_NAME_LEN - ext.len()])
        },
        _ => cleaned[..MAX_NAME_LEN].to_string(),
    }
}
