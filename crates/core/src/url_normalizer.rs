//! Canonicalizes URLs for deduplication. See SPEC_FULL §4.3.
//!
//! `normalize` is pure and idempotent: `normalize(normalize(u)) ==
//! normalize(u)` for every `u` it accepts (property P7).

use crate::WorkerError;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

/// Default tracking query parameter names stripped by rule 7. Matches
/// anything starting with `utm_`, plus a fixed blocklist.
const TRACKING_PREFIXES: &[&str] = &["utm_"];
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid"];

/// Characters that must stay percent-encoded in a path segment once decoded;
/// everything else is re-encoded back to its literal form. Keeps `/` as a
/// path separator, not something to re-encode.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'%');

pub fn normalize(raw: &str) -> Result<String, WorkerError> {
    let mut url = Url::parse(raw).map_err(|e| WorkerError::InvalidUrl(format!("{raw}: {e}")))?;

    if url.host_str().is_none() {
        return Err(WorkerError::InvalidUrl(format!("{raw}: missing host")));
    }

    // Rule 2: url::Url already lowercases scheme and (for special schemes)
    // host on parse; normalize explicitly in case a caller constructs one
    // from parts that bypassed that.
    let scheme = url.scheme().to_lowercase();
    if scheme != url.scheme() {
        url.set_scheme(&scheme).ok();
    }

    // Rule 3: drop default ports.
    let default_port = match scheme.as_str() {
        "http" => Some(80u16),
        "https" => Some(443u16),
        _ => None,
    };
    if url.port() == default_port {
        url.set_port(None).ok();
    }

    // Rule 4/5: decode percent-encoding in the path, collapse duplicate
    // slashes, re-encode the minimal required set, strip one trailing slash.
    let decoded_path = percent_decode_str(url.path()).decode_utf8_lossy().to_string();
    let collapsed = collapse_slashes(&decoded_path);
    let trimmed = if collapsed.len() > 1 {
        collapsed.trim_end_matches('/')
    } else {
        collapsed.as_str()
    };
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    let re_encoded = utf8_percent_encode(trimmed, PATH_ENCODE_SET).to_string();
    url.set_path(&re_encoded);

    // Rule 6: drop fragment.
    url.set_fragment(None);

    // Rule 7/8: strip tracking params, then sort remaining lexicographically.
    let mut kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        drop(pairs);
    }

    Ok(url.to_string())
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

fn is_tracking_param(name: &str) -> bool {
    TRACKING_PREFIXES.iter().any(|p| name.starts_with(p)) || TRACKING_PARAMS.contains(&name)
}

/// Extracts the normalized host (plus non-default port) from an already
/// normalized URL, for use as the Domain Coordinator's registry key.
pub fn extract_host(normalized_url: &str) -> Result<String, WorkerError> {
    let url = Url::parse(normalized_url)
        .map_err(|e| WorkerError::InvalidUrl(format!("{normalized_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| WorkerError::InvalidUrl(format!("{normalized_url}: missing host")))?;
    match url.port() {
        Some(port) => Ok(format!("{host}:{port}")),
        None => Ok(host.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        assert_eq!(
            normalize("HTTPS://Docs.Example.COM/Path").unwrap(),
            "https://docs.example.com/Path"
        );
    }

    #[test]
    fn drops_default_ports() {
        assert_eq!(
            normalize("http://example.com:80/x").unwrap(),
            "http://example.com/x"
        );
        assert_eq!(
            normalize("https://example.com:443/x").unwrap(),
            "https://example.com/x"
        );
        assert_eq!(
            normalize("https://example.com:8443/x").unwrap(),
            "https://example.com:8443/x"
        );
    }

    #[test]
    fn collapses_slashes_and_trailing_slash() {
        assert_eq!(
            normalize("https://example.com/a//b///c/").unwrap(),
            "https://example.com/a/b/c"
        );
        assert_eq!(normalize("https://example.com/").unwrap(), "https://example.com/");
    }

    #[test]
    fn drops_fragment() {
        assert_eq!(
            normalize("https://example.com/a#section-2").unwrap(),
            "https://example.com/a"
        );
    }

    #[test]
    fn strips_tracking_params_and_sorts_rest() {
        assert_eq!(
            normalize("https://example.com/a?z=1&utm_source=x&a=2&fbclid=abc").unwrap(),
            "https://example.com/a?a=2&z=1"
        );
    }

    #[test]
    fn rejects_missing_scheme_or_host() {
        assert!(normalize("not a url").is_err());
        assert!(normalize("file:///etc/passwd").is_err());
    }

    #[test]
    fn is_idempotent() {
        let cases = [
            "HTTPS://Docs.Example.COM:443/a//b/?utm_source=x&b=1&a=2#frag",
            "http://example.com/",
            "https://example.com/a/b/c?a=1",
        ];
        for raw in cases {
            let once = normalize(raw).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn extracts_host_with_non_default_port() {
        let n = normalize("https://example.com:8443/a").unwrap();
        assert_eq!(extract_host(&n).unwrap(), "example.com:8443");
        let n = normalize("https://example.com/a").unwrap();
        assert_eq!(extract_host(&n).unwrap(), "example.com");
    }
}
