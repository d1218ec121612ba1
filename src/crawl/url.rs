//! URL canonicalization (spec §6, bit-exact rules) and domain extraction.

/// Canonicalize a URL per spec §6:
/// 1. Parse as URL; on parse failure, regex-extract hostname and accept
///    as-is.
/// 2. Empty fragment.
/// 3. Strip trailing `/` except when path is exactly `/`.
/// 4. Sort query parameters lexicographically by key; preserve duplicate
///    keys and their relative order.
pub fn canonicalize(raw: &str) -> String {
    match parse_url(raw) {
        Some(mut parts) => {
            parts.fragment = None;
            sort_query(&mut parts.query);
            render(&parts)
        }
        None => raw.to_string(),
    }
}

/// Extract the domain (host) portion of a URL, or `None` if it can't be
/// determined even with a best-effort regex fallback.
pub fn extract_domain(raw: &str) -> Option<String> {
    if let Some(parts) = parse_url(raw) {
        return Some(parts.host);
    }
    // Best-effort hostname regex for unparsable input (spec §6 step 1).
    let after_scheme = raw.splitn(2, "://").nth(1).unwrap_or(raw);
    let host = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .splitn(2, '@')
        .last()
        .unwrap_or("");
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

struct UrlParts {
    scheme: String,
    host: String,
    path: String,
    query: Vec<(String, String)>,
    fragment: Option<String>,
}

fn parse_url(raw: &str) -> Option<UrlParts> {
    let (scheme, rest) = raw.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }
    let (rest, fragment) = match rest.split_once('#') {
        Some((before, after)) => (before, Some(after.to_string())),
        None => (rest, None),
    };
    let (rest, query_str) = match rest.split_once('?') {
        Some((before, after)) => (before, Some(after)),
        None => (rest, None),
    };
    let (host, path) = match rest.split_once('/') {
        Some((h, p)) => (h, format!("/{p}")),
        None => (rest, "/".to_string()),
    };
    if host.is_empty() {
        return None;
    }
    let query = query_str
        .map(|q| {
            q.split('&')
                .filter(|p| !p.is_empty())
                .map(|p| match p.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (p.to_string(), String::new()),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(UrlParts { scheme: scheme.to_string(), host: host.to_string(), path, query, fragment })
}

fn sort_query(query: &mut [(String, String)]) {
    // stable sort: preserves relative order of duplicate keys.
    query.sort_by(|a, b| a.0.cmp(&b.0));
}

fn render(parts: &UrlParts) -> String {
    let mut path = parts.path.clone();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    let mut out = format!("{}://{}{}", parts.scheme, parts.host, path);
    if !parts.query.is_empty() {
        let q: Vec<String> = parts.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        out.push('?');
        out.push_str(&q.join("&"));
    }
    out
}
