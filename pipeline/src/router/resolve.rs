//! Host and path to upstream object URL mapping

/// Document served for the site root
pub const INDEX_DOCUMENT: &str = "/index.html";

/// Deployment id of a request: the left-most DNS label of its host.
///
/// Any port is ignored. Returns `None` for an empty label or an IP literal.
pub fn deployment_id_from_host(host: &str) -> Option<&str> {
    let host = host.trim();
    if host.starts_with('[') {
        return None;
    }
    let hostname = host.split(':').next().unwrap_or(host);
    if hostname.parse::<std::net::Ipv4Addr>().is_ok() {
        return None;
    }
    let label = hostname.split('.').next()?;
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

/// Object path for a request path; the root maps to the index document
pub fn object_path(path: &str) -> &str {
    if path.is_empty() || path == "/" {
        INDEX_DOCUMENT
    } else {
        path
    }
}

/// Whether a request path stays inside the deployment prefix once a URL
/// parser resolves it: no `.`/`..` segments, encoded or not, and no
/// backslash separators.
pub fn is_contained_path(path: &str) -> bool {
    !path.contains('\\')
        && path.split('/').all(|segment| {
            let segment = segment.to_ascii_lowercase().replace("%2e", ".");
            segment != "." && segment != ".."
        })
}

/// Upstream URL of a request under the artifact namespace `base`, `None`
/// when the path would leave the deployment prefix
pub fn upstream_url(
    base: &str,
    deployment_id: &str,
    path: &str,
    query: Option<&str>,
) -> Option<String> {
    if !is_contained_path(path) {
        return None;
    }
    let mut url = format!(
        "{}/{}{}",
        base.trim_end_matches('/'),
        deployment_id,
        object_path(path)
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    Some(url)
}
