//! Monitored site list
//!
//! Sites are `{name, url}` pairs owned by the configuration. The monitor only
//! ever reads a snapshot; edits go through [`SiteList`].

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// A website to probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub url: String,
}

impl Site {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Build a site from a bare URL, naming it after its domain
    pub fn from_url(url: &str) -> Self {
        let url = normalize_url(url);
        Self {
            name: extract_domain(&url),
            url,
        }
    }

    /// Whether `query` refers to this site
    ///
    /// Matches on domain, exact URL, exact name, or a numbered name such as
    /// `example.com-2` when `query` is `example.com`.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return false;
        }
        let domain = extract_domain(query);

        domain == extract_domain(&self.url)
            || query == self.url
            || query == self.name
            || self
                .name
                .strip_prefix(&domain)
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    }
}

/// Prepend `https://` to a URL that carries no http(s) scheme
///
/// # Examples
///
/// ```
/// use teleping::config::normalize_url;
///
/// assert_eq!(normalize_url("example.com"), "https://example.com");
/// assert_eq!(normalize_url(" http://example.com "), "http://example.com");
/// ```
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Bare host of a URL without scheme, path, query, fragment, port or `www.`
pub fn extract_domain(url: &str) -> String {
    let rest = url.trim();
    let rest = rest
        .strip_prefix("https://")
        .or_else(|| rest.strip_prefix("http://"))
        .unwrap_or(rest);
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).trim().to_string()
}

/// `base` if no site uses it yet, else the first free `base-N` from N = 2
pub fn unique_name(base: &str, existing: &[Site]) -> String {
    let taken = |name: &str| existing.iter().any(|site| site.name == name);
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Shared, lock-guarded site list
///
/// Readers take a [`SiteList::snapshot`] and never hold the lock during I/O.
#[derive(Debug, Default)]
pub struct SiteList {
    sites: Mutex<Vec<Site>>,
}

impl SiteList {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            sites: Mutex::new(sites),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Site>> {
        // A poisoned list is still a valid list
        self.sites
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current list in configured order
    pub fn snapshot(&self) -> Vec<Site> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Add a site for `url`, named after its domain with a numeric suffix
    /// on collision. Returns the stored site.
    pub fn add(&self, url: &str) -> Site {
        let url = normalize_url(url);
        let mut sites = self.lock();
        let name = unique_name(&extract_domain(&url), &sites);
        let site = Site::new(name, url);
        info!("Adding site {} ({})", site.name, site.url);
        sites.push(site.clone());
        site
    }

    /// Remove every site matching `query`, returning the removed ones
    pub fn remove_matching(&self, query: &str) -> Vec<Site> {
        let mut sites = self.lock();
        let (removed, kept): (Vec<Site>, Vec<Site>) =
            sites.drain(..).partition(|site| site.matches(query));
        *sites = kept;
        debug!("Removed {} site(s) matching {}", removed.len(), query);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("www.example.com"), "https://www.example.com");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com/a"), "http://example.com/a");
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://www.example.com"), "example.com");
        assert_eq!(extract_domain("https://www.example.com/path?q=1"), "example.com");
        assert_eq!(extract_domain("www.example.com"), "example.com");
        assert_eq!(extract_domain("example.com:8443#top"), "example.com");
        assert_eq!(extract_domain("http://sub.example.com"), "sub.example.com");
    }

    #[test]
    fn test_unique_name() {
        let sites = vec![
            Site::new("example.com", "https://example.com"),
            Site::new("example.com-2", "https://example.com/a"),
        ];
        assert_eq!(unique_name("other.com", &sites), "other.com");
        assert_eq!(unique_name("example.com", &sites), "example.com-3");
    }

    #[test]
    fn test_site_matches() {
        let site = Site::new("example.com-2", "https://www.example.com/shop");

        assert!(site.matches("example.com"));
        assert!(site.matches("www.example.com"));
        assert!(site.matches("https://www.example.com/shop"));
        assert!(site.matches("example.com-2"));
        assert!(!site.matches("example.org"));
        assert!(!site.matches(""));
    }

    #[test]
    fn test_numbered_name_requires_digits() {
        let site = Site::new("example.com-shop", "https://shop.example.net");
        assert!(!site.matches("example.com"));
    }

    #[test]
    fn test_from_url() {
        let site = Site::from_url("www.example.com/status");
        assert_eq!(site.name, "example.com");
        assert_eq!(site.url, "https://www.example.com/status");
    }

    #[test]
    fn test_site_list_add_and_remove() {
        let list = SiteList::default();
        assert!(list.is_empty());

        let first = list.add("example.com");
        let second = list.add("https://example.com/other");
        list.add("example.org");

        assert_eq!(first.name, "example.com");
        assert_eq!(second.name, "example.com-2");
        assert_eq!(list.len(), 3);

        let removed = list.remove_matching("example.com");
        assert_eq!(removed.len(), 2);
        assert_eq!(list.snapshot(), vec![Site::new("example.org", "https://example.org")]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let list = Arc::new(SiteList::new(vec![Site::from_url("example.com")]));
        let snapshot = list.snapshot();

        let writer = Arc::clone(&list);
        std::thread::spawn(move || {
            writer.add("example.org");
        })
        .join()
        .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(list.len(), 2);
    }
}
