use std::collections::HashMap;

use reqwest::Url;

/// Turns the name a device advertises into the URL it stands for
#[derive(Clone, Debug, Default)]
pub struct UrlResolver {
    names: HashMap<String, String>,
}

impl UrlResolver {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    /// Names that already look like a web address are used as-is, getting an
    /// `http://` scheme if they don't have one. Anything else has to be in
    /// the name table.
    pub fn resolve(&self, raw_name: &str) -> Option<String> {
        let name = raw_name.trim();

        if is_web_url(name) {
            if has_http_scheme(name) {
                return Some(name.to_string());
            }
            return Some(format!("http://{}", name));
        }

        self.names.get(name).cloned()
    }
}

fn has_http_scheme(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_web_url(name: &str) -> bool {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return false;
    }

    let candidate = if has_http_scheme(name) {
        name.to_string()
    } else if name.contains("://") {
        return false;
    } else {
        format!("http://{}", name)
    };

    let Ok(url) = Url::parse(&candidate) else {
        return false;
    };

    match url.domain() {
        // Needs at least one dot and an alphabetic top level label
        Some(domain) => match domain.trim_end_matches('.').rsplit_once('.') {
            Some((rest, tld)) => {
                !rest.is_empty() && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
            }
            None => false,
        },
        // IP addresses
        None => url.host_str().is_some(),
    }
}

/// Icons given as a path are relative to the site. The path replaces the
/// site URL's path; when the site URL is unusable `fallback_base` is used.
pub fn resolve_icon_url(icon_url: &str, site_url: &str, fallback_base: &str) -> String {
    if icon_url.starts_with("http") {
        return icon_url.to_string();
    }

    let base = Url::parse(site_url).or_else(|_| Url::parse(fallback_base));
    match base {
        Ok(mut base) if !base.cannot_be_a_base() => {
            base.set_path(icon_url);
            base.to_string()
        }
        _ => icon_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> UrlResolver {
        UrlResolver::new(
            [
                ("OLP425-ECF5".to_string(), "http://z3.ca/light".to_string()),
                ("OLP425-ECB5".to_string(), "http://z3.ca/1".to_string()),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_adds_missing_scheme() {
        assert_eq!(resolver().resolve("z3.ca/1").as_deref(), Some("http://z3.ca/1"));
        assert_eq!(
            resolver().resolve("jenson.org/iot/3").as_deref(),
            Some("http://jenson.org/iot/3")
        );
    }

    #[test]
    fn test_keeps_existing_scheme() {
        assert_eq!(
            resolver().resolve("http://z3.ca/2").as_deref(),
            Some("http://z3.ca/2")
        );
        assert_eq!(
            resolver().resolve("https://example.com").as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn test_name_table() {
        assert_eq!(
            resolver().resolve("OLP425-ECF5").as_deref(),
            Some("http://z3.ca/light")
        );
        assert_eq!(resolver().resolve("OLP999-XXXX"), None);
    }

    #[test]
    fn test_not_urls() {
        let resolver = resolver();
        assert_eq!(resolver.resolve(""), None);
        assert_eq!(resolver.resolve("No device name"), None);
        assert_eq!(resolver.resolve("localhost"), None);
        assert_eq!(resolver.resolve("ftp://z3.ca/1"), None);
        assert_eq!(resolver.resolve("Beacon.1"), None);
    }

    #[test]
    fn test_ip_addresses() {
        assert_eq!(
            resolver().resolve("192.168.1.20/status").as_deref(),
            Some("http://192.168.1.20/status")
        );
    }

    #[test]
    fn test_icon_url() {
        assert_eq!(
            resolve_icon_url("/favicon.ico", "http://z3.ca/1", "http://z3.ca/1"),
            "http://z3.ca/favicon.ico"
        );
        assert_eq!(
            resolve_icon_url("https://cdn.z3.ca/icon.png", "http://z3.ca/1", "http://z3.ca/1"),
            "https://cdn.z3.ca/icon.png"
        );
        assert_eq!(
            resolve_icon_url("/favicon.ico", "Unknown url", "http://jenson.org/iot/1"),
            "http://jenson.org/favicon.ico"
        );
        assert_eq!(
            resolve_icon_url("/favicon.ico", "Unknown url", "also not a url"),
            "/favicon.ico"
        );
    }
}
