//! Scheme and authority rewriting for management URIs
//!
//! The engine builds management URIs against the address it was reached on.
//! Rewriting swaps the scheme and authority for the client-facing ones and
//! keeps everything after the authority byte-for-byte, so signed query
//! parameters such as `code=` survive untouched.

use crate::forwarding::ForwardingContext;
use hyper::http::uri::Authority;
use std::str::FromStr;
use tracing::debug;

/// An absolute URI split into its components, borrowing from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedUri<'a> {
    pub scheme: &'a str,
    pub authority: &'a str,
    /// Path, query and fragment exactly as they appeared
    pub rest: &'a str,
}

impl<'a> ParsedUri<'a> {
    /// Split `scheme://authority[/path][?query][#fragment]`.
    ///
    /// Returns `None` for relative references, empty or invalid authorities,
    /// and invalid schemes.
    pub fn parse(uri: &'a str) -> Option<Self> {
        let (scheme, after) = uri.split_once("://")?;
        if !is_valid_scheme(scheme) {
            return None;
        }

        let end = after.find(['/', '?', '#']).unwrap_or(after.len());
        let (authority, rest) = after.split_at(end);
        if !is_valid_authority(authority) {
            return None;
        }

        Some(Self {
            scheme,
            authority,
            rest,
        })
    }

    pub fn path(&self) -> &'a str {
        let end = self.rest.find(['?', '#']).unwrap_or(self.rest.len());
        &self.rest[..end]
    }

    pub fn query(&self) -> Option<&'a str> {
        let without_fragment = self.rest.split('#').next().unwrap_or("");
        without_fragment.split_once('?').map(|(_, q)| q)
    }

    pub fn fragment(&self) -> Option<&'a str> {
        self.rest.split_once('#').map(|(_, f)| f)
    }
}

/// Rewrite the scheme and authority of `uri` for the given context.
///
/// A custom domain replaces the authority and keeps the original scheme
/// unless the domain was configured with one. A resolved forwarded pair
/// replaces both. Anything else, including a URI that does not parse, comes
/// back unchanged.
pub fn rewrite(uri: &str, ctx: &ForwardingContext) -> String {
    if ctx.is_identity() {
        return uri.to_string();
    }

    let Some(parsed) = ParsedUri::parse(uri) else {
        debug!(uri, "Leaving unparseable management URI unchanged");
        return uri.to_string();
    };

    let (scheme, authority) = match (ctx.custom_domain(), ctx.resolved()) {
        (Some(domain), _) => (domain.scheme().unwrap_or(parsed.scheme), domain.authority()),
        (None, Some((host, proto))) => (proto, host),
        (None, None) => return uri.to_string(),
    };

    format!("{}://{}{}", scheme, authority, parsed.rest)
}

/// RFC 3986 scheme: a letter followed by letters, digits, `+`, `-` or `.`
pub fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => chars
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

/// A non-empty `host[:port]` that is a valid URI authority on its own
pub fn is_valid_authority(authority: &str) -> bool {
    !authority.is_empty()
        && !authority.contains(['/', '?', '#'])
        && Authority::from_str(authority).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarding::CustomDomain;

    const URIS: &[&str] = &[
        "http://internal.host/api/status/abc?code=x",
        "http://localhost:7071/runtime/webhooks/durabletask/instances/abc?taskHub=Hub&connection=Storage&code=k%3D%3D",
        "http://localhost:7071/runtime/webhooks/durabletask/instances/abc/raiseEvent/{eventName}?taskHub=Hub",
        "http://10.0.0.4:80/runtime/webhooks/durabletask/instances/abc/terminate?reason={text}&code=x",
        "http://internal.host",
        "http://internal.host?only=query",
        "http://internal.host/path#frag?not-query",
    ];

    fn contexts() -> Vec<ForwardingContext> {
        vec![
            ForwardingContext::from_custom_domain("example.com".parse().unwrap()),
            ForwardingContext::from_custom_domain("https://example.com:8443".parse().unwrap()),
            ForwardingContext::from_forwarded_pair("pub.example.org", "https"),
        ]
    }

    #[test]
    fn test_parse_components() {
        let parsed = ParsedUri::parse("https://host:8080/a/b?x=1&y=2#top").unwrap();
        assert_eq!(parsed.scheme, "https");
        assert_eq!(parsed.authority, "host:8080");
        assert_eq!(parsed.path(), "/a/b");
        assert_eq!(parsed.query(), Some("x=1&y=2"));
        assert_eq!(parsed.fragment(), Some("top"));

        let bare = ParsedUri::parse("http://host").unwrap();
        assert_eq!(bare.path(), "");
        assert_eq!(bare.query(), None);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ParsedUri::parse("/relative/path").is_none());
        assert!(ParsedUri::parse("http:///no-authority").is_none());
        assert!(ParsedUri::parse("ht tp://host/").is_none());
        assert!(ParsedUri::parse("http://bad host/").is_none());
        assert!(ParsedUri::parse("").is_none());
    }

    #[test]
    fn test_rewrite_preserves_path_and_query() {
        for ctx in contexts() {
            for uri in URIS {
                let rewritten = rewrite(uri, &ctx);
                let before = ParsedUri::parse(uri).unwrap();
                let after = ParsedUri::parse(&rewritten).unwrap();
                assert_eq!(before.rest, after.rest, "{} -> {}", uri, rewritten);
            }
        }
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        for ctx in contexts() {
            for uri in URIS {
                let once = rewrite(uri, &ctx);
                assert_eq!(rewrite(&once, &ctx), once);
            }
        }
    }

    #[test]
    fn test_identity_context_leaves_uri_unchanged() {
        let ctx = ForwardingContext::identity();
        for uri in URIS {
            assert_eq!(rewrite(uri, &ctx), *uri);
        }
    }

    #[test]
    fn test_custom_domain_replaces_authority_only() {
        let ctx = ForwardingContext::from_custom_domain("example.com".parse().unwrap());
        let rewritten = rewrite("http://internal.host/api/status/abc?code=x", &ctx);
        assert_eq!(rewritten, "http://example.com/api/status/abc?code=x");

        let parsed = ParsedUri::parse(&rewritten).unwrap();
        assert_eq!(parsed.authority, "example.com");
        assert_eq!(parsed.path(), "/api/status/abc");
        assert_eq!(parsed.query(), Some("code=x"));
    }

    #[test]
    fn test_custom_domain_with_scheme_replaces_both() {
        let domain: CustomDomain = "https://example.com".parse().unwrap();
        let ctx = ForwardingContext::from_custom_domain(domain);
        assert_eq!(
            rewrite("http://internal.host/api/status/abc?code=x", &ctx),
            "https://example.com/api/status/abc?code=x"
        );
    }

    #[test]
    fn test_forwarded_pair_replaces_scheme_and_authority() {
        let ctx = ForwardingContext::from_forwarded_pair("pub.example.org", "https");
        assert_eq!(
            rewrite("http://10.0.0.4:7071/runtime/webhooks/durabletask/instances/abc?code=x", &ctx),
            "https://pub.example.org/runtime/webhooks/durabletask/instances/abc?code=x"
        );
    }

    #[test]
    fn test_unparseable_uri_returned_as_is() {
        let ctx = ForwardingContext::from_forwarded_pair("pub.example.org", "https");
        for uri in ["not a uri", "/api/status/abc", "http://", "://host/x"] {
            assert_eq!(rewrite(uri, &ctx), uri);
        }
    }

    #[test]
    fn test_scheme_validation() {
        assert!(is_valid_scheme("https"));
        assert!(is_valid_scheme("coap+tcp"));
        assert!(!is_valid_scheme(""));
        assert!(!is_valid_scheme("1http"));
        assert!(!is_valid_scheme("ht tp"));
    }

    #[test]
    fn test_authority_validation() {
        assert!(is_valid_authority("example.com"));
        assert!(is_valid_authority("example.com:8443"));
        assert!(is_valid_authority("[::1]:7071"));
        assert!(!is_valid_authority(""));
        assert!(!is_valid_authority("example.com/path"));
        assert!(!is_valid_authority("exa mple.com"));
    }
}
