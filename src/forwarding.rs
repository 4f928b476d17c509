//! Resolution of the client-facing scheme and host
//!
//! A request can reach the gateway through any number of reverse proxies, so
//! the authority the engine sees is rarely the one the client used. Each
//! request resolves a [`ForwardingContext`] from its headers and the
//! configured custom domain, in this order:
//!
//! 1. the configured custom domain, which short-circuits header inspection
//! 2. an `X-Forwarded-Host` + `X-Forwarded-Proto` pair (both required)
//! 3. the `host=` parameter of an RFC 7239 `Forwarded` header, with the
//!    proto taken from `X-Forwarded-Proto` or defaulting to `https`
//! 4. nothing, in which case URIs are left as the engine built them
//!
//! Header parsing never fails: a malformed or implausible value is the same
//! as an absent one.

use crate::rewrite::{is_valid_authority, is_valid_scheme};
use hyper::HeaderMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const FORWARDED: &str = "forwarded";

/// Proto assumed when a `Forwarded` host arrives without `X-Forwarded-Proto`
pub const DEFAULT_FORWARDED_PROTO: &str = "https";

/// A public domain configured for the whole process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDomain {
    scheme: Option<String>,
    authority: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidCustomDomain {
    #[error("custom domain is empty")]
    Empty,
    #[error("invalid scheme in custom domain: {0}")]
    Scheme(String),
    #[error("invalid authority in custom domain: {0}")]
    Authority(String),
}

impl CustomDomain {
    /// Authority (host and optional port) that replaces the engine's
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Scheme to apply, when the domain was configured as `scheme://host`
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }
}

impl FromStr for CustomDomain {
    type Err = InvalidCustomDomain;

    /// Accepts `host`, `host:port` or `scheme://host[:port]` with an
    /// optional trailing slash.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_suffix('/').unwrap_or(s);
        if s.is_empty() {
            return Err(InvalidCustomDomain::Empty);
        }

        let (scheme, authority) = match s.split_once("://") {
            Some((scheme, authority)) => {
                if !is_valid_scheme(scheme) {
                    return Err(InvalidCustomDomain::Scheme(scheme.to_string()));
                }
                (Some(scheme.to_ascii_lowercase()), authority)
            }
            None => (None, s),
        };

        if !is_valid_authority(authority) {
            return Err(InvalidCustomDomain::Authority(authority.to_string()));
        }

        Ok(Self {
            scheme,
            authority: authority.to_string(),
        })
    }
}

impl fmt::Display for CustomDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scheme {
            Some(scheme) => write!(f, "{}://{}", scheme, self.authority),
            None => f.write_str(&self.authority),
        }
    }
}

/// Forwarding signals for one request. Immutable once resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardingContext {
    forwarded_host: Option<String>,
    forwarded_proto: Option<String>,
    raw_forwarded_header: Option<String>,
    custom_domain: Option<CustomDomain>,
}

impl ForwardingContext {
    /// Context that leaves every URI unchanged
    pub fn identity() -> Self {
        Self::default()
    }

    /// Context carrying only a custom domain
    pub fn from_custom_domain(domain: CustomDomain) -> Self {
        Self {
            custom_domain: Some(domain),
            ..Self::default()
        }
    }

    /// Context carrying an already-resolved host and proto
    pub fn from_forwarded_pair(host: impl Into<String>, proto: impl Into<String>) -> Self {
        Self {
            forwarded_host: Some(host.into()),
            forwarded_proto: Some(proto.into()),
            ..Self::default()
        }
    }

    /// Resolve the context for a request
    pub fn resolve(headers: &HeaderMap, custom_domain: Option<&CustomDomain>) -> Self {
        let raw_forwarded_header = header_str(headers, FORWARDED).map(String::from);

        if let Some(domain) = custom_domain {
            return Self {
                raw_forwarded_header,
                custom_domain: Some(domain.clone()),
                ..Self::default()
            };
        }

        let x_host = header_str(headers, X_FORWARDED_HOST).and_then(first_element);
        let x_proto = header_str(headers, X_FORWARDED_PROTO).and_then(first_element);

        if let (Some(host), Some(proto)) = (x_host, x_proto) {
            if is_valid_authority(host) && is_valid_scheme(proto) {
                return Self {
                    forwarded_host: Some(host.to_string()),
                    forwarded_proto: Some(proto.to_ascii_lowercase()),
                    raw_forwarded_header,
                    custom_domain: None,
                };
            }
            debug!(host, proto, "Ignoring implausible X-Forwarded-Host/Proto pair");
        }

        if let Some(host) = raw_forwarded_header.as_deref().and_then(parse_forwarded_host) {
            if is_valid_authority(&host) {
                let proto = x_proto
                    .filter(|p| is_valid_scheme(p))
                    .map(str::to_ascii_lowercase)
                    .unwrap_or_else(|| DEFAULT_FORWARDED_PROTO.to_string());
                return Self {
                    forwarded_host: Some(host),
                    forwarded_proto: Some(proto),
                    raw_forwarded_header,
                    custom_domain: None,
                };
            }
            debug!(host = %host, "Ignoring implausible Forwarded host");
        }

        Self {
            raw_forwarded_header,
            ..Self::default()
        }
    }

    pub fn forwarded_host(&self) -> Option<&str> {
        self.forwarded_host.as_deref()
    }

    pub fn forwarded_proto(&self) -> Option<&str> {
        self.forwarded_proto.as_deref()
    }

    pub fn raw_forwarded_header(&self) -> Option<&str> {
        self.raw_forwarded_header.as_deref()
    }

    pub fn custom_domain(&self) -> Option<&CustomDomain> {
        self.custom_domain.as_ref()
    }

    /// The resolved (host, proto) pair, if any
    pub fn resolved(&self) -> Option<(&str, &str)> {
        match (&self.forwarded_host, &self.forwarded_proto) {
            (Some(host), Some(proto)) => Some((host, proto)),
            _ => None,
        }
    }

    /// Whether rewriting with this context can change a URI
    pub fn is_identity(&self) -> bool {
        self.custom_domain.is_none() && self.resolved().is_none()
    }
}

/// Extract the `host` parameter from an RFC 7239 `Forwarded` header value.
///
/// Elements are scanned in order (the first is the one closest to the
/// client). Segments without `=`, with an empty value, or with an unknown key
/// are skipped.
pub fn parse_forwarded_host(value: &str) -> Option<String> {
    value.split(',').find_map(|element| {
        element.split(';').find_map(|segment| {
            let (key, raw) = segment.split_once('=')?;
            if !key.trim().eq_ignore_ascii_case("host") {
                return None;
            }
            let value = unquote(raw.trim()).trim();
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        })
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// First element of a comma-separated proxy chain
fn first_element(value: &str) -> Option<&str> {
    value.split(',').next().map(str::trim).filter(|s| !s.is_empty())
}
