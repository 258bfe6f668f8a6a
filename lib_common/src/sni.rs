//! SNI matcher (C4): classifies TLS server-name-indication hostnames
//! against the server certificate's SANs, and extracts the `flag`/`host`
//! metadata pair.
//!
//! The source encodes this as a pair of case-insensitive regex
//! alternations (one exact, one `*.<suffix>` wildcard). Per the §9
//! REDESIGN FLAG ("An implementation may keep two sets: an exact-match
//! hash set and a suffix-match ordered list"), this reimplements the same
//! classification and `flag`/`host` extraction using two sets instead of
//! compiled regexes.

use std::collections::HashSet;

use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;

/// Outcome of classifying an SNI hostname against the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    /// The SNI exactly matched a `DNS:` SAN entry.
    Exact,
    /// The SNI matched a `*.<suffix>` wildcard SAN entry.
    Wildcard,
    /// Neither set matched.
    None,
}

/// Built once per TLS certificate (lazily, on first connection) and
/// cached for the process lifetime — it is immutable after construction.
#[derive(Debug, Default, Clone)]
pub struct SniMatcher {
    exact: HashSet<String>,
    /// Suffixes from `*.<suffix>` SANs, lowercased, without the `*.`.
    wildcards: Vec<String>,
}

impl SniMatcher {
    /// Builds a matcher from raw `DNS:`-prefixed SAN strings (already
    /// extracted from the certificate, without the `DNS:` prefix).
    pub fn from_dns_sans<I, S>(sans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = HashSet::new();
        let mut wildcards = Vec::new();
        for san in sans {
            let san = san.as_ref().to_ascii_lowercase();
            if let Some(suffix) = san.strip_prefix("*.") {
                wildcards.push(suffix.to_string());
            } else {
                exact.insert(san);
            }
        }
        SniMatcher { exact, wildcards }
    }

    /// Parses a DER-encoded X.509 certificate and extracts its `DNS:` SAN
    /// entries to build a matcher. Non-DNS SAN entries (IP, email, URI)
    /// are ignored.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self, X509Error> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|_| X509Error::InvalidCertificate)?;
        let mut sans = Vec::new();
        for ext in cert.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        sans.push(dns.to_string());
                    }
                }
            }
        }
        Ok(Self::from_dns_sans(sans))
    }

    /// Classifies `sni` (already lowercase expected; this lowercases
    /// defensively) against the exact set, then the wildcard suffixes.
    ///
    /// A wildcard suffix's bare apex (`sni == suffix`, no leading label)
    /// classifies as `Exact`, matching spec property 5 ("`b.example`
    /// matches exact" for SANs `{a.example, *.b.example}`) — only a
    /// non-empty leading label makes it a `Wildcard` match with a `flag`.
    pub fn classify(&self, sni: &str) -> Match {
        let sni = sni.to_ascii_lowercase();
        if self.exact.contains(&sni) || self.wildcards.iter().any(|s| s == &sni) {
            return Match::Exact;
        }
        for suffix in &self.wildcards {
            if is_wildcard_subdomain_match(&sni, suffix) {
                return Match::Wildcard;
            }
        }
        Match::None
    }

    /// Splits `sni` on `.`: if it has more than two labels, the first
    /// label is `flag` and the remaining joined labels are `host`;
    /// otherwise `flag` is empty and `host` is the whole SNI.
    pub fn get_metadata(sni: &str) -> (String, String) {
        let labels: Vec<&str> = sni.split('.').collect();
        if labels.len() > 2 {
            (labels[0].to_string(), labels[1..].join("."))
        } else {
            (String::new(), sni.to_string())
        }
    }
}

/// `sni` matches `*.<suffix>` with a non-empty leading label, restricted
/// to `[a-z0-9_-]*` per spec §3's wildcard SAN definition. The bare apex
/// (`sni == suffix`) is handled separately by `classify` as `Exact`.
fn is_wildcard_subdomain_match(sni: &str, suffix: &str) -> bool {
    let Some(rest) = sni.strip_suffix(suffix) else {
        return false;
    };
    let Some(label) = rest.strip_suffix('.') else {
        return false;
    };
    !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
