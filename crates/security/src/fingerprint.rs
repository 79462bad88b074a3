//! Caller fingerprinting: a keyed, non-reversible identity for anonymous callers.
//!
//! The fingerprint is the only join key for rate-limit, cooldown and behaviour
//! state. It is recomputed on every request from transport metadata and never
//! stored verbatim anywhere except as a map key.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Transport-level signals the gateway extracts from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSignals {
    /// Socket peer address
    pub ip: String,
    pub user_agent: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub accept: String,
    /// Raw `X-Forwarded-For` header, if any
    pub forwarded_for: Option<String>,
}

impl RequestSignals {
    /// The address used for fingerprinting.
    ///
    /// `X-Forwarded-For` is client-controlled, so its first hop is only used
    /// when the deployment sits behind a trusted proxy.
    pub fn client_ip(&self, trust_forwarded: bool) -> &str {
        if trust_forwarded {
            if let Some(first) = self
                .forwarded_for
                .as_deref()
                .and_then(|h| h.split(',').next())
                .map(str::trim)
                .filter(|h| !h.is_empty())
            {
                return first;
            }
        }
        &self.ip
    }
}

/// Opaque caller identity (lowercase hex HMAC-SHA256).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix used in logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Derives fingerprints with a server-side secret.
pub struct Fingerprinter {
    secret: Vec<u8>,
    trust_forwarded: bool,
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("secret", &"[REDACTED]")
            .field("trust_forwarded", &self.trust_forwarded)
            .finish()
    }
}

impl Fingerprinter {
    pub fn new(secret: impl AsRef<[u8]>, trust_forwarded: bool) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            trust_forwarded,
        }
    }

    /// Use a random 32-byte secret. Fingerprints then only live as long as the process.
    pub fn with_random_secret(trust_forwarded: bool) -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill(&mut secret[..]);
        Self::new(secret, trust_forwarded)
    }

    /// Configured secret if present, random otherwise.
    pub fn from_config(secret: Option<&str>, trust_forwarded: bool) -> Self {
        match secret {
            Some(s) if !s.is_empty() => Self::new(s, trust_forwarded),
            _ => {
                tracing::info!("No fingerprint secret configured, generated a per-process secret");
                Self::with_random_secret(trust_forwarded)
            }
        }
    }

    pub fn derive(&self, signals: &RequestSignals) -> Fingerprint {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        for part in [
            signals.client_ip(self.trust_forwarded),
            signals.user_agent.as_str(),
            signals.accept_language.as_str(),
            signals.accept_encoding.as_str(),
        ] {
            mac.update(part.as_bytes());
            // Separator so ("ab","c") and ("a","bc") differ
            mac.update(&[0x1f]);
        }
        Fingerprint(hex::encode(mac.finalize().into_bytes()))
    }
}

const AUTOMATION_AGENTS: &[&str] = &[
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpx",
    "go-http-client",
    "okhttp",
    "java/",
    "libwww-perl",
    "scrapy",
    "headless",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
    "postman",
    "insomnia",
    "bot",
    "crawler",
    "spider",
];

/// Returns the marker that identifies an automation client, if any.
pub fn automation_marker(signals: &RequestSignals) -> Option<&'static str> {
    let ua = signals.user_agent.trim();
    if ua.is_empty() {
        return Some("empty user-agent");
    }
    let lower = ua.to_ascii_lowercase();
    AUTOMATION_AGENTS
        .iter()
        .copied()
        .find(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> RequestSignals {
        RequestSignals {
            ip: "203.0.113.7".into(),
            user_agent: "Mozilla/5.0 (Macintosh) Safari/605.1".into(),
            accept_language: "en-GB,en;q=0.9".into(),
            accept_encoding: "gzip, br".into(),
            accept: "text/event-stream".into(),
            forwarded_for: None,
        }
    }

    #[test]
    fn derive_is_deterministic() {
        let fp = Fingerprinter::new("secret", false);
        assert_eq!(fp.derive(&signals()), fp.derive(&signals()));
        assert_eq!(fp.derive(&signals()).as_str().len(), 64);
    }

    #[test]
    fn each_component_changes_the_fingerprint() {
        let fp = Fingerprinter::new("secret", false);
        let base = fp.derive(&signals());

        let mut s = signals();
        s.ip = "203.0.113.8".into();
        assert_ne!(fp.derive(&s), base);

        let mut s = signals();
        s.user_agent.push('!');
        assert_ne!(fp.derive(&s), base);

        let mut s = signals();
        s.accept_language = "de".into();
        assert_ne!(fp.derive(&s), base);

        let mut s = signals();
        s.accept_encoding = "identity".into();
        assert_ne!(fp.derive(&s), base);
    }

    #[test]
    fn different_secrets_give_different_fingerprints() {
        let a = Fingerprinter::new("one", false).derive(&signals());
        let b = Fingerprinter::new("two", false).derive(&signals());
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_does_not_contain_raw_ip() {
        let fp = Fingerprinter::new("secret", false).derive(&signals());
        assert!(!fp.as_str().contains("203.0.113.7"));
    }

    #[test]
    fn forwarded_for_only_used_when_trusted() {
        let mut s = signals();
        s.forwarded_for = Some(" 198.51.100.1 , 10.0.0.1".into());
        assert_eq!(s.client_ip(false), "203.0.113.7");
        assert_eq!(s.client_ip(true), "198.51.100.1");

        s.forwarded_for = Some("".into());
        assert_eq!(s.client_ip(true), "203.0.113.7");
    }

    #[test]
    fn short_is_twelve_chars() {
        let fp = Fingerprinter::new("secret", false).derive(&signals());
        assert_eq!(fp.short().len(), 12);
        assert!(fp.as_str().starts_with(fp.short()));
    }

    #[test]
    fn automation_agents_are_flagged() {
        let mut s = signals();
        assert_eq!(automation_marker(&s), None);

        s.user_agent = "curl/8.4.0".into();
        assert_eq!(automation_marker(&s), Some("curl"));

        s.user_agent = "Mozilla/5.0 HeadlessChrome/120".into();
        assert_eq!(automation_marker(&s), Some("headless"));

        s.user_agent = "  ".into();
        assert_eq!(automation_marker(&s), Some("empty user-agent"));
    }

    #[test]
    fn debug_hides_secret() {
        let fp = Fingerprinter::new("hunter2", true);
        let debug = format!("{fp:?}");
        assert!(!debug.contains("hunter2"));
    }
}
