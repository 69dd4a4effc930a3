//! Routing recipient selection.
//!
//! Entries are addressed to `<user_key>@<routing domain>`. The token of the
//! first To address on the routing domain wins; Cc is only consulted when
//! To has none. Bcc is never searched.

use regex::Regex;

use crate::config::IngestConfig;
use crate::pipeline::types::Address;

/// Picks the meaningful routing recipient out of the To/Cc lists.
#[derive(Debug, Clone)]
pub struct RecipientResolver {
    host_pattern: Option<Regex>,
    ai_reply_host: String,
}

impl RecipientResolver {
    /// Build the host matcher for the configured routing domain.
    pub fn new(config: &IngestConfig) -> Self {
        let subdomains = config
            .routing_subdomains
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        let domain = regex::escape(&config.main_domain);
        let pattern = if subdomains.is_empty() {
            format!(r"(?i)^{domain}$")
        } else {
            format!(r"(?i)^(?:{subdomains})?\.?{domain}$")
        };

        Self {
            host_pattern: Regex::new(&pattern).ok(),
            ai_reply_host: config.ai_reply_host(),
        }
    }

    /// Whether `host` is the routing domain or one of its routing subdomains.
    pub fn is_routing_host(&self, host: &str) -> bool {
        self.host_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(host))
    }

    /// Token of the first routing address in To, else in Cc.
    pub fn pick(&self, to: &[Address], cc: &[Address]) -> Option<String> {
        self.first_routing(to)
            .or_else(|| self.first_routing(cc))
            .map(|addr| addr.token.clone())
    }

    /// Whether any recipient is on the AI-reply routing host.
    pub fn is_ai_reply(&self, to: &[Address], cc: &[Address], bcc: &[Address]) -> bool {
        to.iter()
            .chain(cc)
            .chain(bcc)
            .any(|addr| addr.host.eq_ignore_ascii_case(&self.ai_reply_host))
    }

    fn first_routing<'a>(&self, addrs: &'a [Address]) -> Option<&'a Address> {
        addrs.iter().find(|addr| self.is_routing_host(&addr.host))
    }
}
