use std::sync::OnceLock;

use regex::Regex;

pub const MAX_ADDRESS_LEN: usize = 320;
pub const MAX_LOCAL_LEN: usize = 64;
pub const MAX_DOMAIN_LEN: usize = 255;

const ADDRESS_PATTERN: &str = concat!(
    r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@",
    r"[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?",
    r"(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
);

fn address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ADDRESS_PATTERN).expect("address pattern is valid"))
}

/// A syntactically valid `local@domain` address. The domain is lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailAddress {
    pub local: String,
    pub domain: String,
}

impl MailAddress {
    pub fn as_string(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }
}

/// Syntax check with RFC length bounds. Surrounding whitespace is ignored.
pub fn parse_address(raw: &str) -> Option<MailAddress> {
    let candidate = raw.trim();
    if candidate.len() > MAX_ADDRESS_LEN || !address_regex().is_match(candidate) {
        return None;
    }

    let (local, domain) = candidate.rsplit_once('@')?;
    if local.is_empty() || local.len() > MAX_LOCAL_LEN {
        return None;
    }
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN || !domain.contains('.') {
        return None;
    }

    Some(MailAddress {
        local: local.to_string(),
        domain: domain.to_ascii_lowercase(),
    })
}
