//! Network fabric helpers
//!
//! Agents and their sandboxes must reach the coordinator and the repository
//! snapshot source by stable names, whatever network they run in. The
//! coordinator advertises its addresses; each agent carries a host alias table
//! that is injected into sandbox name resolution and used to rewrite URLs so
//! that the agent and its sandboxes agree on the same names.

use std::collections::BTreeMap;
use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL '{0}' has no host")]
    MissingHost(String),

    #[error("invalid host alias '{0}', expected host=address")]
    InvalidAlias(String),

    #[error("repository path must not be empty")]
    EmptyRepository,
}

fn parse_url(raw: &str) -> Result<Url, NetworkError> {
    Url::parse(raw).map_err(|e| NetworkError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Host alias table (`host=address` pairs)
///
/// An address may be an IP, which is added as a static host entry in the
/// sandbox, or another host name, which replaces the host in rewritten URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAliases(BTreeMap<String, String>);

impl HostAliases {
    /// Parses a comma separated list: `git.local=10.0.0.5,coordinator=keel-coordinator`
    pub fn parse(raw: &str) -> Result<Self, NetworkError> {
        let mut aliases = BTreeMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (host, address) = pair
                .split_once('=')
                .map(|(h, a)| (h.trim(), a.trim()))
                .filter(|(h, a)| !h.is_empty() && !a.is_empty())
                .ok_or_else(|| NetworkError::InvalidAlias(pair.to_string()))?;
            aliases.insert(host.to_ascii_lowercase(), address.to_string());
        }
        Ok(Self(aliases))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, host: &str) -> Option<&str> {
        self.0.get(&host.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(h, a)| (h.as_str(), a.as_str()))
    }

    /// Static host entries (`host:ip`) for aliases that point at an IP
    pub fn host_entries(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, address)| address.parse::<IpAddr>().is_ok())
            .map(|(host, address)| format!("{}:{}", host, address))
            .collect()
    }

    /// Rewrites the URL host when it is aliased to another host name.
    ///
    /// IP aliases leave the URL unchanged since the sandbox resolves the
    /// name through its host entries.
    pub fn rewrite_url(&self, raw: &str) -> Result<String, NetworkError> {
        let mut url = parse_url(raw)?;
        let host = url
            .host_str()
            .ok_or_else(|| NetworkError::MissingHost(raw.to_string()))?
            .to_string();

        match self.get(&host) {
            Some(target) if target.parse::<IpAddr>().is_err() => {
                url.set_host(Some(target)).map_err(|e| NetworkError::InvalidUrl {
                    url: raw.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(url.to_string())
            }
            _ => Ok(raw.to_string()),
        }
    }
}

/// Builds `{base}/{repository}.git`
pub fn clone_url_for(base: &str, repository: &str) -> Result<String, NetworkError> {
    let repository = repository.trim().trim_matches('/');
    if repository.is_empty() {
        return Err(NetworkError::EmptyRepository);
    }
    let repository = repository.strip_suffix(".git").unwrap_or(repository);

    let base = parse_url(base)?;
    if base.host_str().is_none() {
        return Err(NetworkError::MissingHost(base.to_string()));
    }
    let joined = format!("{}/{}.git", base.as_str().trim_end_matches('/'), repository);
    parse_url(&joined).map(|url| url.to_string())
}

/// How a sandbox can resolve a host it needs to reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResolution {
    /// The alias table maps the host to this address
    Aliased(String),
    /// A loopback address, which inside an isolated network is the sandbox itself
    Loopback,
    /// Must be resolvable through DNS
    NeedsDns(String),
}

/// Classifies the host of `raw` against the alias table
pub fn classify_host(raw: &str, aliases: &HostAliases) -> Result<HostResolution, NetworkError> {
    let url = parse_url(raw)?;
    let host = url
        .host()
        .ok_or_else(|| NetworkError::MissingHost(raw.to_string()))?;

    let name = match host {
        Host::Ipv4(ip) if ip.is_loopback() => return Ok(HostResolution::Loopback),
        Host::Ipv6(ip) if ip.is_loopback() => return Ok(HostResolution::Loopback),
        Host::Ipv4(ip) => return Ok(HostResolution::Aliased(ip.to_string())),
        Host::Ipv6(ip) => return Ok(HostResolution::Aliased(ip.to_string())),
        Host::Domain(name) => name.to_string(),
    };

    if let Some(address) = aliases.get(&name) {
        return Ok(HostResolution::Aliased(address.to_string()));
    }
    if name.eq_ignore_ascii_case("localhost") {
        return Ok(HostResolution::Loopback);
    }
    Ok(HostResolution::NeedsDns(name))
}

/// Host and port of a URL, for name lookups
pub fn host_and_port(raw: &str) -> Result<(String, u16), NetworkError> {
    let url = parse_url(raw)?;
    let host = url
        .host_str()
        .ok_or_else(|| NetworkError::MissingHost(raw.to_string()))?
        .trim_matches(|c| c == '[' || c == ']')
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        let aliases = HostAliases::parse("git.local=10.0.0.5, Coordinator=keel-coordinator").unwrap();
        assert_eq!(aliases.get("git.local"), Some("10.0.0.5"));
        assert_eq!(aliases.get("coordinator"), Some("keel-coordinator"));
        assert!(HostAliases::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(HostAliases::parse("no-equals").is_err());
        assert!(HostAliases::parse("=10.0.0.1").is_err());
        assert!(HostAliases::parse("host=").is_err());
    }

    #[test]
    fn test_host_entries_only_for_ips() {
        let aliases = HostAliases::parse("git.local=10.0.0.5,ci=keel-coordinator").unwrap();
        assert_eq!(aliases.host_entries(), vec!["git.local:10.0.0.5".to_string()]);
    }

    #[test]
    fn test_rewrite_to_hostname() {
        let aliases = HostAliases::parse("localhost=host.containers.internal").unwrap();
        let rewritten = aliases
            .rewrite_url("http://localhost:3000/team/service.git")
            .unwrap();
        assert_eq!(rewritten, "http://host.containers.internal:3000/team/service.git");
    }

    #[test]
    fn test_rewrite_leaves_ip_alias_and_unknown_hosts() {
        let aliases = HostAliases::parse("git.local=10.0.0.5").unwrap();
        let url = "http://git.local/team/service.git";
        assert_eq!(aliases.rewrite_url(url).unwrap(), url);
        let url = "https://example.com/a.git";
        assert_eq!(aliases.rewrite_url(url).unwrap(), url);
    }

    #[test]
    fn test_clone_url_for() {
        assert_eq!(
            clone_url_for("http://git.local:3000/", "/team/service").unwrap(),
            "http://git.local:3000/team/service.git"
        );
        assert_eq!(
            clone_url_for("http://git.local/scm", "team/service.git").unwrap(),
            "http://git.local/scm/team/service.git"
        );
        assert_eq!(
            clone_url_for("http://git.local", " "),
            Err(NetworkError::EmptyRepository)
        );
        assert!(clone_url_for("not a url", "team/service").is_err());
    }

    #[test]
    fn test_classify_host() {
        let aliases = HostAliases::parse("git.local=10.0.0.5").unwrap();
        assert_eq!(
            classify_host("http://git.local/x.git", &aliases).unwrap(),
            HostResolution::Aliased("10.0.0.5".to_string())
        );
        assert_eq!(
            classify_host("http://127.0.0.1:8080", &aliases).unwrap(),
            HostResolution::Loopback
        );
        assert_eq!(
            classify_host("http://localhost:8080", &aliases).unwrap(),
            HostResolution::Loopback
        );
        assert_eq!(
            classify_host("http://scm.example.com", &aliases).unwrap(),
            HostResolution::NeedsDns("scm.example.com".to_string())
        );
    }

    #[test]
    fn test_host_and_port() {
        assert_eq!(
            host_and_port("http://keel:8080/api").unwrap(),
            ("keel".to_string(), 8080)
        );
        assert_eq!(
            host_and_port("https://keel.example.com").unwrap(),
            ("keel.example.com".to_string(), 443)
        );
    }
}
