//! Network preflight
//!
//! Before taking work, the agent checks that the hosts the coordinator
//! advertises can be reached by name from inside a sandbox: either the
//! alias table maps them, or DNS resolves them. Loopback addresses are
//! flagged since inside an isolated sandbox they point at the sandbox itself.

use keel_core::domain::network::{self, HostAliases, HostResolution};
use keel_core::dto::network::NetworkInfo;
use tracing::debug;

/// A host a sandbox would not be able to reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIssue {
    /// Which advertised address (e.g. "clone_base_url")
    pub source: &'static str,
    pub url: String,
    pub reason: String,
}

impl std::fmt::Display for NetworkIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}': {}", self.source, self.url, self.reason)
    }
}

/// Checks every advertised address against the alias table and DNS
pub async fn preflight(info: &NetworkInfo, aliases: &HostAliases) -> Vec<NetworkIssue> {
    let targets = [
        ("advertised_url", info.advertised_url.as_deref()),
        ("clone_base_url", info.clone_base_url.as_deref()),
    ];

    let mut issues = Vec::new();
    for (source, url) in targets {
        let Some(url) = url else { continue };
        if let Some(reason) = check_url(url, aliases).await {
            issues.push(NetworkIssue {
                source,
                url: url.to_string(),
                reason,
            });
        }
    }
    issues
}

async fn check_url(url: &str, aliases: &HostAliases) -> Option<String> {
    let resolution = match network::classify_host(url, aliases) {
        Ok(resolution) => resolution,
        Err(e) => return Some(e.to_string()),
    };

    match resolution {
        HostResolution::Aliased(address) => {
            debug!("{} resolves through alias to {}", url, address);
            None
        }
        HostResolution::Loopback => Some(
            "loopback address is not reachable from an isolated sandbox; add a host alias"
                .to_string(),
        ),
        HostResolution::NeedsDns(host) => {
            let port = match network::host_and_port(url) {
                Ok((_, port)) => port,
                Err(e) => return Some(e.to_string()),
            };
            match tokio::net::lookup_host((host.as_str(), port)).await {
                Ok(mut addrs) => match addrs.next() {
                    Some(_) => None,
                    None => Some(format!("host '{}' resolved to no addresses", host)),
                },
                Err(e) => Some(format!("host '{}' does not resolve: {}", host, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_aliased_hosts_pass() {
        let aliases = HostAliases::parse("git.local=10.0.0.5,keel-coordinator=10.0.0.2").unwrap();
        let info = NetworkInfo {
            advertised_url: Some("http://keel-coordinator:8080".to_string()),
            clone_base_url: Some("http://git.local:3000".to_string()),
        };

        assert!(preflight(&info, &aliases).await.is_empty());
    }

    #[tokio::test]
    async fn test_loopback_is_flagged() {
        let info = NetworkInfo {
            advertised_url: Some("http://127.0.0.1:8080".to_string()),
            clone_base_url: Some("http://localhost:3000".to_string()),
        };

        let issues = preflight(&info, &HostAliases::default()).await;
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].source, "advertised_url");
        assert_eq!(issues[1].source, "clone_base_url");
    }

    #[tokio::test]
    async fn test_aliased_localhost_passes() {
        let aliases = HostAliases::parse("localhost=10.0.0.5").unwrap();
        let info = NetworkInfo {
            advertised_url: None,
            clone_base_url: Some("http://localhost:3000".to_string()),
        };

        assert!(preflight(&info, &aliases).await.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_advertised() {
        assert!(preflight(&NetworkInfo::default(), &HostAliases::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_flagged() {
        let info = NetworkInfo {
            advertised_url: None,
            clone_base_url: Some("http://keel-git.invalid:3000".to_string()),
        };

        let issues = preflight(&info, &HostAliases::default()).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].source, "clone_base_url");
        assert!(issues[0].reason.contains("keel-git.invalid"));
    }
}
