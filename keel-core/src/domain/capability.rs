//! Capability tags
//!
//! A capability tag names a resource or privilege. Jobs list the tags they
//! require; agents advertise the tags they provide. A job is eligible for an
//! agent when its required tags are a subset of the agent's tags.
//!
//! A few tags carry meaning for the sandbox:
//! - `privileged`: the sandbox gets the host isolation socket (nested containers)
//! - `volume:<name>`: the agent-side volume `<name>` is mounted into the sandbox
//! - `container`: the agent runs sandboxes in a container runtime

use std::collections::BTreeSet;

/// Grants the host isolation control socket to the job's sandbox
pub const PRIVILEGED: &str = "privileged";

/// Prefix of volume mount tags (`volume:cache`)
pub const VOLUME_PREFIX: &str = "volume:";

/// Advertised by agents whose sandboxes are containers
pub const CONTAINER: &str = "container";

pub const MAX_TAG_LENGTH: usize = 128;

/// Checks the tag grammar: `[a-z0-9][a-z0-9._:/-]*`, at most 128 characters
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    tag.len() <= MAX_TAG_LENGTH
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | ':' | '/' | '-')
        })
        && !tag.ends_with(':')
}

/// Returns true if every required tag is provided
pub fn satisfies(provided: &[String], required: &[String]) -> bool {
    required.iter().all(|tag| provided.contains(tag))
}

/// Extracts the volume name from a `volume:<name>` tag
pub fn volume_name(tag: &str) -> Option<&str> {
    tag.strip_prefix(VOLUME_PREFIX).filter(|name| !name.is_empty())
}

pub fn volume_tag(name: &str) -> String {
    format!("{}{}", VOLUME_PREFIX, name)
}

/// Trims, deduplicates and sorts a tag list
pub fn normalize<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_tags() {
        assert!(is_valid_tag("privileged"));
        assert!(is_valid_tag("volume:cache"));
        assert!(is_valid_tag("os/linux"));
        assert!(is_valid_tag("arch.x86_64"));
    }

    #[test]
    fn test_invalid_tags() {
        assert!(!is_valid_tag(""));
        assert!(!is_valid_tag("Privileged"));
        assert!(!is_valid_tag("-leading"));
        assert!(!is_valid_tag("has space"));
        assert!(!is_valid_tag("volume:"));
        assert!(!is_valid_tag(&"a".repeat(MAX_TAG_LENGTH + 1)));
    }

    #[test]
    fn test_subset_matching() {
        let agent = tags(&["container", "privileged", "volume:cache"]);
        assert!(satisfies(&agent, &[]));
        assert!(satisfies(&agent, &tags(&["privileged"])));
        assert!(satisfies(&agent, &tags(&["volume:cache", "container"])));
        assert!(!satisfies(&agent, &tags(&["volume:secrets"])));
        assert!(!satisfies(&[], &tags(&["privileged"])));
    }

    #[test]
    fn test_volume_name() {
        assert_eq!(volume_name("volume:cache"), Some("cache"));
        assert_eq!(volume_name("volume:"), None);
        assert_eq!(volume_name("privileged"), None);
        assert_eq!(volume_tag("cache"), "volume:cache");
    }

    #[test]
    fn test_normalize() {
        let normalized = normalize([" b", "a", "b", ""]);
        assert_eq!(normalized, tags(&["a", "b"]));
    }
}
