//! Cache policies understood by the coordinator and the HTTP collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How cached data may be used to satisfy a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Follow the transport's own caching rules.
    #[default]
    UseProtocolCachePolicy,
    /// Ignore local cached data and load from the origin.
    ReloadIgnoringLocalCacheData,
    /// Ignore local and intermediate caches.
    ReloadIgnoringLocalAndRemoteCacheData,
    /// Use cached data regardless of age, loading only on a miss.
    ReturnCacheDataElseLoad,
    /// Use cached data only; never hit the network.
    ReturnCacheDataDontLoad,
    /// Revalidate cached data with the origin before use.
    ReloadRevalidatingCacheData,
}

impl CachePolicy {
    /// Whether previously cached bytes (or an already displayed image) may be reused.
    #[must_use]
    pub fn can_use_cached_data(self) -> bool {
        match self {
            Self::UseProtocolCachePolicy
            | Self::ReturnCacheDataElseLoad
            | Self::ReturnCacheDataDontLoad => true,
            Self::ReloadIgnoringLocalCacheData
            | Self::ReloadIgnoringLocalAndRemoteCacheData
            | Self::ReloadRevalidatingCacheData => false,
        }
    }

    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UseProtocolCachePolicy => "use_protocol",
            Self::ReloadIgnoringLocalCacheData => "reload_ignoring_local",
            Self::ReloadIgnoringLocalAndRemoteCacheData => "reload_ignoring_all",
            Self::ReturnCacheDataElseLoad => "cache_else_load",
            Self::ReturnCacheDataDontLoad => "cache_only",
            Self::ReloadRevalidatingCacheData => "revalidate",
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "use_protocol" => Ok(Self::UseProtocolCachePolicy),
            "reload_ignoring_local" => Ok(Self::ReloadIgnoringLocalCacheData),
            "reload_ignoring_all" => Ok(Self::ReloadIgnoringLocalAndRemoteCacheData),
            "cache_else_load" => Ok(Self::ReturnCacheDataElseLoad),
            "cache_only" => Ok(Self::ReturnCacheDataDontLoad),
            "revalidate" => Ok(Self::ReloadRevalidatingCacheData),
            _ => Err(format!("invalid cache policy: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_policies_allow_cached_data() {
        assert!(CachePolicy::UseProtocolCachePolicy.can_use_cached_data());
        assert!(CachePolicy::ReturnCacheDataElseLoad.can_use_cached_data());
        assert!(CachePolicy::ReturnCacheDataDontLoad.can_use_cached_data());
    }

    #[test]
    fn test_reload_policies_forbid_cached_data() {
        assert!(!CachePolicy::ReloadIgnoringLocalCacheData.can_use_cached_data());
        assert!(!CachePolicy::ReloadIgnoringLocalAndRemoteCacheData.can_use_cached_data());
        assert!(!CachePolicy::ReloadRevalidatingCacheData.can_use_cached_data());
    }

    #[test]
    fn test_cache_policy_labels_parse_back() {
        let policy: CachePolicy = "cache_only".parse().unwrap();
        assert_eq!(policy, CachePolicy::ReturnCacheDataDontLoad);
        assert_eq!(policy.to_string(), "cache_only");
        assert!("sometimes".parse::<CachePolicy>().is_err());
    }
}
