//! User-Agent string sent by [`HttpNetwork`](crate::network::HttpNetwork).

/// Project URL included in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/fierce/imageloader";

/// Default User-Agent for image requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("imageloader/{version} (+{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ua_carries_version_and_project_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL: {ua}");
        assert_eq!(
            ua.strip_prefix("imageloader/")
                .and_then(|s| s.split(' ').next()),
            Some(env!("CARGO_PKG_VERSION")),
            "UA must contain crate version: {ua}"
        );
    }
}
