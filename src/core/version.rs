//! Build metadata generated by the build script.
//! The REST api-version is pinned in `[package.metadata]` of Cargo.toml.

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Service Bus REST api-version sent on every request
pub fn servicebus_api_version() -> &'static str {
    SERVICEBUS_API_VERSION
}

/// Build time string from the build script (UTC)
pub fn build_time() -> &'static str {
    BUILD_TIME
}

/// Short git hash captured by the build script
pub fn git_hash() -> &'static str {
    GIT_HASH
}

/// `hivequeue/<version> (<git hash>)`, used as the HTTP User-Agent
pub fn user_agent() -> String {
    format!("hivequeue/{} ({})", CRATE_VERSION, git_hash())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_crate_version() {
        assert!(user_agent().starts_with(&format!("hivequeue/{}", env!("CARGO_PKG_VERSION"))));
        assert!(user_agent().ends_with(&format!("({})", git_hash())));
    }

    #[test]
    fn test_api_version_is_date_shaped() {
        let version = servicebus_api_version();
        assert_eq!(version.len(), 7);
        assert_eq!(&version[4..5], "-");
    }

    #[test]
    fn test_build_time_is_a_utc_timestamp() {
        let built = build_time();
        assert!(built.ends_with(" UTC"), "got: {}", built);
        assert!(chrono::NaiveDateTime::parse_from_str(
            built.trim_end_matches(" UTC"),
            "%Y-%m-%d %H:%M:%S"
        )
        .is_ok());
    }
}
