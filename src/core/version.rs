//! Build metadata generated by `build.rs`

include!(concat!(env!("OUT_DIR"), "/version.rs"));

/// Runtime API version from `[package.metadata]`, falling back to the
/// release it was introduced with
pub fn get_api_version() -> u32 {
    RUNTIME_API_VERSION.parse().unwrap_or(20260301)
}

/// Build time (UTC)
pub fn build_time() -> &'static str {
    BUILD_TIME
}

/// Short git hash, or "unknown" outside a checkout
pub fn git_hash() -> &'static str {
    GIT_HASH
}

/// Version detail printed by `--version`
pub fn long_version() -> String {
    format!(
        "{} (api {}, {} built {})",
        env!("CARGO_PKG_VERSION"),
        get_api_version(),
        git_hash(),
        build_time()
    )
}

/// [`long_version`] prefixed with the crate name, logged at startup
pub fn version_banner() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), long_version())
}
