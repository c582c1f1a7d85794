use chrono::Utc;
use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const UNKNOWN: &str = "unknown";

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    let runtime_api_version = runtime_api_version(&manifest_dir.join("Cargo.toml"))
        .unwrap_or_else(|| UNKNOWN.to_string());
    let build_time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let git_hash = short_git_hash().unwrap_or_else(|| UNKNOWN.to_string());

    let generated = format!(
        "pub const RUNTIME_API_VERSION: &str = {:?};\n\
         pub const BUILD_TIME: &str = {:?};\n\
         pub const GIT_HASH: &str = {:?};\n",
        runtime_api_version, build_time, git_hash
    );
    fs::write(out_dir.join("version.rs"), generated)?;
    Ok(())
}

/// `[package.metadata] runtime_api_version` from the manifest
fn runtime_api_version(manifest: &Path) -> Option<String> {
    let contents = fs::read_to_string(manifest).ok()?;
    let manifest: toml::Table = contents.parse().ok()?;
    manifest
        .get("package")?
        .get("metadata")?
        .get("runtime_api_version")?
        .as_integer()
        .map(|version| version.to_string())
}

fn short_git_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    Some(hash.trim().to_string())
}
