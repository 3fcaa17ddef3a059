//! Build script for nxt-ra
//!
//! Embeds build identification reported by `/health` and the startup log:
//! short git hash, build timestamp and cargo profile.

use std::process::Command;

fn main() {
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let build_timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=NXT_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=NXT_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=NXT_BUILD_PROFILE={}", profile);
}
