//! Stamps build metadata reported by `kubed version`.

use std::process::Command;

fn main() {
    let datetime = std::env::var("KUBED_BUILD_DATETIME").unwrap_or_else(|_| {
        chrono::Utc::now()
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string()
    });

    let git_hash = std::env::var("KUBED_BUILD_GIT_HASH")
        .ok()
        .or_else(git_commit)
        .unwrap_or_else(|| "unknown".to_string());

    let git_branch = std::env::var("KUBED_BUILD_GIT_BRANCH")
        .ok()
        .or_else(git_branch)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=KUBED_BUILD_DATETIME={datetime}");
    println!("cargo:rustc-env=KUBED_BUILD_GIT_HASH={git_hash}");
    println!("cargo:rustc-env=KUBED_BUILD_GIT_BRANCH={git_branch}");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=KUBED_BUILD_DATETIME");
    println!("cargo:rerun-if-env-changed=KUBED_BUILD_GIT_HASH");
    println!("cargo:rerun-if-env-changed=KUBED_BUILD_GIT_BRANCH");
}

fn git_output(args: &[&str]) -> Option<String> {
    // Command-line git keeps the build free of libgit2/OpenSSL
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn git_commit() -> Option<String> {
    let short_hash = git_output(&["rev-parse", "--short", "HEAD"])?;
    let is_dirty = Command::new("git")
        .args(["diff", "--quiet"])
        .output()
        .ok()
        .is_some_and(|output| !output.status.success());
    let suffix = if is_dirty { "-dirty" } else { "" };
    Some(format!("{short_hash}{suffix}"))
}

fn git_branch() -> Option<String> {
    git_output(&["rev-parse", "--abbrev-ref", "HEAD"])
}
