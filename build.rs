// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=CAMERA_SESSION_VERSION");

    // Packagers can pin the version
    let version = std::env::var("CAMERA_SESSION_VERSION").unwrap_or_else(|_| {
        let base = env!("CARGO_PKG_VERSION");
        match commit_hash() {
            Some(hash) => format!("{base}-{hash}"),
            None => base.to_string(),
        }
    });

    println!("cargo::rustc-env=GIT_VERSION={version}");
}

fn commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
