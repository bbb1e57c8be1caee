use std::process::Command;

/// Version reported by `--version`: the nearest `v*` tag when building from a
/// git checkout, the crate version otherwise. Local changes get a `+dirty`
/// build suffix.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-changed=.git/refs/tags");

    let package = env!("CARGO_PKG_VERSION");
    let version = git_describe().map_or_else(|| package.to_string(), |described| from_tag(&described));

    println!("cargo:rustc-env=SETUPKEEP_VERSION={}", version);
}

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--match", "v*", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    (!described.is_empty()).then(|| described.to_string())
}

/// "v1.2.0-3-gabc123-dirty" -> "1.2.0-3-gabc123+dirty"
fn from_tag(described: &str) -> String {
    let described = described.strip_prefix('v').unwrap_or(described);
    match described.strip_suffix("-dirty") {
        Some(clean) => format!("{}+dirty", clean),
        None => described.to_string(),
    }
}
