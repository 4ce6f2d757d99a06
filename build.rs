// build.rs

use std::env;

fn main() {
    // Container builds stamp the released version through the environment.
    let version = env::var("PG_WARDEN_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()));

    println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    println!("cargo:rerun-if-env-changed=PG_WARDEN_VERSION");
}
