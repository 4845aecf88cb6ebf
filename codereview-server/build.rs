fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Release builds may pin the commit explicitly when no .git is available
    println!("cargo:rerun-if-env-changed=CODEREVIEW_GIT_HASH");
    if let Ok(hash) = std::env::var("CODEREVIEW_GIT_HASH") {
        println!("cargo:rustc-env=CODEREVIEW_GIT_HASH={}", hash);
    }
}
