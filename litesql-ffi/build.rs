fn main() {
    // The driver targets the platform's SQLite; no bundling, no bindgen.
    // The declarations in src/lib.rs are stable across every 3.x release
    // we support.
    println!("cargo:rustc-link-lib=sqlite3");

    if let Ok(dir) = std::env::var("SQLITE3_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    println!("cargo:rerun-if-env-changed=SQLITE3_LIB_DIR");
}
