use chrono::Utc;

fn main() {
    // Stamped into `rfs --version` / 构建时间
    let built_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    println!("cargo:rustc-env=BUILD_TIME={}", built_at);
    println!("cargo:rerun-if-changed=build.rs");
}
