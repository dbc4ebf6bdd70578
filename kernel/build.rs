use std::{env, path::PathBuf};

fn main() {
    let target = env::var("TARGET").expect("TARGET not set");
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");

    // Bare-metal targets link with the kernel layout script; host builds
    // (the unit test suite) use the platform defaults.
    if target.ends_with("-none") {
        let script = PathBuf::from(&manifest_dir).join("linker-x86_64.ld");
        println!("cargo:rustc-link-arg=-T{}", script.display());
        println!("cargo:rustc-link-arg=-zmax-page-size=0x1000");
        println!("cargo:rerun-if-changed={}", script.display());
    }
}
