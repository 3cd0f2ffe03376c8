// Generates Swift/Kotlin bindings for kindred_core:
//   cargo run -p uniffi-bindgen -- generate --library target/debug/libkindred_core.so --language kotlin --out-dir out
fn main() {
    uniffi::uniffi_bindgen_main()
}
