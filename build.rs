fn main() {
    // Declaring the app commands makes them deny-by-default; capabilities
    // grant them per window.
    tauri_build::try_build(
        tauri_build::Attributes::new()
            .app_manifest(tauri_build::AppManifest::new().commands(&["auth_relay_report"])),
    )
    .expect("failed to run tauri-build");
}
