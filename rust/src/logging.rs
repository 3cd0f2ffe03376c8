/// Platform-native logging initialization.
///
/// - iOS: tracing-oslog → Apple unified logging (os_log) + file fallback
/// - Android: paranoid-android → logcat
/// - Desktop: tracing-subscriber::fmt → stderr, filtered by `RUST_LOG` (unit tests use the
///   captured test writer)
///
/// Called once from `FfiApp` construction. Later calls are no-ops.
///
/// On iOS the file fallback writes to `<data_dir>/kindred.log`.
pub fn init_logging(#[allow(unused)] data_dir: &str) {
    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let os_log = tracing_oslog::OsLogger::new("care.kindred.app", "messaging");

        let log_path = std::path::Path::new(data_dir).join("kindred.log");
        let _ = std::fs::create_dir_all(data_dir);
        let env_filter = tracing_subscriber::EnvFilter::new("kindred_core=debug,info");

        let file_layer = if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true),
            )
        } else {
            None
        };

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(os_log)
            .with(file_layer)
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let android_layer = paranoid_android::layer("kindred")
            .with_filter(tracing_subscriber::EnvFilter::new("kindred_core=debug,info"));

        let _ = tracing_subscriber::registry()
            .with(android_layer)
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let builder = tracing_subscriber::fmt().with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kindred_core=debug,info".into()),
        );
        // Host apps and the CLI own stdout.
        #[cfg(not(test))]
        let _ = builder.with_writer(std::io::stderr).try_init();
        #[cfg(test)]
        let _ = builder.with_test_writer().try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_string_lossy().to_string();
        init_logging(&data_dir);
        init_logging(&data_dir);
        tracing::info!("still logging after a second init");
    }
}
