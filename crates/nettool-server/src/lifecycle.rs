//! Process lifecycle: the status file sink and the shutdown-signal wait
//! used by `main.rs` to choreograph graceful teardown.

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::error::ProxyError;

/// Write the status file with `state` (`"running"` or `"stopped"`), the
/// process PID, and its start time, per the status document's on-disk
/// sibling described alongside the JSON status characteristic.
pub fn write_status_file(path: &Path, state: &str, http_port: u16) -> Result<(), ProxyError> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let body = format!("{state}\nPID: {pid}\nSTART: {now}\nHTTP_PORT: {http_port}\n", pid = std::process::id());
    std::fs::write(path, body)
        .map_err(|e| ProxyError::Lifecycle(format!("failed to write status file {}: {e}", path.display())))
}

/// Resolves once a termination signal (SIGTERM or SIGINT / Ctrl-C) is
/// received.
pub async fn wait_for_shutdown_signal() -> Result<(), ProxyError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ProxyError::Lifecycle(format!("failed to install SIGTERM handler: {e}")))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ProxyError::Lifecycle(format!("failed to install SIGINT handler: {e}")))?;

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ProxyError::Lifecycle(format!("failed to install Ctrl-C handler: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn write_status_file_contains_expected_fields() {
        let file = NamedTempFile::new().expect("creates temp file");
        write_status_file(file.path(), "running", 8080).expect("writes status file");

        let contents = std::fs::read_to_string(file.path()).expect("reads status file");
        assert!(contents.starts_with("running\n"));
        assert!(contents.contains("PID: "));
        assert!(contents.contains("HTTP_PORT: 8080"));
    }

    #[test]
    fn write_status_file_to_missing_directory_errors() {
        let result = write_status_file(Path::new("/no/such/directory/status"), "running", 8080);
        assert!(matches!(result, Err(ProxyError::Lifecycle(_))));
    }
}
