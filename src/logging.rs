//! Logging: a `tracing` subscriber writing human-readable lines to stderr for
//! interactive use, plus an append-only plain-text event log under
//! `logs/*.log` (`<ISO-8601 UTC> [LEVEL] <message>` per line) that is rotated
//! and gzip-compressed once it grows past a size threshold.
//!
//! Rotation runs a size check every `ROTATION_CHECK_INTERVAL` writes rather
//! than on every write, and guards the rotate-and-compress step with the
//! same exclusive-file-lock discipline as the tick locks in [`crate::lock`]
//! so two processes logging concurrently don't double-rotate.

use std::fs::OpenOptions;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use fs2::FileExt;

const ROTATION_CHECK_INTERVAL: u32 = 200;

/// Install the stderr-facing `tracing` subscriber. Call once at process
/// startup; level is driven by `RUST_LOG` with an `info` default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

/// Append-only event log with size-based rotation.
pub struct EventLog {
    log_path: PathBuf,
    write_count: AtomicU32,
    rotation_size_bytes: u64,
    max_archives: usize,
}

impl EventLog {
    /// Construct with the documented defaults (8 MiB, 5 archives). Most
    /// callers use [`EventLog::with_rotation_policy`] to honor
    /// `LOG_ROTATION_MB`/`LOG_MAX_ARCHIVES`.
    pub fn new(log_path: PathBuf) -> Self {
        Self::with_rotation_policy(log_path, 8, 5)
    }

    pub fn with_rotation_policy(log_path: PathBuf, rotation_mb: u64, max_archives: usize) -> Self {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self {
            log_path,
            write_count: AtomicU32::new(0),
            rotation_size_bytes: rotation_mb * 1024 * 1024,
            max_archives,
        }
    }

    /// Append one documented-format line. Rotation failures never prevent
    /// the write itself from proceeding.
    pub fn write(&self, level: &str, message: &str) -> std::io::Result<()> {
        if self.write_count.fetch_add(1, Ordering::Relaxed) % ROTATION_CHECK_INTERVAL == 0 {
            let _ = self.rotate_if_needed();
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{} [{}] {}", Utc::now().to_rfc3339(), level, message)
    }

    /// Check the active log file against the rotation threshold and roll it
    /// over if needed. Exposed so `rotate_once` can drive rotation directly
    /// (per §4.10) rather than waiting for the periodic in-`write` check.
    pub fn rotate_if_needed(&self) -> std::io::Result<()> {
        if !self.needs_rotation()? {
            return Ok(());
        }

        let lock_path = self.log_path.with_extension("rotate.lock");
        let lock_file = OpenOptions::new().create(true).write(true).open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Ok(());
        }

        if self.needs_rotation()? {
            self.perform_rotation()?;
        }
        let _ = FileExt::unlock(&lock_file);
        Ok(())
    }

    fn needs_rotation(&self) -> std::io::Result<bool> {
        match std::fs::metadata(&self.log_path) {
            Ok(meta) => Ok(meta.len() >= self.rotation_size_bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn perform_rotation(&self) -> std::io::Result<()> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let filename = self.log_path.file_name().unwrap().to_string_lossy().into_owned();
        let archive_path = self.log_path.with_file_name(format!("{filename}.{stamp}.gz"));

        let temp_path = self.log_path.with_extension("rotating");
        std::fs::rename(&self.log_path, &temp_path)?;

        let source = std::fs::File::open(&temp_path)?;
        let target = std::fs::File::create(&archive_path)?;
        let mut encoder = GzEncoder::new(target, Compression::default());
        std::io::copy(&mut BufReader::new(source), &mut encoder)?;
        encoder.finish()?;
        std::fs::remove_file(&temp_path)?;

        self.cleanup_old_archives(&filename)
    }

    fn cleanup_old_archives(&self, filename: &str) -> std::io::Result<()> {
        let log_dir = self.log_path.parent().unwrap_or_else(|| Path::new("."));
        let mut archives = Vec::new();
        for entry in std::fs::read_dir(log_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&format!("{filename}.")) && name.ends_with(".gz") {
                archives.push((entry.path(), entry.metadata()?.modified()?));
            }
        }
        archives.sort_by_key(|(_, modified)| *modified);
        if archives.len() > self.max_archives {
            for (path, _) in archives.iter().take(archives.len() - self.max_archives) {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_appends_documented_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("dnslb.log"));
        log.write("INFO", "monitor tick completed").unwrap();

        let content = std::fs::read_to_string(dir.path().join("dnslb.log")).unwrap();
        assert!(content.contains("[INFO] monitor tick completed"));
        assert!(content.contains('T'));
    }

    #[test]
    fn rotation_compresses_and_clears_the_active_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("dnslb.log");
        let log = EventLog::with_rotation_policy(log_path.clone(), 1, 5);
        std::fs::write(&log_path, vec![b'x'; (log.rotation_size_bytes + 1) as usize]).unwrap();

        log.rotate_if_needed().unwrap();

        assert!(!log_path.exists() || std::fs::metadata(&log_path).unwrap().len() == 0);
        let archives: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".gz"))
            .collect();
        assert_eq!(archives.len(), 1);
    }

    #[test]
    fn cleanup_keeps_only_the_most_recent_archives() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("dnslb.log");
        let log = EventLog::with_rotation_policy(log_path.clone(), 8, 5);
        for i in 0..(log.max_archives + 2) {
            std::fs::write(dir.path().join(format!("dnslb.log.stamp{i}.gz")), b"x").unwrap();
        }

        log.cleanup_old_archives("dnslb.log").unwrap();

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".gz"))
            .collect();
        assert_eq!(remaining.len(), log.max_archives);
    }
}
