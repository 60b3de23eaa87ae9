use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use clamstream_core::{AsyncClient, ClamClient, ClamError, Config};
use walkdir::WalkDir;

use crate::output::{format_outcome, Outcome, Summary};
use crate::OutputFormat;

/// Regular files under `target` in name order; unreadable entries come back
/// as errors carrying their path
fn files(
    target: &Path,
    follow_symlinks: bool,
) -> impl Iterator<Item = std::result::Result<PathBuf, (PathBuf, ClamError)>> + '_ {
    WalkDir::new(target)
        .follow_links(follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
            Ok(_) => None,
            Err(e) => {
                let path = e.path().unwrap_or(target).to_path_buf();
                Some(Err((path, ClamError::Source(e.into()))))
            }
        })
}

fn report(path: &Path, outcome: &Outcome, format: OutputFormat, summary: &mut Summary) -> Result<()> {
    if let Err(e) = outcome {
        tracing::debug!(path = %path.display(), "scan failed: {}", e);
    }
    println!("{}", format_outcome(path, outcome, format)?);
    summary.record(outcome);
    Ok(())
}

fn finish(summary: &Summary, format: OutputFormat) {
    if format == OutputFormat::Plain {
        eprintln!("{}", summary);
    }
}

/// Scan one file at a time on the calling thread
pub fn run(config: &Config, target: &Path, format: OutputFormat) -> Result<Summary> {
    let client = ClamClient::from_config(config);
    let direct = config.scanner.direct_file_transfer;
    let mut summary = Summary::default();

    for item in files(target, config.scanner.follow_symlinks) {
        let (path, outcome) = match item {
            Ok(path) => {
                let outcome = client.scan_path(&path, direct);
                (path, outcome)
            }
            Err((path, e)) => (path, Err(e)),
        };
        report(&path, &outcome, format, &mut summary)?;
    }

    finish(&summary, format);
    Ok(summary)
}

/// Submit every file to the worker pool and report results as they arrive
pub fn run_async(config: &Config, target: &Path, format: OutputFormat) -> Result<Summary> {
    if config.scanner.direct_file_transfer {
        tracing::warn!("single-chunk transfer is not available with --async; streaming instead");
    }

    let client = AsyncClient::from_config(config).context("Failed to start worker pool")?;
    let (tx, rx) = mpsc::channel();
    let mut summary = Summary::default();
    let mut submitted = 0usize;

    for item in files(target, config.scanner.follow_symlinks) {
        match item {
            Ok(path) => {
                let tx = tx.clone();
                let reported = path.clone();
                client.scan_path(path, move |outcome| {
                    let _ = tx.send((reported, outcome));
                });
                submitted += 1;
            }
            Err((path, e)) => report(&path, &Err(e), format, &mut summary)?,
        }
    }
    drop(tx);
    tracing::info!(submitted, workers = client.workers(), "scans queued");

    // Each callback sends exactly once, so this ends after the last scan
    for (path, outcome) in rx {
        report(&path, &outcome, format, &mut summary)?;
    }

    client.close().context("Worker pool did not shut down cleanly")?;

    finish(&summary, format);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_finds_nested_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("a/b/deep.bin"), b"2").unwrap();

        let found: Vec<_> = files(dir.path(), false)
            .map(|item| item.unwrap())
            .collect();

        assert_eq!(
            found,
            vec![dir.path().join("a/b/deep.bin"), dir.path().join("top.txt")]
        );
    }

    #[test]
    fn test_walk_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("only.bin");
        std::fs::write(&path, b"x").unwrap();

        let found: Vec<_> = files(&path, false).map(|item| item.unwrap()).collect();
        assert_eq!(found, vec![path]);
    }

    #[test]
    fn test_walk_missing_target_is_reported() {
        let mut items = files(Path::new("/definitely/not/here"), false);
        match items.next() {
            Some(Err((path, ClamError::Source(_)))) => {
                assert_eq!(path, Path::new("/definitely/not/here"))
            }
            _ => panic!("expected a source error"),
        }
    }

    #[test]
    fn test_unreachable_daemon_counts_errors_and_continues() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one"), b"1").unwrap();
        std::fs::write(dir.path().join("two"), b"2").unwrap();

        let mut config = Config::default();
        config.daemon.host = "127.0.0.1".into();
        config.daemon.port = port;
        config.scanner.workers = 2;

        let summary = run(&config, dir.path(), OutputFormat::Json).unwrap();
        assert_eq!(summary.errors, 2);

        let summary = run_async(&config, dir.path(), OutputFormat::Json).unwrap();
        assert_eq!(summary.errors, 2);
    }
}
