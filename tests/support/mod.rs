#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wallet_bridge::config::{BridgeConfig, WorkerConfig};

/// Answers every request, rejects operations starting with `fail`, sleeps
/// half a second on operations starting with `slow`. Each received
/// operation is appended to the log file given as `$1`.
pub const ECHO_WORKER: &str = r#"#!/bin/sh
LOG="$1"
echo "worker booting" >&2
echo '{"type":"ready"}'
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  op=$(printf '%s\n' "$line" | sed -n 's/.*"operation":"\([^"]*\)".*/\1/p')
  echo "$op" >> "$LOG"
  case "$op" in
    fail*) printf '{"type":"response","id":%s,"error":"%s rejected"}\n' "$id" "$op" ;;
    slow*) sleep 0.5; printf '{"type":"response","id":%s,"result":"%s"}\n' "$id" "$op" ;;
    *) printf '{"type":"response","id":%s,"result":"%s"}\n' "$id" "$op" ;;
  esac
done
echo "exit" >> "$LOG"
"#;

/// Ignores SIGTERM and keeps running after stdin closes.
pub const STUBBORN_WORKER: &str = r#"#!/bin/sh
LOG="$1"
trap '' TERM
echo '{"type":"ready"}'
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  printf '{"type":"response","id":%s,"result":null}\n' "$id"
done
echo "stdin closed" >> "$LOG"
while :; do sleep 0.1; done
"#;

/// Never signals readiness.
pub const SILENT_WORKER: &str = r#"#!/bin/sh
echo "still syncing the chain..."
sleep 30
"#;

pub struct WorkerFixture {
    dir: TempDir,
    pub script: PathBuf,
    pub log: PathBuf,
}

impl WorkerFixture {
    pub fn new(body: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("worker.sh");
        let log = dir.path().join("worker.log");
        write_executable(&script, body);
        Self { dir, script, log }
    }

    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            worker: WorkerConfig {
                program: self.script.to_string_lossy().into_owned(),
                args: vec![self.log.to_string_lossy().into_owned()],
                ..WorkerConfig::default()
            },
            startup_timeout_ms: 5_000,
            drain_timeout_ms: 2_000,
            grace_period_ms: 2_000,
        }
    }

    /// Lines the worker appended to its log.
    pub fn log_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).expect("write worker stub");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set permissions");
    }
}

pub const SHORT_GRACE: Duration = Duration::from_millis(300);
