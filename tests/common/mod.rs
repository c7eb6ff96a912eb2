//! Common test utilities and helpers for rsync-cord tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

use rsync_cord::{Job, JobPaths, TransferOutcome, TransferRunner};

/// Temporary directory tree holding a config file, a repository root and a log root
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub repository: PathBuf,
    pub logs: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repository = temp_dir.path().join("repository");
        let logs = temp_dir.path().join("logs");

        Self {
            temp_dir,
            repository,
            logs,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write test file");
        path
    }

    /// Write a `KEY=VALUE` config file for the given jobs and rsync binary
    pub fn create_legacy_config(&self, jobs: &[&str], rsync: &str) -> PathBuf {
        let content = format!(
            "DIRS=\"{}\"\nRSYNC=\"{}\"\nREPOSITORY=\"{}\"\nLOGS=\"{}\"\n",
            jobs.join(" "),
            rsync,
            self.repository.display(),
            self.logs.display()
        );
        self.write_file("config.sh", &content)
    }

    /// Write a YAML config file for the given jobs, rsync binary and listener port
    pub fn create_yaml_config(&self, jobs: &[&str], rsync: &str, port: u16) -> PathBuf {
        let jobs: String = jobs.iter().map(|job| format!("  - {}\n", job)).collect();
        let content = format!(
            r#"jobs:
{}rsync: "{}"
repository: "{}"
logs: "{}"
listener:
  port: {}
pool:
  dequeue_timeout_ms: 50
"#,
            jobs,
            rsync,
            self.repository.display(),
            self.logs.display(),
            port
        );
        self.write_file("config.yml", &content)
    }

    /// Write an executable shell script standing in for rsync
    #[cfg(unix)]
    pub fn create_stub_rsync(&self, exit_code: i32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            "#!/bin/sh\necho \"stub rsync $@\"\nmkdir -p \"$5\"\nexit {}\n",
            exit_code
        );
        let path = self.write_file("rsync", &script);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make stub executable");
        path
    }
}

/// Transfer runner that answers from a table of per-job exit codes
pub struct ScriptedRunner {
    exit_codes: HashMap<String, Vec<i32>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedRunner {
    /// Every job succeeds on its first attempt
    pub fn succeeding() -> Self {
        Self {
            exit_codes: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    /// Exit codes returned for successive attempts of `job`; the last one repeats
    pub fn with_exit_codes(mut self, job: &str, codes: &[i32]) -> Self {
        self.exit_codes.insert(job.to_string(), codes.to_vec());
        self
    }

    pub fn calls_for(&self, job: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(job)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferRunner for ScriptedRunner {
    async fn run(&self, job: &Job, _paths: &JobPaths) -> Result<TransferOutcome> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(job.uri().to_string()).or_default();
            *count += 1;
            *count
        };

        let code = match self.exit_codes.get(job.uri()) {
            Some(codes) => codes
                .get(attempt - 1)
                .or_else(|| codes.last())
                .copied()
                .unwrap_or(0),
            None => 0,
        };

        Ok(TransferOutcome::new(Some(code), ""))
    }
}

/// Blocking listener stand-in that records every message it receives
pub struct MessageCollector {
    pub port: u16,
    handle: std::thread::JoinHandle<Vec<String>>,
}

impl MessageCollector {
    /// Accept connections until `RSYNC_DONE` arrives
    pub fn start() -> Self {
        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind collector");
        let port = listener.local_addr().unwrap().port();

        let handle = std::thread::spawn(move || {
            let mut messages = Vec::new();
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => continue,
                };
                let mut message = String::new();
                if stream.read_to_string(&mut message).is_err() {
                    continue;
                }
                // Connections from listener probes carry no payload
                if message.is_empty() {
                    continue;
                }
                let done = message == "RSYNC_DONE";
                messages.push(message);
                if done {
                    break;
                }
            }
            messages
        });

        Self { port, handle }
    }

    /// Wait for `RSYNC_DONE` and return everything received, in arrival order
    pub fn finish(self) -> Vec<String> {
        self.handle.join().expect("Collector thread panicked")
    }
}
