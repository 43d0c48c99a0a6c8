#![allow(dead_code)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub fn start_mockito_server(test_name: &str) -> Option<mockito::ServerGuard> {
    let server = std::panic::catch_unwind(|| mockito::Server::new());
    match server {
        Ok(server) => Some(server),
        Err(_) => {
            eprintln!(
                "Skipping {test_name}; unable to start mockito server in this environment."
            );
            None
        }
    }
}

pub struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    pub fn set(vars: &[(&str, &str)]) -> Self {
        let mut saved = Vec::with_capacity(vars.len());
        for (key, value) in vars {
            saved.push((key.to_string(), env::var(key).ok()));
            env::set_var(key, value);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..) {
            match value {
                Some(value) => env::set_var(&key, value),
                None => env::remove_var(&key),
            }
        }
    }
}

/// Uuid the fake `task` binary reports for every `add`.
pub const NEW_TASK_UUID: &str = "9b1f2c3d-0000-4e5f-8a9b-0c1d2e3f4a5b";

/// Writes a shell script that answers like Taskwarrior and logs each
/// invocation's arguments to `task.log` next to it.
///
/// `export` of the managed tag prints `export.json`, `export` of the new
/// uuid prints `created.json`, and any command mentioning `missing-uuid`
/// fails with "No matches.".
#[cfg(unix)]
pub fn write_fake_task(
    dir: &Path,
    export_json: &str,
    created_json: &str,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    use std::os::unix::fs::PermissionsExt;

    fs::write(dir.join("export.json"), export_json)?;
    fs::write(dir.join("created.json"), created_json)?;
    let script = format!(
        r#"#!/bin/sh
printf '%s\n' "$*" >> "{dir}/task.log"
case "$*" in
  *missing-uuid*) echo "No matches."; exit 1 ;;
  *" add "*) echo "Created task {uuid}." ;;
  *"{uuid} export"*) cat "{dir}/created.json" ;;
  *" export"*) cat "{dir}/export.json" ;;
  *" annotate "*|*" done") ;;
  *) echo "unexpected arguments: $*" >&2; exit 3 ;;
esac
"#,
        dir = dir.display(),
        uuid = NEW_TASK_UUID,
    );
    let path = dir.join("task");
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Invocations recorded by the fake `task` binary, one argument string per line.
pub fn task_log(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("task.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
