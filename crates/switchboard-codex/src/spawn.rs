//! Spawn-command construction for the Codex-style CLI.

use std::path::Path;
use tokio::process::Command;

use switchboard_core::session::LaunchOptions;

/// Build the subprocess command: `<binary> app-server -c
/// tools.webSearch=<bool>`, stdio piped for the JSON-RPC channel.
#[must_use]
pub fn build_command(binary: &Path, opts: &LaunchOptions) -> Command {
    let mut cmd = Command::new(binary);
    cmd.arg("app-server");
    cmd.arg("-c")
        .arg(format!("tools.webSearch={}", opts.codex.internet_access));
    cmd.current_dir(&opts.working_dir);
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd
}
