//! Spawn-command construction for the Claude-style CLI.

use std::path::Path;
use tokio::process::Command;

use switchboard_core::session::LaunchOptions;
use switchboard_core::types::SessionId;

/// Backend-identifying environment variable, always set to `1` for the
/// subprocess.
pub const CLAUDE_BRIDGE_ENV: &str = "SWITCHBOARD_CLAUDE_BRIDGE";

/// Build the subprocess command.
///
/// The fixed streaming flags are always present. The skip-permissions flag
/// and `--permission-mode` are mutually exclusive on the wire and the skip
/// flag takes precedence. A `--resume` token is added on relaunch. The
/// trailing `-p ""` keeps the CLI headless.
#[must_use]
pub fn build_command(
    binary: &Path,
    session_id: SessionId,
    loopback_port: u16,
    opts: &LaunchOptions,
    resume: Option<&str>,
) -> Command {
    let mut cmd = Command::new(binary);
    cmd.arg("--sdk-url").arg(format!(
        "ws://127.0.0.1:{loopback_port}/ws/cli/{session_id}"
    ));
    cmd.args([
        "--print",
        "--output-format",
        "stream-json",
        "--input-format",
        "stream-json",
        "--verbose",
    ]);
    if let Some(model) = &opts.model {
        cmd.arg("--model").arg(model);
    }
    if opts.dangerously_skip_permissions {
        cmd.arg("--dangerously-skip-permissions");
    } else if let Some(mode) = opts.permission_mode {
        cmd.arg("--permission-mode").arg(mode.as_cli_arg());
    }
    for tool in &opts.allowed_tools {
        cmd.arg("--allowedTools").arg(tool);
    }
    if let Some(resume) = resume {
        cmd.arg("--resume").arg(resume);
    }
    cmd.arg("-p").arg("");

    cmd.current_dir(&opts.working_dir);
    cmd.env(CLAUDE_BRIDGE_ENV, "1");
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::session::{BackendKind, PermissionMode};

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn fixed_flags_and_headless_prompt_are_always_present() {
        let opts = LaunchOptions::new(BackendKind::Claude, "/tmp");
        let session_id = SessionId::new();
        let cmd = build_command(Path::new("/usr/bin/claude"), session_id, 8787, &opts, None);
        let args = args_of(&cmd);

        assert_eq!(args[0], "--sdk-url");
        assert_eq!(args[1], format!("ws://127.0.0.1:8787/ws/cli/{session_id}"));
        assert!(args.contains(&"--print".to_string()));
        assert!(args.contains(&"--verbose".to_string()));
        assert_eq!(args[args.len().saturating_sub(2)..], ["-p", ""]);
    }

    #[test]
    fn skip_permissions_wins_over_permission_mode() {
        let mut opts = LaunchOptions::new(BackendKind::Claude, "/tmp");
        opts.permission_mode = Some(PermissionMode::AcceptEdits);
        opts.dangerously_skip_permissions = true;
        let cmd = build_command(Path::new("claude"), SessionId::new(), 1, &opts, None);
        let args = args_of(&cmd);

        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!args.contains(&"--permission-mode".to_string()));
    }

    #[test]
    fn permission_mode_uses_cli_spelling() {
        let mut opts = LaunchOptions::new(BackendKind::Claude, "/tmp");
        opts.permission_mode = Some(PermissionMode::AcceptEdits);
        let cmd = build_command(Path::new("claude"), SessionId::new(), 1, &opts, None);
        let args = args_of(&cmd);

        let i = args.iter().position(|a| a == "--permission-mode").unwrap();
        assert_eq!(args[i.saturating_add(1)], "acceptEdits");
    }

    #[test]
    fn allowed_tools_repeat_and_resume_is_appended() {
        let mut opts = LaunchOptions::new(BackendKind::Claude, "/tmp");
        opts.allowed_tools = vec!["Bash".to_string(), "Edit".to_string()];
        let cmd = build_command(
            Path::new("claude"),
            SessionId::new(),
            1,
            &opts,
            Some("cli-abc"),
        );
        let args = args_of(&cmd);

        assert_eq!(
            args.iter().filter(|a| *a == "--allowedTools").count(),
            2
        );
        let i = args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(args[i.saturating_add(1)], "cli-abc");
    }

    #[test]
    fn working_dir_and_env_are_applied() {
        let mut opts = LaunchOptions::new(BackendKind::Claude, "/tmp/work");
        opts.env.insert("EXTRA".to_string(), "yes".to_string());
        let cmd = build_command(Path::new("claude"), SessionId::new(), 1, &opts, None);
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_current_dir(), Some(Path::new("/tmp/work")));
        let env: Vec<_> = std_cmd
            .get_envs()
            .map(|(k, v)| (k.to_string_lossy().into_owned(), v))
            .collect();
        assert!(env.iter().any(|(k, _)| k == CLAUDE_BRIDGE_ENV));
        assert!(env.iter().any(|(k, _)| k == "EXTRA"));
    }
}
