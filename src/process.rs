//! Building and spawning the processes attached to session channels.

use crate::error::ServerError;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Exit status reported when a process could not be spawned or waited on.
pub const FAILURE_EXIT_STATUS: u32 = 255;

/// Argument vector of the platform's interactive shell.
pub fn default_shell() -> Vec<String> {
    if cfg!(windows) {
        vec![r"C:\windows\system32\cmd.exe".into(), "/Q".into()]
    } else {
        vec!["/bin/sh".into()]
    }
}

/// Argument vector running `command` through the platform shell.
pub fn command_with_shell(command: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![
            r"C:\windows\system32\cmd.exe".into(),
            "/C".into(),
            command.into(),
        ]
    } else {
        vec!["/bin/sh".into(), "-c".into(), command.into()]
    }
}

/// Directory processes start in: the daemon user's home, when known.
pub fn working_dir() -> Option<PathBuf> {
    dirs::home_dir().filter(|p| p.is_dir())
}

/// Exit code of a finished child. Signal deaths map to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> u32 {
    if let Some(code) = status.code() {
        return code as u32;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as u32;
        }
    }
    FAILURE_EXIT_STATUS
}

/// Environment handed to a channel's process: a snapshot of the daemon's
/// environment followed by the overrides in arrival order. The spawned
/// process sees the last value given for a name.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: Vec<(OsString, OsString)>,
}

impl Environment {
    pub fn inherit() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    /// Append `name=value`. Names must be non-empty and free of `=` and NUL,
    /// values free of NUL; a rejected pair leaves the environment unchanged.
    pub fn push(&mut self, name: &str, value: &str) -> Result<(), ServerError> {
        if name.is_empty() {
            return Err(ServerError::protocol("env", "empty variable name"));
        }
        if name.contains(['=', '\0']) {
            return Err(ServerError::protocol("env", format!("invalid variable name {:?}", name)));
        }
        if value.contains('\0') {
            return Err(ServerError::protocol("env", "NUL in value"));
        }
        self.vars.push((name.into(), value.into()));
        Ok(())
    }

    /// Value the process will see for `name`.
    pub fn get(&self, name: &str) -> Option<&OsString> {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsString, &OsString)> {
        self.vars.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Spawn `argv` with piped stdio for a channel without a terminal.
pub fn spawn_piped(argv: &[String], env: &Environment) -> Result<Child, ServerError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ServerError::protocol("exec", "empty command"))?;
    let mut command = Command::new(program);
    command
        .args(args)
        .env_clear()
        .envs(env.iter())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir() {
        command.current_dir(dir);
    }
    Ok(command.spawn()?)
}

/// Command for a channel with a terminal; spawned by [`crate::pty::PtyPair`].
/// The returned child is not killed on drop; its owner has to kill and reap it.
pub fn pty_command(argv: &[String], env: &Environment) -> Result<pty_process::Command, ServerError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ServerError::protocol("exec", "empty command"))?;
    let mut command = pty_process::Command::new(program);
    command
        .args(args)
        .env_clear()
        .envs(env.iter());
    if let Some(dir) = working_dir() {
        command.current_dir(dir);
    }
    Ok(command)
}
