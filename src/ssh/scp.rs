//! File-copy integration for exec channels.
//!
//! The copy protocol itself is spoken by the system `scp` binary running in
//! sink (`-t`) or source (`-f`) mode; this module only decides when an exec
//! request is a copy and what to run for it.

use crate::error::ServerError;
use tracing::debug;

/// First token of an exec command that selects the copy handler.
pub const FILE_COPY_COMMAND: &str = "scp";

/// Status recorded when the copy handler cannot run at all.
pub const FILE_COPY_FAILURE_STATUS: u32 = 1;

/// What an exec request turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecPlan {
    /// Run the copy handler with these arguments (first is the program).
    FileCopy(Vec<String>),
    /// Run the raw command line through the platform shell.
    Shell(String),
    /// Nothing to run; the request is still acknowledged.
    Nothing,
}

/// Decode and classify an exec payload. Only non-UTF-8 input is an error;
/// an empty command or unbalanced quoting yields [`ExecPlan::Nothing`].
pub fn plan_exec(payload: &[u8]) -> Result<ExecPlan, ServerError> {
    let command = std::str::from_utf8(payload)
        .map_err(|_| ServerError::protocol("exec", "command is not valid UTF-8"))?;
    match shell_words::split(command) {
        Ok(tokens) => match tokens.first() {
            None => Ok(ExecPlan::Nothing),
            Some(first) if first == FILE_COPY_COMMAND => Ok(ExecPlan::FileCopy(tokens)),
            Some(_) => Ok(ExecPlan::Shell(command.to_string())),
        },
        Err(e) => {
            debug!(command = %command, error = %e, "Cannot tokenize exec command");
            Ok(ExecPlan::Nothing)
        }
    }
}

/// Check that a copy request names a direction, so the binary runs as the
/// remote end of a transfer rather than as a client.
pub fn validate_copy_args(args: &[String]) -> Result<(), ServerError> {
    let has_mode = args.iter().skip(1).any(|a| {
        a.starts_with('-') && !a.starts_with("--") && (a.contains('t') || a.contains('f'))
    });
    if has_mode {
        Ok(())
    } else {
        Err(ServerError::protocol("exec", "scp without -t or -f"))
    }
}
