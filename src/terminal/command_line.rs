//! Shell-style command line splitting for `terminal/create`.
//!
//! Agents frequently send a whole command line in `command` with no `args`.
//! Words are split with POSIX quoting rules via `shell_words`. Variable
//! expansion, globbing, and operators are not interpreted.

use crate::errors::TerminalError;

/// Whether `command` needs tokenizing rather than being run as one executable.
#[must_use]
pub fn needs_splitting(command: &str) -> bool {
    command
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\'))
}

/// Split `input` into words.
///
/// # Errors
///
/// Returns [`TerminalError::Unparsable`] for an unterminated quote or a
/// trailing backslash.
pub fn split(input: &str) -> Result<Vec<String>, TerminalError> {
    shell_words::split(input).map_err(|err| TerminalError::Unparsable(format!("{input}: {err}")))
}

/// Decide the executable and arguments for a terminal request.
///
/// Explicit, non-empty `args` are used verbatim. Otherwise a command
/// containing whitespace or quotes is tokenized and its first word becomes
/// the executable.
///
/// # Errors
///
/// Returns [`TerminalError::Unparsable`] when tokenizing fails or yields
/// no words.
pub fn parse_invocation(
    command: &str,
    args: Option<&[String]>,
) -> Result<(String, Vec<String>), TerminalError> {
    if let Some(args) = args.filter(|a| !a.is_empty()) {
        return Ok((command.to_owned(), args.to_vec()));
    }
    if !needs_splitting(command) {
        if command.is_empty() {
            return Err(TerminalError::Unparsable("empty command".into()));
        }
        return Ok((command.to_owned(), Vec::new()));
    }

    let mut words = split(command)?.into_iter();
    let program = words
        .next()
        .ok_or_else(|| TerminalError::Unparsable("empty command".into()))?;
    Ok((program, words.collect()))
}
