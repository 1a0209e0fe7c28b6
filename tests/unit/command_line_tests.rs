//! Unit tests for terminal command-line parsing.

use acp_engine::errors::TerminalError;
use acp_engine::terminal::command_line::{needs_splitting, parse_invocation, split};

/// A quoted argument stays one word.
#[test]
fn quoted_argument_stays_together() {
    let (program, args) = parse_invocation(r#"echo "a b""#, None).unwrap();
    assert_eq!(program, "echo");
    assert_eq!(args, vec!["a b".to_owned()]);
}

/// Single quotes suppress escapes.
#[test]
fn single_quotes_are_literal() {
    assert_eq!(
        split(r"grep 'a\ b' file").unwrap(),
        vec!["grep", r"a\ b", "file"]
    );
}

/// Explicit args are used verbatim and the command is not split.
#[test]
fn explicit_args_win_over_splitting() {
    let args = vec!["-la".to_owned(), "my dir".to_owned()];
    let (program, parsed) = parse_invocation("ls", Some(&args)).unwrap();
    assert_eq!(program, "ls");
    assert_eq!(parsed, args);
}

/// An empty args list falls back to splitting the command.
#[test]
fn empty_args_fall_back_to_splitting() {
    let (program, args) = parse_invocation("git status --short", Some(&[])).unwrap();
    assert_eq!(program, "git");
    assert_eq!(args, vec!["status", "--short"]);
}

/// A bare executable needs no tokenizing.
#[test]
fn plain_command_is_not_split() {
    assert!(!needs_splitting("cargo"));
    assert!(needs_splitting("cargo build"));
    assert!(needs_splitting("\"cargo\""));
    let (program, args) = parse_invocation("cargo", None).unwrap();
    assert_eq!(program, "cargo");
    assert!(args.is_empty());
}

/// Unterminated quotes and blank commands are unparsable.
#[test]
fn broken_commands_are_unparsable() {
    assert!(matches!(
        parse_invocation(r#"echo "oops"#, None),
        Err(TerminalError::Unparsable(_))
    ));
    assert!(matches!(
        parse_invocation("   ", None),
        Err(TerminalError::Unparsable(_))
    ));
    assert!(matches!(
        parse_invocation("", None),
        Err(TerminalError::Unparsable(_))
    ));
}

/// Backslash escapes outside quotes; a dangling one is an error.
#[test]
fn backslash_escapes_and_trailing_backslash() {
    assert_eq!(
        split(r#"cat my\ file "it's here""#).unwrap(),
        vec!["cat", "my file", "it's here"]
    );
    assert!(matches!(split(r"echo oops\"), Err(TerminalError::Unparsable(_))));
}
