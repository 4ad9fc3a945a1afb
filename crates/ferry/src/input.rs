//! Console command parsing for the ferry front end.
//!
//! Typed lines are either slash commands or chat. A slash command is a
//! single whitespace-delimited token: `/uploadfoo` is no command at
//! all, not an upload of `foo`.

// ============================================================================
// Action Types
// ============================================================================

/// Actions the console takes in response to one typed line.
///
/// Returned by [`parse_line`] to signal what the event loop should do;
/// argument variants borrow from the parsed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<'a> {
    /// Nothing to do (blank line).
    None,

    /// End the session.
    Quit,

    /// Re-check the version so an offered update installs.
    Update,

    /// Relay the named local file.
    Upload(&'a str),

    /// `/upload` with no path; the console prints usage.
    UploadUsage,

    /// A slash command this console does not know, kept verbatim for
    /// the error message.
    Unknown(&'a str),

    /// A plain line, relayed as chat.
    Chat(&'a str),
}

// ============================================================================
// Parser
// ============================================================================

/// Splits one typed line into the action it requests.
///
/// The command is the first whitespace-delimited token; the rest of the
/// line is its argument. Commands that take no argument reject trailing
/// text, so `/quit now` is unknown rather than a quit.
#[must_use]
pub fn parse_line(line: &str) -> Action<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Action::None;
    }
    if !line.starts_with('/') {
        return Action::Chat(line);
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "/quit" if rest.is_empty() => Action::Quit,
        "/update" if rest.is_empty() => Action::Update,
        "/upload" if rest.is_empty() => Action::UploadUsage,
        "/upload" => Action::Upload(rest),
        _ => Action::Unknown(line),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_and_update_are_exact() {
        assert_eq!(parse_line("/quit"), Action::Quit);
        assert_eq!(parse_line("/update"), Action::Update);
        assert_eq!(parse_line("/quit now"), Action::Unknown("/quit now"));
        assert_eq!(parse_line("/update 2.0"), Action::Unknown("/update 2.0"));
    }

    #[test]
    fn test_upload_takes_the_rest_as_path() {
        assert_eq!(parse_line("/upload notes.txt"), Action::Upload("notes.txt"));
        assert_eq!(parse_line("/upload  my file.txt "), Action::Upload("my file.txt"));
        assert_eq!(parse_line("/upload\tnotes.txt"), Action::Upload("notes.txt"));
    }

    #[test]
    fn test_bare_upload_asks_for_a_path() {
        assert_eq!(parse_line("/upload"), Action::UploadUsage);
        assert_eq!(parse_line("/upload   "), Action::UploadUsage);
    }

    #[test]
    fn test_glued_suffix_is_not_an_upload() {
        assert_eq!(parse_line("/uploadfoo"), Action::Unknown("/uploadfoo"));
        assert_eq!(parse_line("/uploadx y"), Action::Unknown("/uploadx y"));
    }

    #[test]
    fn test_plain_lines_are_chat() {
        assert_eq!(parse_line("hello world"), Action::Chat("hello world"));
        assert_eq!(parse_line("  padded  "), Action::Chat("padded"));
        assert_eq!(parse_line("not/a/command"), Action::Chat("not/a/command"));
    }

    #[test]
    fn test_blank_lines_do_nothing() {
        assert_eq!(parse_line(""), Action::None);
        assert_eq!(parse_line("   "), Action::None);
    }
}
