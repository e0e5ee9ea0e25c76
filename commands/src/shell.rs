//! Shared shell-safety and error-mapping helpers used by every command.

use model::ErrorKind;

/// Single-quotes a path/argument for inclusion in a shell command line,
/// escaping embedded single quotes the POSIX way (`'`→`'\''`).
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Wraps a command with `timeout N` to bound runtime on the remote host,
/// independent of the SSH channel's own `executeTimeout`.
pub fn with_timeout(seconds: u64, command: &str) -> String {
    format!("timeout {seconds} {command}")
}

pub const UTILITY_TIMEOUT_SECS: u64 = 5;

/// Shared stderr-signature error mapping policy. Returns `None` when no
/// known signature matched, meaning the caller maps to `ErrorKind::Internal`.
pub fn map_error(stderr: &str, exit_status: i32) -> Option<ErrorKind> {
    if exit_status == 124 {
        return Some(ErrorKind::Timeout(stderr.to_string()));
    }
    if stderr.contains("No such file or directory") {
        return Some(ErrorKind::NotFound(stderr.to_string()));
    }
    if stderr.contains("Permission denied") || stderr.contains("Operation not permitted") {
        return Some(ErrorKind::Forbidden(stderr.to_string()));
    }
    if stderr.contains("File exists") {
        return Some(ErrorKind::Conflict(stderr.to_string()));
    }
    // Supplemented from the original implementation's error-handling base
    // class: an invalid-user stderr signature is treated as a caller error,
    // not an internal one.
    if stderr.contains("invalid user") {
        return Some(ErrorKind::BadRequest(stderr.to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn maps_timeout_exit_status() {
        assert!(matches!(map_error("", 124), Some(ErrorKind::Timeout(_))));
    }

    #[test]
    fn maps_not_found() {
        assert!(matches!(
            map_error("ls: cannot access 'x': No such file or directory", 2),
            Some(ErrorKind::NotFound(_))
        ));
    }

    #[test]
    fn maps_permission_denied_to_forbidden() {
        assert!(matches!(
            map_error("open: Permission denied", 1),
            Some(ErrorKind::Forbidden(_))
        ));
    }

    #[test]
    fn maps_file_exists_to_conflict() {
        assert!(matches!(
            map_error("mkdir: File exists", 1),
            Some(ErrorKind::Conflict(_))
        ));
    }

    #[test]
    fn unmatched_stderr_is_not_mapped() {
        assert!(map_error("boom", 1).is_none());
    }
}
