use std::fmt::Display;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Returns true if the byte is safe to print without shell quoting.
fn is_plain(b: u8) -> bool {
    matches!(b, b'/' | b'.' | b'-' | b'_' | b'+' | b'@' | b':' | b',' | b'=')
        || b.is_ascii_alphanumeric()
}

/// Displays a path the way a POSIX shell would need to see it.
///
/// Mount instructions are whitespace separated lines, so paths that would need
/// quoting cannot be emitted verbatim; this is used when reporting them.
#[derive(Debug)]
pub struct PathQuotedDisplay<'a> {
    path: &'a Path,
}

impl<'a> PathQuotedDisplay<'a> {
    /// Wrap a path for display. A path made only of "plain" characters
    /// is rendered unchanged.
    pub fn new<P: AsRef<Path> + ?Sized>(path: &'a P) -> PathQuotedDisplay<'a> {
        PathQuotedDisplay {
            path: path.as_ref(),
        }
    }

    /// Whether rendering this path requires quoting.
    pub fn needs_quoting(&self) -> bool {
        !self.path.as_os_str().as_bytes().iter().copied().all(is_plain)
    }
}

impl<'a> Display for PathQuotedDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.needs_quoting() {
            if let Some(s) = self.path.to_str() {
                return f.write_str(s);
            }
        }
        let r = shlex::bytes::try_quote(self.path.as_os_str().as_bytes())
            .map_err(|_| std::fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&r))
    }
}
