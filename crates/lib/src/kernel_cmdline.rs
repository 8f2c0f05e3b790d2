//! Kernel command line parsing.
//!
//! Parameters are either key-only switches or `key=value` pairs; values
//! may be double quoted to contain whitespace.

use std::borrow::Cow;

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;

/// The kernel command line as exposed by procfs.
pub(crate) const PROC_CMDLINE: &str = "/proc/cmdline";

/// A kernel command line, borrowed or owned.
#[derive(Debug)]
pub(crate) struct Cmdline<'a>(Cow<'a, [u8]>);

impl<'a, T: AsRef<[u8]> + ?Sized> From<&'a T> for Cmdline<'a> {
    fn from(input: &'a T) -> Self {
        Self(Cow::Borrowed(input.as_ref()))
    }
}

impl<'a> Cmdline<'a> {
    /// Reads the kernel command line from the given file, normally [`PROC_CMDLINE`].
    #[context("Reading kernel command line from {path}")]
    pub(crate) fn from_path(path: &Utf8Path) -> Result<Cmdline<'static>> {
        Ok(Cmdline(Cow::Owned(std::fs::read(path)?)))
    }

    /// Returns an iterator over all parameters in the command line.
    ///
    /// Whitespace inside double quotes does not split parameters.
    /// Empty tokens (from repeated whitespace) are skipped.
    pub(crate) fn iter(&'a self) -> impl Iterator<Item = Parameter<'a>> + 'a {
        let mut in_quotes = false;

        self.0
            .split(move |c| {
                if *c == b'"' {
                    in_quotes = !in_quotes;
                }
                !in_quotes && c.is_ascii_whitespace()
            })
            .filter(|p| !p.is_empty())
            .map(Parameter::from)
    }
}

/// A kernel command line parameter key, compared byte for byte.
///
/// The kernel itself treats dashes and underscores in parameter names as
/// equivalent, but the boot mode parameters are only ever written one way
/// and are matched exactly.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ParameterKey<'a>(&'a [u8]);

/// A single kernel command line parameter.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Parameter<'a> {
    /// The parameter key as raw bytes
    pub(crate) key: ParameterKey<'a>,
    /// The parameter value as raw bytes, if there was a `=`
    pub(crate) value: Option<&'a [u8]>,
}

impl Parameter<'_> {
    /// Whether this parameter has the given key.
    pub(crate) fn key_is(&self, key: &str) -> bool {
        self.key == ParameterKey(key.as_bytes())
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> From<&'a T> for Parameter<'a> {
    /// Splits on the first `=`; only the outermost pair of double quotes
    /// is stripped from the value.
    fn from(input: &'a T) -> Self {
        let input = input.as_ref();
        match input.iter().position(|b| *b == b'=') {
            None => Self {
                key: ParameterKey(input),
                value: None,
            },
            Some(i) => {
                let (key, value) = input.split_at(i);
                // skip `=`, we know it's the first byte because we
                // found it above
                let value = &value[1..];
                let value = value.strip_prefix(b"\"").unwrap_or(value);
                let value = value.strip_suffix(b"\"").unwrap_or(value);
                Self {
                    key: ParameterKey(key),
                    value: Some(value),
                }
            }
        }
    }
}
