//! Call-site capture for allocation diagnostics.

use std::fmt;
use std::panic::Location;

use serde::Serialize;

/// Source location that created (or last touched) an allocation.
///
/// Captured automatically through `#[track_caller]` on every public
/// allocator entry point, so reports point at user code instead of this
/// crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OriginSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl OriginSite {
    /// Build a site from explicit parts.
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self {
            file,
            line,
            column: 0,
        }
    }

    /// Site of the caller of the function this is invoked from.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&'static Location<'static>> for OriginSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for OriginSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_points_at_this_file() {
        let site = OriginSite::caller();
        assert!(site.file.ends_with("site.rs"));
        assert!(site.line > 0);
    }

    #[test]
    fn display_is_file_colon_line() {
        let site = OriginSite::new("src/main.rs", 42);
        assert_eq!(site.to_string(), "src/main.rs:42");
    }

    #[track_caller]
    fn forwarded() -> OriginSite {
        OriginSite::caller()
    }

    #[test]
    fn track_caller_propagates_through_wrappers() {
        let expected_line = line!() + 1;
        let site = forwarded();
        assert_eq!(site.line, expected_line);
    }
}
