//! Server version parsing.

use std::fmt;

/// Version reported by the server in the initial handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    version: String,
    mariadb: bool,
    major: u32,
    minor: u32,
    patch: u32,
    qualifier: String,
}

impl ServerVersion {
    /// Parse `major.minor.patch[qualifier]`; missing parts are 0.
    pub fn new(version: impl Into<String>, mariadb: bool) -> Self {
        let version = version.into();
        let mut numbers = [0u32; 3];
        let mut qualifier = String::new();
        let mut part = 0;
        let mut value: u32 = 0;

        for (offset, b) in version.bytes().enumerate() {
            if b.is_ascii_digit() {
                value = value.saturating_mul(10).saturating_add(u32::from(b - b'0'));
                continue;
            }
            numbers[part] = value;
            value = 0;
            if part == 2 {
                qualifier = version[offset..].to_string();
                part += 1;
                break;
            }
            part += 1;
        }
        if part <= 2 {
            numbers[part] = value;
        }

        Self {
            version,
            mariadb,
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            qualifier,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.version
    }

    pub fn is_mariadb(&self) -> bool {
        self.mariadb
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// Everything after the patch number, e.g. `-MariaDB-log`.
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Is this version at least `major.minor.patch`?
    pub fn version_greater_or_equal(&self, major: u32, minor: u32, patch: u32) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mariadb_version() {
        let v = ServerVersion::new("10.6.12-MariaDB-log", true);
        assert_eq!((v.major(), v.minor(), v.patch()), (10, 6, 12));
        assert_eq!(v.qualifier(), "-MariaDB-log");
        assert!(v.is_mariadb());
    }

    #[test]
    fn test_parse_short_versions() {
        let v = ServerVersion::new("8.0", false);
        assert_eq!((v.major(), v.minor(), v.patch()), (8, 0, 0));
        assert_eq!(v.qualifier(), "");

        let v = ServerVersion::new("5.7.44", false);
        assert_eq!((v.major(), v.minor(), v.patch()), (5, 7, 44));
    }

    #[test]
    fn test_version_greater_or_equal() {
        let v = ServerVersion::new("10.1.2", true);
        assert!(v.version_greater_or_equal(10, 1, 2));
        assert!(v.version_greater_or_equal(10, 0, 99));
        assert!(v.version_greater_or_equal(5, 6, 5));
        assert!(!v.version_greater_or_equal(10, 1, 3));
        assert!(!v.version_greater_or_equal(11, 0, 0));
    }
}
