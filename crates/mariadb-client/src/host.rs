//! Host address lists.
//!
//! A host specification is a comma separated list where each entry is either
//! the simple form (`host`, `host:port`, `[ipv6]`, `[ipv6]:port`) or the
//! parameter form `address=(host=h)(port=p)(type=primary|replica)`.

use std::fmt;

use mariadb_core::error::{ConfigError, Error};
use mariadb_core::Result;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3306;

/// One server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
    /// `false` for replica endpoints, which get a read-only session.
    pub primary: bool,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            primary: true,
        }
    }

    /// Parse a comma separated host list.
    pub fn parse(spec: &str) -> Result<Vec<HostAddress>> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Vec::new());
        }
        spec.split(',')
            .map(str::trim)
            .map(|token| {
                if token.starts_with("address=") {
                    parse_parameter_address(token)
                } else {
                    parse_simple_address(token)
                }
            })
            .collect()
    }
}

fn parse_simple_address(token: &str) -> Result<HostAddress> {
    if let Some(rest) = token.strip_prefix('[') {
        // IPv6 literal
        let Some(end) = rest.find(']') else {
            return Err(config_error(format!(
                "Invalid IPv6 address '{token}', missing closing bracket."
            )));
        };
        let host = &rest[..end];
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(port) => parse_port(port)?,
            None => DEFAULT_PORT,
        };
        return Ok(HostAddress::new(host, port));
    }

    match token.split_once(':') {
        Some((host, port)) => Ok(HostAddress::new(host, parse_port(port)?)),
        None => Ok(HostAddress::new(token, DEFAULT_PORT)),
    }
}

fn parse_parameter_address(token: &str) -> Result<HostAddress> {
    let compact: String = token.chars().filter(|c| *c != ' ').collect();
    let mut address = HostAddress::new(String::new(), DEFAULT_PORT);

    // "address=(host=a)(port=1)" -> ["host=a", "port=1"]
    let params = compact["address=".len()..]
        .split_inclusive(')')
        .filter(|part| !part.is_empty());

    for part in params {
        let pair = part.replace(['(', ')'], "");
        let mut kv = pair.trim().split('=');
        let (Some(key), Some(value), None) = (kv.next(), kv.next(), kv.next()) else {
            return Err(config_error(format!(
                "Invalid connection URL, expected key=value pairs, found '{part}'."
            )));
        };
        let value = value.to_ascii_lowercase();

        match key.to_ascii_lowercase().as_str() {
            "host" => address.host = value.replace(['[', ']'], ""),
            "port" => address.port = parse_port(&value)?,
            "type" => {
                address.primary = match value.as_str() {
                    "master" | "primary" => true,
                    "slave" | "replica" => false,
                    _ => {
                        return Err(config_error(format!(
                            "Invalid type value '{part}' (possible value primary/replica)."
                        )));
                    }
                };
            }
            _ => {}
        }
    }
    Ok(address)
}

fn parse_port(port: &str) -> Result<u16> {
    port.trim()
        .parse()
        .map_err(|_| config_error(format!("Port has wrong int32 value '{port}'.")))
}

fn config_error(message: String) -> Error {
    Error::Config(ConfigError {
        message,
        source: None,
    })
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "address=(host={})(port={})(type={})",
            self.host,
            self.port,
            if self.primary { "primary" } else { "replica" }
        )
    }
}
