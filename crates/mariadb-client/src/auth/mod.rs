//! Authentication plugins.
//!
//! The server names the plugin in its handshake, or later in an
//! authentication switch request. Each plugin is initialized with the password
//! and the server seed, then drives its part of the exchange and returns the
//! packet that follows it (OK, error, or another switch request).

pub mod caching_sha2;
pub mod clear;
pub mod native;

use std::fmt;

use mariadb_core::Result;

use crate::config::MariaDbConfig;
use crate::context::Context;
use crate::error_mapping::ExceptionFactory;
use crate::protocol::{PacketReader, PacketWriter};

pub use caching_sha2::CachingSha2PasswordPlugin;
pub use clear::ClearPasswordPlugin;
pub use native::NativePasswordPlugin;

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// One authentication method.
pub trait AuthenticationPlugin: fmt::Debug + Send {
    /// Name the server uses for this plugin.
    fn name(&self) -> &'static str;

    /// Does the plugin send the password in a form only safe over TLS?
    fn requires_ssl(&self) -> bool {
        false
    }

    fn initialize(&mut self, password: Option<&str>, seed: &[u8], config: &MariaDbConfig);

    /// Send the authentication data and return the next server packet.
    ///
    /// The writer sequence must already continue the server's last packet.
    fn process(
        &mut self,
        writer: &mut PacketWriter,
        reader: &mut PacketReader,
        context: &Context,
    ) -> Result<Vec<u8>>;
}

/// Look up the plugin the server requested.
///
/// `restricted_auth` is a comma separated allow-list; when set, plugins that
/// are not listed are refused even if supported.
pub fn plugin_for(
    name: &str,
    restricted_auth: Option<&str>,
    exception_factory: &ExceptionFactory,
) -> Result<Box<dyn AuthenticationPlugin>> {
    if let Some(allowed) = restricted_auth.filter(|s| !s.trim().is_empty()) {
        if !allowed.split(',').any(|p| p.trim() == name) {
            return Err(exception_factory.from_server(
                &format!(
                    "Client restrict authentication plugin to a limited set of authentication \
                     plugin and doesn't permit requested plugin ('{name}'). Current list is \
                     `restrictedAuth={allowed}`"
                ),
                "08004",
                1251,
            ));
        }
    }

    match name {
        plugins::MYSQL_NATIVE_PASSWORD => Ok(Box::new(NativePasswordPlugin::default())),
        plugins::CACHING_SHA2_PASSWORD => Ok(Box::new(CachingSha2PasswordPlugin::default())),
        plugins::MYSQL_CLEAR_PASSWORD => Ok(Box::new(ClearPasswordPlugin::default())),
        _ => Err(exception_factory.from_server(
            &format!(
                "Client does not support authentication protocol requested by server. \
                 plugin type was = '{name}'"
            ),
            "08004",
            1251,
        )),
    }
}

/// Strip the NUL terminating a 20-byte scramble.
pub(crate) fn trim_seed(seed: &[u8]) -> &[u8] {
    match seed.split_last() {
        Some((0, rest)) if seed.len() > 20 => rest,
        _ => seed,
    }
}

/// Write one authentication packet continuing the server's sequence.
pub(crate) fn send_auth_data(
    writer: &mut PacketWriter,
    reader: &PacketReader,
    data: &[u8],
) -> Result<()> {
    writer.set_sequence(reader.sequence());
    if data.is_empty() {
        return writer.write_empty_packet();
    }
    writer.permit_trace(false);
    let sent = writer.write_bytes(data).and_then(|()| writer.flush());
    writer.permit_trace(true);
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use mariadb_core::Error;

    #[test]
    fn test_plugin_lookup() {
        let factory = ExceptionFactory::default();
        for name in [
            plugins::MYSQL_NATIVE_PASSWORD,
            plugins::CACHING_SHA2_PASSWORD,
            plugins::MYSQL_CLEAR_PASSWORD,
        ] {
            let plugin = plugin_for(name, None, &factory).unwrap();
            assert_eq!(plugin.name(), name);
        }
    }

    #[test]
    fn test_unknown_plugin() {
        let factory = ExceptionFactory::default();
        let err = plugin_for("dialog", None, &factory).unwrap_err();
        assert_eq!(err.sqlstate(), Some("08004"));
        assert_eq!(err.code(), Some(1251));
        assert!(err.to_string().contains("plugin type was = 'dialog'"));
    }

    #[test]
    fn test_restricted_auth() {
        let factory = ExceptionFactory::default();
        let allowed = "caching_sha2_password, mysql_native_password";
        assert!(plugin_for(plugins::MYSQL_NATIVE_PASSWORD, Some(allowed), &factory).is_ok());

        let err = plugin_for(plugins::MYSQL_CLEAR_PASSWORD, Some(allowed), &factory).unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(err.to_string().contains("doesn't permit requested plugin"));

        // an empty list restricts nothing
        assert!(plugin_for(plugins::MYSQL_CLEAR_PASSWORD, Some(""), &factory).is_ok());
    }

    #[test]
    fn test_trim_seed() {
        let mut seed = vec![7u8; 20];
        assert_eq!(trim_seed(&seed).len(), 20);
        seed.push(0);
        assert_eq!(trim_seed(&seed).len(), 20);
        let short = [1u8, 2, 0];
        assert_eq!(trim_seed(&short), &short[..]);
    }
}
