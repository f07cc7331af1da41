//! `mysql_native_password`.
//!
//! Scramble: `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`.

use mariadb_core::Result;
use sha1::{Digest, Sha1};

use super::{AuthenticationPlugin, plugins, send_auth_data, trim_seed};
use crate::config::MariaDbConfig;
use crate::context::Context;
use crate::protocol::{PacketReader, PacketWriter};

#[derive(Debug, Default)]
pub struct NativePasswordPlugin {
    password: Option<String>,
    seed: Vec<u8>,
}

impl AuthenticationPlugin for NativePasswordPlugin {
    fn name(&self) -> &'static str {
        plugins::MYSQL_NATIVE_PASSWORD
    }

    fn initialize(&mut self, password: Option<&str>, seed: &[u8], _config: &MariaDbConfig) {
        self.password = password.map(str::to_string);
        self.seed = trim_seed(seed).to_vec();
    }

    fn process(
        &mut self,
        writer: &mut PacketWriter,
        reader: &mut PacketReader,
        _context: &Context,
    ) -> Result<Vec<u8>> {
        let password = self.password.as_deref().unwrap_or_default();
        send_auth_data(writer, reader, &native_password(password, &self.seed))?;
        reader.read_packet()
    }
}

/// Compute the `mysql_native_password` response; empty without a password.
pub fn native_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}
