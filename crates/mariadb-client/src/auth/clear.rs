//! `mysql_clear_password`: the password followed by a NUL.

use mariadb_core::Result;

use super::{AuthenticationPlugin, plugins, send_auth_data};
use crate::config::MariaDbConfig;
use crate::context::Context;
use crate::protocol::{PacketReader, PacketWriter};

#[derive(Debug, Default)]
pub struct ClearPasswordPlugin {
    password: Option<String>,
}

impl AuthenticationPlugin for ClearPasswordPlugin {
    fn name(&self) -> &'static str {
        plugins::MYSQL_CLEAR_PASSWORD
    }

    fn requires_ssl(&self) -> bool {
        true
    }

    fn initialize(&mut self, password: Option<&str>, _seed: &[u8], _config: &MariaDbConfig) {
        self.password = password.map(str::to_string);
    }

    fn process(
        &mut self,
        writer: &mut PacketWriter,
        reader: &mut PacketReader,
        _context: &Context,
    ) -> Result<Vec<u8>> {
        let mut data = self.password.as_deref().unwrap_or_default().as_bytes().to_vec();
        data.push(0);
        send_auth_data(writer, reader, &data)?;
        reader.read_packet()
    }
}
