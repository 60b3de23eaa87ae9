//! PING and VERSION exchanges

use clamstream_protocol::wire::{response_text, Command, PONG};
use clamstream_protocol::VersionInfo;
use tracing::{debug, trace};

use crate::endpoint::{Endpoint, Timeout};
use crate::error::Result;
use crate::transport::Connection;

/// Send one command and return its sentinel-terminated reply
fn exchange(command: Command, endpoint: &Endpoint, timeout: Timeout) -> Result<String> {
    let mut conn = Connection::connect(endpoint)?;
    let reply = conn
        .send_command(command)
        .and_then(|()| conn.read_until_sentinel(timeout));
    conn.close();
    Ok(response_text(&reply?))
}

/// Check whether the daemon answers PING with PONG
///
/// Never fails: an unreachable, slow or confused daemon is simply not alive.
pub fn ping(endpoint: &Endpoint, timeout: Timeout) -> bool {
    match exchange(Command::Ping, endpoint, timeout) {
        Ok(reply) if reply == PONG => {
            trace!(%endpoint, "daemon alive");
            true
        }
        Ok(reply) => {
            debug!(%endpoint, "unexpected ping reply: {:?}", reply);
            false
        }
        Err(e) => {
            debug!(%endpoint, "ping failed: {}", e);
            false
        }
    }
}

/// Ask the daemon for its engine and signature database version
///
/// # Errors
///
/// `Connection`/`Timeout` for transport failures and `MalformedVersion` if
/// the reply is not `<client>/<database version>/<database date>`.
pub fn version(endpoint: &Endpoint, timeout: Timeout) -> Result<VersionInfo> {
    let reply = exchange(Command::Version, endpoint, timeout)?;
    Ok(VersionInfo::parse(&reply)?)
}
