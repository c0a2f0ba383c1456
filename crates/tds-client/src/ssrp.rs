//! SQL Server Resolution Protocol.
//!
//! The SQL Server Browser answers UDP requests on port 1434 with the
//! connection details of the instances on a host. Requests are a single
//! type byte, optionally followed by a NUL-terminated instance name.
//! Responses start with `0x05` and a little-endian `u16` length, followed
//! by `;`-separated key/value pairs; each instance record ends with `;;`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// UDP port of the SQL Server Browser.
pub const BROWSER_PORT: u16 = 1434;

const CLNT_UCAST_EX: u8 = 0x03;
const CLNT_UCAST_INST: u8 = 0x04;
const CLNT_UCAST_DAC: u8 = 0x0F;
const SVR_RESP: u8 = 0x05;
const DAC_PROTOCOL_VERSION: u8 = 0x01;

/// Largest response the browser sends.
const MAX_RESPONSE: usize = 65535 + 3;

/// Request for every instance on the host.
#[must_use]
pub fn list_request() -> Vec<u8> {
    vec![CLNT_UCAST_EX]
}

/// Request for one named instance.
#[must_use]
pub fn instance_request(instance: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(instance.len() + 2);
    msg.push(CLNT_UCAST_INST);
    msg.extend_from_slice(instance.as_bytes());
    msg.push(0);
    msg
}

/// Request for the dedicated admin connection port of an instance.
#[must_use]
pub fn dac_request(instance: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(instance.len() + 3);
    msg.push(CLNT_UCAST_DAC);
    msg.push(DAC_PROTOCOL_VERSION);
    msg.extend_from_slice(instance.as_bytes());
    msg.push(0);
    msg
}

/// One instance record, keyed by property name (`ServerName`,
/// `InstanceName`, `tcp`, `Version`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceInfo {
    properties: HashMap<String, String>,
}

impl InstanceInfo {
    /// Property `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get("InstanceName")
    }

    /// TCP port, when the instance listens on TCP.
    #[must_use]
    pub fn tcp_port(&self) -> Option<u16> {
        self.get("tcp").and_then(|p| p.parse().ok())
    }
}

/// Parse a browser response into its instance records.
pub fn parse_response(buf: &[u8]) -> Result<Vec<InstanceInfo>> {
    let [kind, lo, hi, body @ ..] = buf else {
        return Err(malformed("short response"));
    };
    if *kind != SVR_RESP {
        return Err(malformed("unexpected response type"));
    }
    let len = usize::from(u16::from_le_bytes([*lo, *hi]));
    let body = body.get(..len).unwrap_or(body);
    let text = String::from_utf8_lossy(body);

    let mut instances = Vec::new();
    for record in text.split(";;").filter(|r| !r.trim().is_empty()) {
        let mut info = InstanceInfo::default();
        let mut parts = record.split(';');
        while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            info.properties.insert(key.to_owned(), value.to_owned());
        }
        instances.push(info);
    }
    Ok(instances)
}

/// Parse the response to a DAC request: `0x05`, length 6, version, port.
pub fn parse_dac_response(buf: &[u8]) -> Result<u16> {
    match buf {
        [SVR_RESP, 0x06, 0x00, DAC_PROTOCOL_VERSION, lo, hi, ..] => {
            Ok(u16::from_le_bytes([*lo, *hi]))
        }
        _ => Err(malformed("bad DAC response")),
    }
}

fn malformed(what: &str) -> Error {
    Error::Connection(format!("SQL Server Browser: {what}"))
}

/// Send `request` to the browser on `host` and wait `timeout` for the answer.
pub async fn query(host: &str, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    let addrs: Vec<_> = tokio::net::lookup_host((host, BROWSER_PORT))
        .await?
        .collect();
    let addr = addrs
        .first()
        .ok_or_else(|| Error::Connection(format!("cannot resolve {host}")))?;
    exchange(*addr, request, timeout).await
}

async fn exchange(addr: SocketAddr, request: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(local).await?;
    socket.send_to(request, addr).await?;
    trace!(%addr, len = request.len(), "browser request sent");

    let mut buf = vec![0u8; MAX_RESPONSE];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::Timeout)??;
    buf.truncate(len);
    Ok(buf)
}

/// TCP port of `instance` on `host`.
pub async fn resolve_port(host: &str, instance: &str, timeout: Duration) -> Result<u16> {
    let response = query(host, &instance_request(instance), timeout).await?;
    let port = parse_response(&response)?
        .iter()
        .find(|i| i.name().is_some_and(|n| n.eq_ignore_ascii_case(instance)))
        .and_then(InstanceInfo::tcp_port)
        .ok_or_else(|| Error::Connection(format!("instance {instance} has no TCP port")))?;
    debug!(host, instance, port, "resolved instance port");
    Ok(port)
}
