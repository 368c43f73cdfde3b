use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::types::{DeviceId, DeviceStatus, PowerState};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONTROL_PATH: &str = "/form/control_cgi";
const QUERY_BODY: &str = "QueryControl";
const POWER_ON_BODY: &str = "btn_powon=Power On";
const POWER_OFF_BODY: &str = "btn_powoff=Power Off";

/// Reply to a control form post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    /// HTTP status code, if the status line could be read
    pub status: Option<u16>,
    pub body: String,
}

impl ControlReply {
    /// Parse the raw bytes the projector sent before closing the connection.
    ///
    /// The projector's HTTP is loose: headers may end with a bare blank line
    /// and the body may start with a stray `<html>` line.
    pub fn parse(raw: &str) -> Self {
        let status = raw
            .lines()
            .next()
            .filter(|line| line.starts_with("HTTP"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok());

        let body_start = [("\r\n\r\n", 4), ("\n\n", 2)]
            .iter()
            .filter_map(|(sep, len)| raw.find(sep).map(|pos| pos + len))
            .min();
        let mut body = body_start.map(|start| &raw[start..]).unwrap_or("");
        for prefix in ["<html>\r\n", "<html>\n"] {
            if let Some(rest) = body.strip_prefix(prefix) {
                body = rest;
            }
        }

        Self {
            status,
            body: body.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }
}

/// Extract power from the `pw:"0"` / `pw:"1"` field of a status page
pub fn parse_power(body: &str) -> Result<PowerState> {
    let field = body
        .find("pw:\"")
        .map(|pos| &body[pos + 4..])
        .ok_or_else(|| RelayError::ParseFailure("no pw field in projector status".to_string()))?;
    match field.get(..2) {
        Some("0\"") => Ok(PowerState::Off),
        Some("1\"") => Ok(PowerState::On),
        _ => Err(RelayError::ParseFailure(format!(
            "unexpected pw value {:?}",
            field.chars().take(4).collect::<String>()
        ))),
    }
}

/// Build the control form post for `body`
pub fn control_request(host: &str, body: &str) -> String {
    format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        CONTROL_PATH,
        host,
        body.len(),
        body
    )
}

/// One projector, reached with a fresh connection per call
#[derive(Debug, Clone)]
pub struct ProjectorAdapter {
    id: DeviceId,
    host: String,
    port: u16,
    response_timeout: Duration,
}

impl ProjectorAdapter {
    pub fn new(id: impl Into<DeviceId>, host: impl Into<String>, port: u16, response_timeout: Duration) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            response_timeout,
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub async fn query_power(&self) -> DeviceStatus {
        let power = match self.exchange(QUERY_BODY).await.and_then(|reply| parse_power(&reply.body)) {
            Ok(power) => power,
            Err(e) => {
                tracing::warn!(device = %self.id, "Cannot get projector status: {}", e);
                PowerState::Unknown
            }
        };
        DeviceStatus { power }
    }

    pub async fn set_power(&self, on: bool) -> bool {
        let body = if on { POWER_ON_BODY } else { POWER_OFF_BODY };
        match self.exchange(body).await {
            Ok(reply) if reply.is_success() => {
                tracing::info!(device = %self.id, "Projector power {}", if on { "on" } else { "off" });
                true
            }
            Ok(reply) => {
                tracing::warn!(device = %self.id, "Projector rejected power change: status {:?}", reply.status);
                false
            }
            Err(e) => {
                tracing::warn!(device = %self.id, "Projector power change failed: {}", e);
                false
            }
        }
    }

    /// Post `body` and read until the projector closes the connection
    async fn exchange(&self, body: &str) -> Result<ControlReply> {
        let exchange = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            let request = control_request(&self.host, body);
            tracing::debug!(device = %self.id, "-> {:?}", body);
            stream.write_all(request.as_bytes()).await?;

            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => raw.extend_from_slice(&buf[..n]),
                    // Some firmware resets instead of closing once the page is sent.
                    Err(e) if !raw.is_empty() => {
                        tracing::debug!(device = %self.id, "Read ended with {}", e);
                        break;
                    }
                    Err(e) => return Err(RelayError::Io(e)),
                }
            }
            Ok::<_, RelayError>(ControlReply::parse(&String::from_utf8_lossy(&raw)))
        };

        timeout(self.response_timeout, exchange)
            .await
            .map_err(|_| RelayError::Timeout)?
    }
}

/// All configured projectors, keyed by id
#[derive(Debug, Clone, Default)]
pub struct ProjectorService {
    projectors: BTreeMap<DeviceId, ProjectorAdapter>,
}

impl ProjectorService {
    pub fn new(projectors: impl IntoIterator<Item = ProjectorAdapter>) -> Self {
        Self {
            projectors: projectors.into_iter().map(|p| (p.id().clone(), p)).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.projector_entries().into_iter().map(|(id, endpoint)| {
            ProjectorAdapter::new(id, endpoint.ip, config.relay.projector_port, config.relay.response_timeout())
        }))
    }

    pub fn get(&self, id: &str) -> Option<&ProjectorAdapter> {
        self.projectors.get(id)
    }

    /// Query every projector concurrently
    pub async fn get_all_status(&self) -> BTreeMap<DeviceId, DeviceStatus> {
        let queries = self
            .projectors
            .values()
            .map(|p| async move { (p.id().clone(), p.query_power().await) });
        join_all(queries).await.into_iter().collect()
    }

    pub async fn set_power(&self, id: &str, on: bool) -> Result<bool> {
        let projector = self.get(id).ok_or_else(|| RelayError::UnknownDevice(id.to_string()))?;
        Ok(projector.set_power(on).await)
    }
}
