//! Value delivery transports
//!
//! - **SocketSender**: speaks the sender protocol directly over TCP (no transport security)
//! - **ExternalToolSender**: shells out to the sender tool when PSK or certificate
//!   transport is configured
//!
//! Both implement [`ValueSender`], so a native TLS/PSK socket can replace the tool
//! later without touching callers.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, trace, warn};

use crate::config::{SinkConfig, TlsConnect};

use super::error::{SinkError, SinkResult};
use super::point::DataPoint;
use super::protocol::{self, HEADER_LEN, ProcessedInfo, SenderResponse};

/// A transport that pushes a batch of values in one exchange
#[async_trait]
pub trait ValueSender: Send + Sync {
    /// Short transport name for logs
    fn name(&self) -> &'static str;

    /// Delivers all points; succeeds only if every point was processed.
    async fn send(&self, points: &[DataPoint]) -> SinkResult<ProcessedInfo>;
}

/// Picks the transport matching the configured transport security.
pub fn sender_for(config: &SinkConfig) -> Box<dyn ValueSender> {
    if config.uses_encrypted_transport() {
        Box::new(ExternalToolSender::new(config))
    } else {
        Box::new(SocketSender::new(
            config.server.clone(),
            config.port,
            config.timeout(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct SocketSender {
    server: String,
    port: u16,
    timeout: Duration,
}

impl SocketSender {
    pub fn new(server: String, port: u16, timeout: Duration) -> Self {
        Self {
            server,
            port,
            timeout,
        }
    }

    async fn exchange(&self, packet: &[u8]) -> SinkResult<SenderResponse> {
        trace!("connecting to {}:{}", self.server, self.port);
        let mut stream = TcpStream::connect((self.server.as_str(), self.port)).await?;
        stream.write_all(packet).await?;

        let mut header = [0u8; HEADER_LEN];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| SinkError::Protocol(format!("invalid response header: {e}")))?;
        let length = protocol::parse_header(&header)?;

        let mut body = vec![0u8; length];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|e| SinkError::Protocol(format!("incomplete response body: {e}")))?;

        let response: SenderResponse = serde_json::from_slice(&body)?;
        debug!("sink response: {response:?}");
        Ok(response)
    }
}

#[async_trait]
impl ValueSender for SocketSender {
    fn name(&self) -> &'static str {
        "socket"
    }

    #[instrument(skip(self, points), fields(server = %self.server, points = points.len()))]
    async fn send(&self, points: &[DataPoint]) -> SinkResult<ProcessedInfo> {
        if points.is_empty() {
            return Ok(ProcessedInfo::default());
        }

        let packet = protocol::encode_request(points)?;
        let response = timeout(self.timeout, self.exchange(&packet))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))??;

        response.verify(points.len())
    }
}

/// Transport security parameters handed to the external tool
#[derive(Debug, Clone)]
struct TlsSettings {
    connect: TlsConnect,
    psk_identity: Option<String>,
    psk_file: Option<PathBuf>,
    psk_key: Option<String>,
    ca_file: Option<PathBuf>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ExternalToolSender {
    binary: String,
    server: String,
    port: u16,
    timeout: Duration,
    tls: TlsSettings,
}

/// PSK material for one invocation; a temporary file is removed on drop.
enum PskSource<'a> {
    Existing(&'a Path),
    Temporary(NamedTempFile),
}

impl PskSource<'_> {
    fn path(&self) -> &Path {
        match self {
            PskSource::Existing(path) => path,
            PskSource::Temporary(file) => file.path(),
        }
    }
}

impl ExternalToolSender {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            binary: config.sender_binary.clone(),
            server: config.server.clone(),
            port: config.port,
            timeout: config.timeout(),
            tls: TlsSettings {
                connect: config.tls_connect,
                psk_identity: config.tls_psk_identity.clone(),
                psk_file: config.tls_psk_file.clone(),
                psk_key: config.psk_key.clone(),
                ca_file: config.tls_ca_file.clone(),
                cert_file: config.tls_cert_file.clone(),
                key_file: config.tls_key_file.clone(),
            },
        }
    }

    /// Newline-delimited `host key value` input file.
    fn write_data_file(points: &[DataPoint]) -> SinkResult<NamedTempFile> {
        let mut file = tempfile::Builder::new().prefix("sender-data-").tempfile()?;
        for point in points {
            writeln!(
                file,
                "{} {} {}",
                quote_field(&point.host),
                quote_field(&point.key),
                point.value
            )?;
        }
        file.flush()?;
        Ok(file)
    }

    fn psk_source(&self) -> SinkResult<PskSource<'_>> {
        if let Some(path) = self.tls.psk_file.as_deref().filter(|path| path.exists()) {
            return Ok(PskSource::Existing(path));
        }

        let Some(key) = &self.tls.psk_key else {
            return Err(SinkError::ExternalTool(String::from(
                "no usable PSK file and no PSK key configured",
            )));
        };

        let mut file = tempfile::Builder::new().prefix("sender-psk-").tempfile()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(key.trim().as_bytes())?;
        file.flush()?;
        Ok(PskSource::Temporary(file))
    }

    fn command(&self, data_file: &Path, psk: Option<&PskSource<'_>>) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-z")
            .arg(&self.server)
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-i")
            .arg(data_file)
            .arg("-v")
            .kill_on_drop(true);

        match self.tls.connect {
            TlsConnect::Unencrypted => {}
            TlsConnect::Psk => {
                command
                    .arg("--tls-connect")
                    .arg("psk")
                    .arg("--tls-psk-identity")
                    .arg(self.tls.psk_identity.as_deref().unwrap_or_default());
                if let Some(psk) = psk {
                    command.arg("--tls-psk-file").arg(psk.path());
                }
            }
            TlsConnect::Cert => {
                command.arg("--tls-connect").arg("cert");
                for (flag, path) in [
                    ("--tls-ca-file", &self.tls.ca_file),
                    ("--tls-cert-file", &self.tls.cert_file),
                    ("--tls-key-file", &self.tls.key_file),
                ] {
                    if let Some(path) = path {
                        command.arg(flag).arg(path);
                    }
                }
            }
        }

        command
    }
}

#[async_trait]
impl ValueSender for ExternalToolSender {
    fn name(&self) -> &'static str {
        "external-tool"
    }

    #[instrument(skip(self, points), fields(server = %self.server, points = points.len()))]
    async fn send(&self, points: &[DataPoint]) -> SinkResult<ProcessedInfo> {
        if points.is_empty() {
            return Ok(ProcessedInfo::default());
        }

        // both temporary files live until the end of this scope
        let data_file = Self::write_data_file(points)?;
        let psk = match self.tls.connect {
            TlsConnect::Psk => Some(self.psk_source()?),
            _ => None,
        };

        let mut command = self.command(data_file.path(), psk.as_ref());
        debug!("executing {} for {} values", self.binary, points.len());

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))?
            .map_err(|e| SinkError::ExternalTool(format!("failed to run {}: {e}", self.binary)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        trace!("sender stdout: {stdout}");
        if !stderr.is_empty() {
            trace!("sender stderr: {stderr}");
        }

        if !output.status.success() {
            warn!("{} exited with {}", self.binary, output.status);
            return Err(SinkError::ExternalTool(format!(
                "{} exited with {}: {} {}",
                self.binary,
                output.status,
                stdout.trim(),
                stderr.trim()
            )));
        }

        ProcessedInfo::parse_tool_output(&stdout)
            .ok_or_else(|| SinkError::Protocol(format!("unparsable sender output: {stdout}")))?
            .verify(points.len())
    }
}

/// Quotes a field of the input file when it contains blanks or quotes.
fn quote_field(field: &str) -> String {
    if field.is_empty() || field.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        let escaped = field.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        field.to_string()
    }
}
