//! SMTP client connection with support for STARTTLS.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};

use super::error::{ClientError, Result};
use super::response::Response;
use super::tls;

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer, to bound a misbehaving server (1 MiB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An SMTP connection that can be either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.flush().await?,
            Self::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    /// Upgrades a plain connection to TLS.
    ///
    /// Returns the wrapped connection and whether the server certificate
    /// validated for `domain` against the trust store.
    async fn upgrade_to_tls(
        self,
        domain: &str,
        extra_roots: &[CertificateDer<'static>],
    ) -> Result<(Self, bool)> {
        match self {
            Self::Plain(stream) => {
                let (connector, verdict) = tls::connector(extra_roots)?;
                let server_name = ServerName::try_from(domain.to_string())
                    .map_err(|e| ClientError::Tls(format!("invalid server name: {e}")))?;

                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ClientError::Tls(e.to_string()))?;

                let valid = verdict.load(std::sync::atomic::Ordering::Relaxed);
                Ok((Self::Tls(Box::new(tls_stream)), valid))
            }
            Self::Tls(_) => Err(ClientError::Tls("connection is already TLS".to_string())),
        }
    }
}

/// An SMTP client for sending commands and receiving responses.
///
/// The client is deliberately policy-free: negative replies come back as
/// parsed [`Response`]s, and TLS certificate validity is reported via
/// [`SmtpClient::tls_verified`] instead of failing the handshake.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_name: String,
    extra_roots: Vec<CertificateDer<'static>>,
    tls_verified: Option<bool>,
}

impl SmtpClient {
    /// Connect to `addr` (a `host:port` pair).
    ///
    /// `server_name` is the name used for SNI and certificate validation
    /// on a later STARTTLS upgrade; for MX delivery it is the MX host.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection fails.
    pub async fn connect(addr: &str, server_name: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Io)?;

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_name: server_name.into(),
            extra_roots: Vec::new(),
            tls_verified: None,
        })
    }

    /// Additional trust roots for certificate validation, on top of the
    /// system store. Used by tests and pinned-CA deployments.
    #[must_use]
    pub fn with_extra_roots(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.extra_roots = roots;
        self
    }

    /// Certificate validity of the current connection.
    ///
    /// `None` while plaintext; after a STARTTLS upgrade, whether the
    /// server certificate validated for the server name.
    #[must_use]
    pub const fn tls_verified(&self) -> Option<bool> {
        self.tls_verified
    }

    /// Reads the initial server greeting (a 220 response).
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Sends a raw command line and reads the response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        let data = format!("{command}\r\n");
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(data.as_bytes()).await?;
        connection.flush().await?;
        self.read_response().await
    }

    /// Sends EHLO with the given hello name.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, hello: &str) -> Result<Response> {
        self.command(&format!("EHLO {hello}")).await
    }

    /// Sends MAIL FROM.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// Sends RCPT TO.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// Sends DATA. The caller should expect a 354 before streaming the
    /// message via [`SmtpClient::send_data`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Streams the message body with dot-stuffing, terminates it with
    /// `CRLF.CRLF`, and reads the final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn send_data(&mut self, data: &[u8]) -> Result<Response> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;

        let stuffed = dot_stuff(data);
        connection.send(&stuffed).await?;

        if !stuffed.ends_with(b"\r\n") {
            connection.send(b"\r\n").await?;
        }
        connection.send(b".\r\n").await?;
        connection.flush().await?;

        self.read_response().await
    }

    /// Sends QUIT.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Sends STARTTLS and, on a 220, upgrades the connection to TLS.
    ///
    /// A rejection is not an error: the unmodified response comes back
    /// and the connection stays plaintext. A TLS-layer handshake failure
    /// is `ClientError::Tls`; the connection is unusable afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or the TLS upgrade fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;
            let (connection, valid) = connection
                .upgrade_to_tls(&self.server_name, &self.extra_roots)
                .await?;
            self.connection = Some(connection);
            self.tls_verified = Some(valid);
            // Discard any plaintext bytes left over from before the
            // upgrade (RFC 3207 section 4.2).
            self.buffer_pos = 0;
        }

        Ok(response)
    }

    /// Reads a complete SMTP response from the server.
    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::Parse(format!(
                        "response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Double every dot that starts a line (RFC 5321 section 4.5.2).
fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut at_line_start = true;
    for &b in data {
        if at_line_start && b == b'.' {
            out.push(b'.');
        }
        out.push(b);
        at_line_start = b == b'\n';
    }
    out
}
