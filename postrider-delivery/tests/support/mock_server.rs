//! Mock SMTP server for testing delivery scenarios.
//!
//! Supports scripted per-command responses, a hanging greeting for
//! timeout tests, and STARTTLS backed by a freshly generated CA so
//! tests can choose whether the client trusts the server certificate.

#![allow(dead_code)] // Test utility module; not every test uses everything.

use std::net::SocketAddr;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// A scripted `(code, text)` reply.
#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.text).into_bytes()
    }
}

/// Server certificate plus the CA that signed it.
struct TlsFixture {
    acceptor: TlsAcceptor,
    ca_der: CertificateDer<'static>,
}

impl TlsFixture {
    fn new() -> Self {
        let ca_key = rcgen::KeyPair::generate().expect("generate CA key");
        let mut ca_params =
            rcgen::CertificateParams::new(Vec::<String>::new()).expect("CA params");
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign CA");

        let server_key = rcgen::KeyPair::generate().expect("generate server key");
        let server_params =
            rcgen::CertificateParams::new(vec!["localhost".to_string()]).expect("server params");
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .expect("sign server cert");

        let config = tokio_rustls::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![server_cert.der().clone()],
                PrivateKeyDer::Pkcs8(server_key.serialize_der().into()),
            )
            .expect("server TLS config");

        Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            ca_der: ca_cert.der().clone(),
        }
    }
}

struct MockServerConfig {
    greeting: Reply,
    /// Write the greeting without a line ending and go silent.
    greeting_hangs: bool,
    ehlo_code: u16,
    /// EHLO capability lines after the hostname line.
    capabilities: Vec<String>,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    quit: Reply,
    /// Reply to STARTTLS; when set, STARTTLS is advertised in EHLO.
    starttls: Option<Reply>,
    /// When set (together with a 2xx `starttls` reply), the connection
    /// is upgraded after the reply.
    tls: Option<TlsFixture>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock server ready"),
            greeting_hangs: false,
            ehlo_code: 250,
            capabilities: vec!["SIZE 10240000".to_string()],
            mail_from: Reply::new(250, "ok"),
            rcpt_to: Reply::new(250, "ok"),
            data: Reply::new(354, "send it"),
            data_end: Reply::new(250, "message accepted"),
            quit: Reply::new(221, "bye"),
            starttls: None,
            tls: None,
        }
    }
}

struct ServerState {
    config: MockServerConfig,
    commands: RwLock<Vec<String>>,
    messages: RwLock<Vec<Vec<u8>>>,
    connections: AtomicUsize,
    shutdown: AtomicBool,
}

enum SessionEnd {
    Closed,
    UpgradeTls,
}

/// Mock SMTP server bound to an ephemeral localhost port.
pub struct MockSmtpServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The CA certificate behind the STARTTLS fixture, for clients that
    /// should trust the server.
    pub fn root_ca(&self) -> Option<CertificateDer<'static>> {
        self.state.config.tls.as_ref().map(|t| t.ca_der.clone())
    }

    /// All command lines received, across connections.
    pub async fn commands(&self) -> Vec<String> {
        self.state.commands.read().await.clone()
    }

    /// Message bodies received via DATA, raw as sent (dot-stuffed).
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.state.messages.read().await.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.state.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
        state.connections.fetch_add(1, Ordering::Relaxed);
        let mut stream = stream;

        if state.config.greeting_hangs {
            let text = format!("{} {}", state.config.greeting.code, state.config.greeting.text);
            stream.write_all(text.as_bytes()).await?;
            stream.flush().await?;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(());
        }

        stream.write_all(&state.config.greeting.to_bytes()).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        match Self::run_session(&mut reader, &state).await? {
            SessionEnd::Closed => Ok(()),
            SessionEnd::UpgradeTls => {
                let acceptor = state
                    .config
                    .tls
                    .as_ref()
                    .expect("UpgradeTls without TLS fixture")
                    .acceptor
                    .clone();
                let tls_stream = acceptor.accept(reader.into_inner()).await?;
                let mut reader = BufReader::new(tls_stream);
                Self::run_session(&mut reader, &state).await?;
                Ok(())
            }
        }
    }

    async fn run_session<S: AsyncRead + AsyncWrite + Unpin>(
        reader: &mut BufReader<S>,
        state: &ServerState,
    ) -> std::io::Result<SessionEnd> {
        let config = &state.config;
        let mut line = String::new();

        loop {
            line.clear();
            let n = timeout(Duration::from_secs(10), reader.read_line(&mut line))
                .await
                .unwrap_or(Ok(0))?;
            if n == 0 {
                return Ok(SessionEnd::Closed);
            }

            let cmd_line = line.trim().to_string();
            state.commands.write().await.push(cmd_line.clone());
            let command = cmd_line
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_uppercase();

            let reply = match command.as_str() {
                "EHLO" | "HELO" => {
                    let mut response = String::new();
                    let mut lines = vec!["mock".to_string()];
                    lines.extend(config.capabilities.clone());
                    if config.starttls.is_some() {
                        lines.push("STARTTLS".to_string());
                    }
                    let last = lines.len() - 1;
                    for (i, cap) in lines.iter().enumerate() {
                        let sep = if i == last { ' ' } else { '-' };
                        response.push_str(&format!("{}{sep}{cap}\r\n", config.ehlo_code));
                    }
                    response.into_bytes()
                }
                "MAIL" => config.mail_from.to_bytes(),
                "RCPT" => config.rcpt_to.to_bytes(),
                "DATA" => {
                    let reply = config.data.to_bytes();
                    reader.get_mut().write_all(&reply).await?;
                    reader.get_mut().flush().await?;
                    if config.data.code == 354 {
                        let mut body = Vec::new();
                        loop {
                            line.clear();
                            let n = reader.read_line(&mut line).await?;
                            if n == 0 {
                                return Ok(SessionEnd::Closed);
                            }
                            if line.trim_end_matches(['\r', '\n']) == "." {
                                break;
                            }
                            body.extend_from_slice(line.as_bytes());
                        }
                        state.messages.write().await.push(body);
                        reader.get_mut().write_all(&config.data_end.to_bytes()).await?;
                        reader.get_mut().flush().await?;
                    }
                    continue;
                }
                "STARTTLS" => {
                    let reply = config
                        .starttls
                        .clone()
                        .unwrap_or_else(|| Reply::new(502, "command not implemented"));
                    reader.get_mut().write_all(&reply.to_bytes()).await?;
                    reader.get_mut().flush().await?;
                    if (200..300).contains(&reply.code) && config.tls.is_some() {
                        return Ok(SessionEnd::UpgradeTls);
                    }
                    continue;
                }
                "QUIT" => {
                    reader.get_mut().write_all(&config.quit.to_bytes()).await?;
                    reader.get_mut().flush().await?;
                    return Ok(SessionEnd::Closed);
                }
                _ => Reply::new(500, "unknown command").to_bytes(),
            };

            reader.get_mut().write_all(&reply).await?;
            reader.get_mut().flush().await?;
        }
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = Reply::new(code, message);
        self
    }

    /// Send the greeting with no line terminator and then hang.
    pub const fn with_hanging_greeting(mut self) -> Self {
        self.config.greeting_hangs = true;
        self
    }

    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from = Reply::new(code, message);
        self
    }

    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to = Reply::new(code, message);
        self
    }

    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data = Reply::new(code, message);
        self
    }

    /// The reply after the message body (`CRLF.CRLF`).
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    /// Advertise STARTTLS and actually upgrade, with a fresh CA.
    pub fn with_tls(mut self) -> Self {
        self.config.starttls = Some(Reply::new(220, "go ahead"));
        self.config.tls = Some(TlsFixture::new());
        self
    }

    /// Advertise STARTTLS but reject the command with this reply.
    pub fn with_starttls_rejected(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls = Some(Reply::new(code, message));
        self.config.tls = None;
        self
    }

    /// Bind to an ephemeral port and start serving.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(ServerState {
            config: self.config,
            commands: RwLock::new(Vec::new()),
            messages: RwLock::new(Vec::new()),
            connections: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                if accept_state.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                {
                    let state = Arc::clone(&accept_state);
                    tokio::spawn(async move {
                        if let Err(e) = MockSmtpServer::handle_client(stream, state).await {
                            tracing::debug!("mock server client error: {e}");
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer { addr, state })
    }
}
