//! The SMTP conversation with a single host.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use mailward_common::log;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tokio_rustls::{
    rustls::{pki_types::ServerName, ClientConfig, RootCertStore},
    TlsConnector,
};

use crate::{
    error::SendError,
    options::{Credentials, SmtpTimeouts},
    response::Response,
};

/// Responses larger than this mean the peer is not speaking SMTP.
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

enum Connection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await,
            Self::Tls(stream) => stream.write_all(data).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf).await,
            Self::Tls(stream) => stream.read(buf).await,
        }
    }
}

/// A connected SMTP client session.
pub struct SmtpClient {
    connection: Connection,
    buffer: Vec<u8>,
    host: String,
    timeouts: SmtpTimeouts,
}

impl SmtpClient {
    /// Connect and consume the server greeting.
    pub async fn connect(host: &str, port: u16, timeouts: SmtpTimeouts) -> Result<Self, SendError> {
        let address = format!("{host}:{port}");
        let stream = timeout(timeouts.connect, TcpStream::connect(&address))
            .await
            .map_err(|_| SendError::Connect {
                host: address.clone(),
                reason: "connect timed out".to_string(),
            })?
            .map_err(|e| SendError::Connect {
                host: address.clone(),
                reason: e.to_string(),
            })?;

        let mut client = Self {
            connection: Connection::Plain(stream),
            buffer: Vec::new(),
            host: address,
            timeouts,
        };

        let greeting = client.read_response(client.timeouts.command).await?;
        log!(incoming, "{} << {} {}", client.host, greeting.code, greeting.message());
        if !greeting.is_success() {
            return Err(client.refusal(greeting));
        }

        Ok(client)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn ehlo(&mut self, helo_name: &str) -> Result<Response, SendError> {
        let response = self.command(&format!("EHLO {helo_name}")).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(self.refusal(response))
        }
    }

    /// Upgrade the session with STARTTLS. The caller re-issues EHLO on the
    /// upgraded session.
    pub async fn starttls(mut self) -> Result<Self, SendError> {
        let response = self.command("STARTTLS").await?;
        if !response.is_success() {
            return Err(self.refusal(response));
        }

        let mut root_store = RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            root_store.add(cert).map_err(|e| SendError::Tls {
                host: self.host.clone(),
                reason: format!("could not add root certificate: {e}"),
            })?;
        }
        if !certs.errors.is_empty() {
            log!(
                internal,
                level = WARN,
                "Some system certificates could not be loaded: {:?}",
                certs.errors
            );
        }

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let server_host = self
            .host
            .rsplit_once(':')
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| self.host.clone());
        let server_name = ServerName::try_from(server_host).map_err(|e| SendError::Tls {
            host: self.host.clone(),
            reason: format!("invalid TLS server name: {e}"),
        })?;

        match self.connection {
            Connection::Plain(stream) => {
                let tls = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| SendError::Tls {
                        host: self.host.clone(),
                        reason: e.to_string(),
                    })?;
                self.connection = Connection::Tls(Box::new(tls));
                self.buffer.clear();
                Ok(self)
            }
            Connection::Tls(_) => Err(SendError::Tls {
                host: self.host.clone(),
                reason: "session is already TLS".to_string(),
            }),
        }
    }

    pub async fn auth_plain(&mut self, credentials: &Credentials) -> Result<(), SendError> {
        let token = BASE64.encode(format!(
            "\0{}\0{}",
            credentials.username, credentials.password
        ));

        log!(outgoing, "{} >> AUTH PLAIN ****", self.host);
        self.send_line(&format!("AUTH PLAIN {token}")).await?;
        let response = self.read_response(self.timeouts.command).await?;
        log!(incoming, "{} << {} {}", self.host, response.code, response.message());

        if response.is_success() {
            Ok(())
        } else {
            Err(self.refusal(response))
        }
    }

    pub async fn mail_from(&mut self, sender: &str) -> Result<(), SendError> {
        let response = self.command(&format!("MAIL FROM:<{sender}>")).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(self.refusal(response))
        }
    }

    pub async fn rcpt_to(&mut self, recipient: &str) -> Result<(), SendError> {
        let response = self.command(&format!("RCPT TO:<{recipient}>")).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(self.refusal(response))
        }
    }

    /// Run the DATA phase. `message` must already be CRLF-normalized; dot
    /// stuffing and the terminating `CRLF.CRLF` are applied here. Returns
    /// the server's acceptance response.
    pub async fn data(&mut self, message: &[u8]) -> Result<Response, SendError> {
        let response = self.command("DATA").await?;
        if !response.is_intermediate() {
            return Err(self.refusal(response));
        }

        let payload = dot_stuff(message);
        self.connection
            .send(&payload)
            .await
            .map_err(|e| self.session_lost(e))?;

        let response = self.read_response(self.timeouts.data).await?;
        log!(incoming, "{} << {} {}", self.host, response.code, response.message());
        if response.is_success() {
            Ok(response)
        } else {
            Err(self.refusal(response))
        }
    }

    /// Close the session politely; failures at this point are ignored.
    pub async fn quit(mut self) {
        let _ = self.command("QUIT").await;
    }

    async fn command(&mut self, line: &str) -> Result<Response, SendError> {
        log!(outgoing, "{} >> {}", self.host, line);
        self.send_line(line).await?;
        let response = self.read_response(self.timeouts.command).await?;
        log!(incoming, "{} << {} {}", self.host, response.code, response.message());
        Ok(response)
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SendError> {
        self.connection
            .send(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|e| self.session_lost(e))
    }

    async fn read_response(
        &mut self,
        budget: std::time::Duration,
    ) -> Result<Response, SendError> {
        loop {
            match Response::parse(&self.buffer) {
                Ok(Some((response, consumed))) => {
                    self.buffer.drain(..consumed);
                    return Ok(response);
                }
                Ok(None) => {}
                Err(reason) => {
                    return Err(SendError::Protocol {
                        host: self.host.clone(),
                        reason,
                    });
                }
            }

            if self.buffer.len() > MAX_RESPONSE_SIZE {
                return Err(SendError::Protocol {
                    host: self.host.clone(),
                    reason: "response exceeds maximum size".to_string(),
                });
            }

            let mut chunk = [0u8; 4096];
            let n = timeout(budget, self.connection.read(&mut chunk))
                .await
                .map_err(|_| SendError::Temporary {
                    host: self.host.clone(),
                    reason: "response timed out".to_string(),
                })?
                .map_err(|e| self.session_lost(e))?;
            if n == 0 {
                return Err(SendError::Temporary {
                    host: self.host.clone(),
                    reason: "connection closed by peer".to_string(),
                });
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Map a refused command onto the error taxonomy by response class.
    fn refusal(&self, response: Response) -> SendError {
        if response.is_temporary_error() {
            SendError::Temporary {
                host: self.host.clone(),
                reason: format!("{} {}", response.code, response.message()),
            }
        } else if response.is_permanent_error() {
            SendError::Rejected {
                host: self.host.clone(),
                code: response.code,
                reason: response.message(),
            }
        } else {
            SendError::Protocol {
                host: self.host.clone(),
                reason: format!("unexpected response {} {}", response.code, response.message()),
            }
        }
    }

    fn session_lost(&self, error: std::io::Error) -> SendError {
        SendError::Temporary {
            host: self.host.clone(),
            reason: error.to_string(),
        }
    }
}

/// Double leading dots and terminate the payload with `CRLF.CRLF`.
pub(crate) fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 8);
    let mut at_line_start = true;
    for &byte in message {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
