//! Scripted mock SMTP server for client integration tests.
#![allow(dead_code)] // Not every helper is used by every test binary.

use std::{
    net::SocketAddr,
    sync::{Arc, RwLock},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

/// Per-command response script.
#[derive(Debug, Clone)]
pub struct MockScript {
    pub greeting: (u16, &'static str),
    pub mail_from: (u16, &'static str),
    pub rcpt_to: (u16, &'static str),
    pub data_end: (u16, &'static str),
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            greeting: (220, "mock ESMTP ready"),
            mail_from: (250, "OK"),
            rcpt_to: (250, "OK"),
            data_end: (250, "OK: queued as mock-1"),
        }
    }
}

/// A one-session-at-a-time scripted SMTP server on an ephemeral port.
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<String>>>,
}

impl MockSmtpServer {
    pub async fn start(script: MockScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands: Arc<RwLock<Vec<String>>> = Arc::default();

        let recorded = commands.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = script.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve_session(stream, script, recorded).await;
                });
            }
        });

        Self { addr, commands }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }
}

async fn serve_session(
    stream: TcpStream,
    script: MockScript,
    recorded: Arc<RwLock<Vec<String>>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (code, text) = script.greeting;
    write_half
        .write_all(format!("{code} {text}\r\n").as_bytes())
        .await?;
    if code >= 400 {
        return Ok(());
    }

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end().to_string();
        recorded.write().unwrap().push(command.clone());

        let upper = command.to_ascii_uppercase();
        if upper.starts_with("EHLO") || upper.starts_with("HELO") {
            write_half
                .write_all(b"250-mock.example.test\r\n250 AUTH PLAIN\r\n")
                .await?;
        } else if upper.starts_with("AUTH") {
            write_half.write_all(b"235 Authentication successful\r\n").await?;
        } else if upper.starts_with("MAIL FROM") {
            let (code, text) = script.mail_from;
            write_half
                .write_all(format!("{code} {text}\r\n").as_bytes())
                .await?;
        } else if upper.starts_with("RCPT TO") {
            let (code, text) = script.rcpt_to;
            write_half
                .write_all(format!("{code} {text}\r\n").as_bytes())
                .await?;
        } else if upper == "DATA" {
            write_half
                .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                .await?;

            let mut body = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                if line == ".\r\n" {
                    break;
                }
                body.push_str(&line);
            }
            recorded.write().unwrap().push(format!("<DATA {} bytes>", body.len()));

            let (code, text) = script.data_end;
            write_half
                .write_all(format!("{code} {text}\r\n").as_bytes())
                .await?;
        } else if upper == "QUIT" {
            write_half.write_all(b"221 Bye\r\n").await?;
            return Ok(());
        } else {
            write_half.write_all(b"502 Command not implemented\r\n").await?;
        }
    }
}
