//! SMTP transport conversations against a scripted mock server.

mod support;

use std::time::Duration;

use mailward_smtp::{
    Credentials, Envelope, MailTransport, SendError, SmtpOptions, SmtpTimeouts, SmtpTransport,
};
use support::{MockScript, MockSmtpServer};

fn options_for(server: &MockSmtpServer) -> SmtpOptions {
    SmtpOptions {
        relay: server.host(),
        port: server.port(),
        ssl: false,
        auth: None,
        no_mx_lookups: true,
        helo_name: "sender.example.test".to_string(),
        // Single attempt per host: deferrals surface directly.
        host_attempts: 1,
        timeouts: SmtpTimeouts {
            connect: Duration::from_secs(2),
            command: Duration::from_secs(2),
            data: Duration::from_secs(2),
        },
    }
}

fn envelope() -> Envelope {
    Envelope {
        sender: "noreply+a1b2c3d4e5f6g7h8i9j0@example.com".to_string(),
        recipients: vec!["rcpt@customer.test".to_string()],
    }
}

#[tokio::test]
async fn test_successful_submission() {
    let server = MockSmtpServer::start(MockScript::default()).await;
    let transport = SmtpTransport::new();

    let receipt = transport
        .send(
            &envelope(),
            b"Subject: hello\r\n\r\nbody\r\n",
            &options_for(&server),
        )
        .await
        .unwrap();
    assert!(receipt.0.contains("250"));
    assert!(receipt.0.contains("queued as mock-1"));

    let commands = server.commands();
    assert!(commands
        .iter()
        .any(|c| c == "EHLO sender.example.test"));
    assert!(commands
        .iter()
        .any(|c| c == "MAIL FROM:<noreply+a1b2c3d4e5f6g7h8i9j0@example.com>"));
    assert!(commands.iter().any(|c| c == "RCPT TO:<rcpt@customer.test>"));
    assert!(commands.iter().any(|c| c.starts_with("<DATA")));
    assert!(commands.iter().any(|c| c == "QUIT"));
}

#[tokio::test]
async fn test_auth_plain_is_sent_when_configured() {
    let server = MockSmtpServer::start(MockScript::default()).await;
    let transport = SmtpTransport::new();

    let mut options = options_for(&server);
    options.auth = Some(Credentials {
        username: "mailer".to_string(),
        password: "secret".to_string(),
    });

    transport
        .send(&envelope(), b"body\r\n", &options)
        .await
        .unwrap();

    assert!(server
        .commands()
        .iter()
        .any(|c| c.starts_with("AUTH PLAIN ")));
}

#[tokio::test]
async fn test_temporary_rcpt_failure() {
    let server = MockSmtpServer::start(MockScript {
        rcpt_to: (450, "Greylisted, try again later"),
        ..Default::default()
    })
    .await;
    let transport = SmtpTransport::new();

    let result = transport
        .send(&envelope(), b"body\r\n", &options_for(&server))
        .await;

    match result {
        Err(SendError::Temporary { reason, .. }) => {
            assert!(reason.contains("450"));
            assert!(reason.contains("Greylisted"));
        }
        other => panic!("expected Temporary, got {other:?}"),
    }
}

#[tokio::test]
async fn test_persistent_deferral_exhausts_host_budget() {
    let server = MockSmtpServer::start(MockScript {
        rcpt_to: (450, "Greylisted, try again later"),
        ..Default::default()
    })
    .await;
    let transport = SmtpTransport::new();

    let mut options = options_for(&server);
    options.host_attempts = 2;

    let result = transport
        .send(&envelope(), b"body\r\n", &options)
        .await;

    match result {
        Err(SendError::RetriesExceeded { host }) => {
            assert_eq!(host, server.host());
        }
        other => panic!("expected RetriesExceeded, got {other:?}"),
    }

    // The budget bought a second full session before giving up.
    let rcpt_count = server
        .commands()
        .iter()
        .filter(|c| c.starts_with("RCPT TO"))
        .count();
    assert_eq!(rcpt_count, 2);
}

#[tokio::test]
async fn test_permanent_mail_from_rejection() {
    let server = MockSmtpServer::start(MockScript {
        mail_from: (550, "Sender blocked"),
        ..Default::default()
    })
    .await;
    let transport = SmtpTransport::new();

    let result = transport
        .send(&envelope(), b"body\r\n", &options_for(&server))
        .await;

    match result {
        Err(SendError::Rejected { code, reason, .. }) => {
            assert_eq!(code, 550);
            assert!(reason.contains("Sender blocked"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_host_exhausts_candidates() {
    // Bind a port, then drop the listener so the port refuses connections.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = SmtpTransport::new();
    let options = SmtpOptions {
        relay: "127.0.0.1".to_string(),
        port,
        ssl: false,
        auth: None,
        no_mx_lookups: true,
        helo_name: "sender.example.test".to_string(),
        host_attempts: 1,
        timeouts: SmtpTimeouts {
            connect: Duration::from_secs(1),
            command: Duration::from_secs(1),
            data: Duration::from_secs(1),
        },
    };

    let result = transport.send(&envelope(), b"body\r\n", &options).await;
    assert!(matches!(result, Err(SendError::NoMoreHosts { .. })));
}
