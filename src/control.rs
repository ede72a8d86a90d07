//! Tor control port client
//!
//! Speaks just enough of the control protocol to ask for a new identity:
//! `AUTHENTICATE ""`, `SIGNAL NEWNYM`, `QUIT`. Every command's reply is read
//! and anything other than a `250` status is treated as a failure.

use crate::config::Endpoint;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

/// Errors of a control port session
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to connect to control port {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("Control port I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for the control port")]
    Timeout,

    #[error("Tor rejected `{command}`: {reply}")]
    Rejected { command: String, reply: String },

    #[error("Control connection closed while waiting for a reply to `{0}`")]
    Closed(String),
}

/// An open control connection
pub struct ControlSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl ControlSession {
    /// Connect to the control port; `timeout` bounds the connect and every reply
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, ControlError> {
        debug!("Connecting to Tor control port: {}", endpoint);

        let stream = time::timeout(timeout, TcpStream::connect((endpoint.host.as_str(), endpoint.port)))
            .await
            .map_err(|_| ControlError::Timeout)?
            .map_err(|source| ControlError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            timeout,
        })
    }

    /// Authenticate with an empty password
    pub async fn authenticate(&mut self) -> Result<(), ControlError> {
        self.command("AUTHENTICATE \"\"").await
    }

    /// Ask Tor to switch to clean circuits
    pub async fn signal_newnym(&mut self) -> Result<(), ControlError> {
        self.command("SIGNAL NEWNYM").await
    }

    /// End the session
    pub async fn quit(mut self) -> Result<(), ControlError> {
        self.command("QUIT").await
    }

    async fn command(&mut self, cmd: &str) -> Result<(), ControlError> {
        debug!("Sending control command: {}", cmd);
        self.writer.write_all(format!("{}\r\n", cmd).as_bytes()).await?;
        self.writer.flush().await?;

        let reply = self.read_reply(cmd).await?;
        if reply.code != 250 {
            return Err(ControlError::Rejected {
                command: cmd.to_string(),
                reply: reply.text,
            });
        }
        Ok(())
    }

    /// Read lines until the final `NNN ` line of a reply
    async fn read_reply(&mut self, cmd: &str) -> Result<Reply, ControlError> {
        let mut in_data = false;

        loop {
            let mut line = String::new();
            let read = time::timeout(self.timeout, self.reader.read_line(&mut line))
                .await
                .map_err(|_| ControlError::Timeout)??;
            if read == 0 {
                return Err(ControlError::Closed(cmd.to_string()));
            }

            let trimmed = line.trim_end_matches(&['\r', '\n'][..]);
            debug!("Control reply line: {}", trimmed);

            if in_data {
                if trimmed == "." {
                    in_data = false;
                }
                continue;
            }

            match parse_status_line(trimmed) {
                Some((code, ' ', text)) => {
                    return Ok(Reply {
                        code,
                        text: text.to_string(),
                    })
                },
                Some((_, '+', _)) => in_data = true,
                Some(_) => {},
                None => {
                    return Err(ControlError::Rejected {
                        command: cmd.to_string(),
                        reply: format!("malformed reply line '{}'", trimmed),
                    })
                },
            }
        }
    }
}

struct Reply {
    code: u16,
    text: String,
}

/// Split `250-text` into its status code, separator and text
fn parse_status_line(line: &str) -> Option<(u16, char, &str)> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = code.parse().ok()?;
    let sep = line[3..].chars().next()?;
    if !matches!(sep, ' ' | '-' | '+') {
        return None;
    }
    Some((code, sep, &line[4..]))
}

/// Run a full NEWNYM session against `endpoint`
pub async fn request_new_circuit(endpoint: &Endpoint, timeout: Duration) -> Result<(), ControlError> {
    let mut session = ControlSession::connect(endpoint, timeout).await?;
    session.authenticate().await?;
    session.signal_newnym().await?;
    session.quit().await
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process stand-in for the Tor control port

    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Accepts one connection, answers each line with the next canned reply
    /// and records what was received
    pub async fn fake_control_port(replies: Vec<&'static str>) -> (Endpoint, Arc<Mutex<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(String::new()));
        let sink = received.clone();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut replies = replies.into_iter();
            let mut buf = [0u8; 256];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                let lines = chunk.matches("\r\n").count();
                sink.lock().unwrap().push_str(&chunk);
                for _ in 0..lines {
                    match replies.next() {
                        Some(reply) => stream.write_all(reply.as_bytes()).await.unwrap(),
                        None => return,
                    }
                }
            }
        });

        (Endpoint::new("127.0.0.1", port), received)
    }

    /// An endpoint nothing listens on
    pub async fn closed_port() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Endpoint::new("127.0.0.1", port)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{closed_port, fake_control_port};
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line("250 OK"), Some((250, ' ', "OK")));
        assert_eq!(parse_status_line("250-version=0.4.8"), Some((250, '-', "version=0.4.8")));
        assert_eq!(parse_status_line("515 Authentication failed"), Some((515, ' ', "Authentication failed")));
        assert_eq!(parse_status_line("OK"), None);
        assert_eq!(parse_status_line("2500"), None);
    }

    #[tokio::test]
    async fn test_newnym_session_sends_commands_in_order() {
        let (endpoint, received) =
            fake_control_port(vec!["250 OK\r\n", "250 OK\r\n", "250 closing connection\r\n"]).await;

        request_new_circuit(&endpoint, TIMEOUT).await.unwrap();

        assert_eq!(
            received.lock().unwrap().as_str(),
            "AUTHENTICATE \"\"\r\nSIGNAL NEWNYM\r\nQUIT\r\n"
        );
    }

    #[tokio::test]
    async fn test_rejected_authentication() {
        let (endpoint, received) = fake_control_port(vec!["515 Authentication failed\r\n"]).await;

        let err = request_new_circuit(&endpoint, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ControlError::Rejected { ref command, .. } if command == "AUTHENTICATE \"\""));
        assert!(!received.lock().unwrap().contains("NEWNYM"));
    }

    #[tokio::test]
    async fn test_multi_line_reply_is_consumed() {
        let (endpoint, _) = fake_control_port(vec![
            "250-AUTH OK\r\n250 OK\r\n",
            "250 OK\r\n",
            "250 closing connection\r\n",
        ])
        .await;

        request_new_circuit(&endpoint, TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let endpoint = closed_port().await;
        let err = request_new_circuit(&endpoint, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ControlError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_peer_closing_early() {
        let (endpoint, _) = fake_control_port(vec!["250 OK\r\n"]).await;
        let err = request_new_circuit(&endpoint, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ControlError::Closed(ref cmd) if cmd == "SIGNAL NEWNYM"));
    }
}
