//! Webhook delivery for transition messages.
//!
//! One POST per message, bounded by a 10 second timeout, no retries. The
//! endpoint speaks the group-bot text contract:
//!
//! ```text
//! → {"msgtype":"text","text":{"content":"user alice locked the system"}}
//! ← HTTP 200 {"errcode":0,"errmsg":"ok"}
//! ```

use crate::error::NotifyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const NOTIFY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No endpoint configured; nothing was sent.
    Skipped,
}

pub trait Notifier {
    fn notify(&self, endpoint: &str, message: &str) -> Result<Delivery, NotifyError>;
}

#[derive(Debug, Serialize)]
pub struct TextMessage<'a> {
    pub msgtype: &'static str,
    pub text: TextContent<'a>,
}

#[derive(Debug, Serialize)]
pub struct TextContent<'a> {
    pub content: &'a str,
}

impl<'a> TextMessage<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            msgtype: "text",
            text: TextContent { content },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new() -> Result<Self, NotifyError> {
        Self::with_timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Transport)?;
        Ok(Self { client })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, endpoint: &str, message: &str) -> Result<Delivery, NotifyError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            tracing::warn!("Webhook URL not configured; notification not sent");
            return Ok(Delivery::Skipped);
        }

        tracing::info!(content = message, "Sending webhook notification");
        let response = self
            .client
            .post(endpoint)
            .json(&TextMessage::new(message))
            .send()
            .map_err(NotifyError::Transport)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(NotifyError::HttpStatus(status.as_u16()));
        }

        let body = response.text().map_err(NotifyError::Transport)?;
        check_reply(&body)?;
        Ok(Delivery::Sent)
    }
}

fn check_reply(body: &str) -> Result<(), NotifyError> {
    let reply: WebhookReply = serde_json::from_str(body)
        .map_err(|err| NotifyError::InvalidResponse(format!("{}: {}", err, truncate(body))))?;
    if reply.errcode != 0 {
        return Err(NotifyError::Rejected {
            errcode: reply.errcode,
            errmsg: reply.errmsg,
        });
    }
    Ok(())
}

fn truncate(body: &str) -> &str {
    const MAX_BODY_CHARS: usize = 200;
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_logs::{capture, has_event};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// Serves exactly one HTTP request with the given status and body, and
    /// hands back the request body it received.
    fn serve_once(status: &str, body: &str) -> (String, thread::JoinHandle<()>, Arc<Mutex<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/send", listener.local_addr().expect("addr"));
        let captured = Arc::new(Mutex::new(String::new()));
        let captured_clone = Arc::clone(&captured);
        let status = status.to_string();
        let body = body.to_string();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read header");
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().expect("length");
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("read body");
            *captured_clone.lock().expect("lock") =
                String::from_utf8(request_body).expect("utf8");

            let mut stream = stream;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write");
            stream.flush().ok();
        });

        (url, server, captured)
    }

    #[test]
    fn empty_endpoint_is_skipped_with_warning() {
        let notifier = WebhookNotifier::new().expect("client");
        for message in ["user alice locked the system", ""] {
            let (delivery, logs) = capture(|| notifier.notify("", message));
            assert_eq!(delivery.expect("skip is not an error"), Delivery::Skipped);
            assert!(
                has_event(&logs, "WARN", "Webhook URL not configured"),
                "logs: {logs:?}"
            );
            assert_eq!(notifier.notify("   ", message).expect("skip"), Delivery::Skipped);
        }
    }

    #[test]
    fn posts_text_payload_and_accepts_errcode_zero() {
        let (url, server, captured) = serve_once("200 OK", r#"{"errcode":0,"errmsg":"ok"}"#);
        let notifier = WebhookNotifier::new().expect("client");

        let delivery = notifier
            .notify(&url, "user alice locked the system")
            .expect("delivered");
        server.join().expect("server");

        assert_eq!(delivery, Delivery::Sent);
        let payload: serde_json::Value =
            serde_json::from_str(&captured.lock().expect("lock")).expect("json");
        assert_eq!(
            payload,
            serde_json::json!({
                "msgtype": "text",
                "text": {"content": "user alice locked the system"}
            })
        );
    }

    #[test]
    fn http_error_status_is_reported() {
        let (url, server, _) = serve_once("500 Internal Server Error", "{}");
        let notifier = WebhookNotifier::new().expect("client");

        let err = notifier.notify(&url, "user bob unlocked the system").unwrap_err();
        server.join().expect("server");
        assert!(matches!(err, NotifyError::HttpStatus(500)), "got {err:?}");
    }

    #[test]
    fn nonzero_errcode_is_rejected() {
        let (url, server, _) = serve_once("200 OK", r#"{"errcode":93000,"errmsg":"invalid webhook url"}"#);
        let notifier = WebhookNotifier::new().expect("client");

        let err = notifier.notify(&url, "user bob locked the system").unwrap_err();
        server.join().expect("server");
        match err {
            NotifyError::Rejected { errcode, errmsg } => {
                assert_eq!(errcode, 93000);
                assert_eq!(errmsg, "invalid webhook url");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_json_body_is_invalid_response() {
        let (url, server, _) = serve_once("200 OK", "<html>gateway</html>");
        let notifier = WebhookNotifier::new().expect("client");

        let err = notifier.notify(&url, "user bob locked the system").unwrap_err();
        server.join().expect("server");
        assert!(matches!(err, NotifyError::InvalidResponse(_)), "got {err:?}");
    }

    #[test]
    fn connection_refused_is_transport_error() {
        // Port 1 is reserved and nothing listens on it.
        let notifier = WebhookNotifier::new().expect("client");
        let err = notifier
            .notify("http://127.0.0.1:1/send", "user bob locked the system")
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)), "got {err:?}");
    }

    #[test]
    fn truncate_keeps_short_bodies() {
        assert_eq!(truncate("short"), "short");
        let long = "x".repeat(500);
        assert_eq!(truncate(&long).len(), 200);
    }
}
