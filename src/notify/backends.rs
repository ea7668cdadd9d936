//! Notification backends.

use super::{DispatchError, Notifier};
use crate::config::{ConfigError, LineConfig, WebhookConfig};
use reqwest::blocking::Client;
use std::time::Duration;

fn http_client(backend: &'static str, timeout: Duration) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::ParseError(format!("{backend} HTTP client: {e}")))
}

fn transport_error(backend: &'static str, error: reqwest::Error) -> DispatchError {
    match error.status() {
        Some(status) => DispatchError::Rejected {
            backend,
            status: status.as_u16(),
        },
        None => DispatchError::Transport {
            backend,
            reason: error.to_string(),
        },
    }
}

/// LINE Notify: form-encoded `message` with a bearer token.
pub struct LineNotifier {
    client: Client,
    endpoint: String,
    token: String,
}

impl LineNotifier {
    /// Creates the notifier; the token must be set.
    pub fn new(config: &LineConfig, timeout: Duration) -> Result<Self, ConfigError> {
        if config.token.trim().is_empty() {
            return Err(ConfigError::MissingNotifierSetting {
                backend: "line",
                field: "token",
            });
        }
        Ok(Self {
            client: http_client("line", timeout)?,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
        })
    }
}

impl Notifier for LineNotifier {
    fn name(&self) -> &'static str {
        "line"
    }

    fn dispatch(&mut self, message: &str) -> Result<(), DispatchError> {
        self.client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .form(&[("message", message)])
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| transport_error("line", e))?;
        Ok(())
    }
}

/// Posts `{"text": message}` to a URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// Creates the notifier; the URL must be set.
    pub fn new(config: &WebhookConfig, timeout: Duration) -> Result<Self, ConfigError> {
        if config.url.trim().is_empty() {
            return Err(ConfigError::MissingNotifierSetting {
                backend: "webhook",
                field: "url",
            });
        }
        Ok(Self {
            client: http_client("webhook", timeout)?,
            url: config.url.clone(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn dispatch(&mut self, message: &str) -> Result<(), DispatchError> {
        let body = serde_json::json!({ "text": message });
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| transport_error("webhook", e))?;
        Ok(())
    }
}

/// Writes the message to the log and nothing else.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn dispatch(&mut self, message: &str) -> Result<(), DispatchError> {
        tracing::info!(text = message, "Notification");
        Ok(())
    }
}

#[cfg(feature = "email")]
pub use email::EmailNotifier;

#[cfg(feature = "email")]
mod email {
    use super::{DispatchError, Notifier};
    use crate::config::{ConfigError, EmailConfig};
    use lettre::message::Mailbox;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{Message, SmtpTransport, Transport};
    use std::time::Duration;

    const BACKEND: &str = "email";

    /// Sends the message as both subject and body over SMTP with STARTTLS.
    pub struct EmailNotifier {
        transport: SmtpTransport,
        from: Mailbox,
        to: Mailbox,
    }

    impl EmailNotifier {
        /// Validates addresses and prepares the SMTP transport.
        pub fn new(config: &EmailConfig, timeout: Duration) -> Result<Self, ConfigError> {
            for (field, value) in [
                ("smtp_server", &config.smtp_server),
                ("from", &config.from),
                ("to", &config.to),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingNotifierSetting {
                        backend: BACKEND,
                        field,
                    });
                }
            }

            let from = config
                .from
                .parse::<Mailbox>()
                .map_err(|e| ConfigError::ParseError(format!("email from address: {e}")))?;
            let to = config
                .to
                .parse::<Mailbox>()
                .map_err(|e| ConfigError::ParseError(format!("email to address: {e}")))?;

            let transport = SmtpTransport::starttls_relay(&config.smtp_server)
                .map_err(|e| ConfigError::ParseError(format!("smtp relay: {e}")))?
                .port(config.smtp_port)
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
                .timeout(Some(timeout))
                .build();

            Ok(Self {
                transport,
                from,
                to,
            })
        }
    }

    impl Notifier for EmailNotifier {
        fn name(&self) -> &'static str {
            BACKEND
        }

        fn dispatch(&mut self, message: &str) -> Result<(), DispatchError> {
            let email = Message::builder()
                .from(self.from.clone())
                .to(self.to.clone())
                .subject(message)
                .body(message.to_string())
                .map_err(|e| DispatchError::Message {
                    backend: BACKEND,
                    reason: e.to_string(),
                })?;

            self.transport
                .send(&email)
                .map_err(|e| DispatchError::Transport {
                    backend: BACKEND,
                    reason: e.to_string(),
                })?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{self, Receiver};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// Answers one HTTP request with `status` and hands back the raw request.
    fn http_stub(status: u16) -> (String, Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = channel::bounded(1);

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let response =
                format!("HTTP/1.1 {status} Stub\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).unwrap();
            let _ = tx.send(request);
        });

        (format!("http://{addr}"), rx)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            data.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&data).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length || n == 0 {
                    return text;
                }
            } else if n == 0 {
                return text;
            }
        }
    }

    fn line_notifier(endpoint: String) -> LineNotifier {
        let config = LineConfig {
            token: "tok-123".into(),
            endpoint,
        };
        LineNotifier::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_line_posts_form_with_bearer_token() {
        let (base, requests) = http_stub(200);
        let mut notifier = line_notifier(format!("{base}/api/notify"));

        notifier.dispatch("hello world").unwrap();

        let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /api/notify "), "{request}");
        assert!(lower.contains("authorization: bearer tok-123"), "{request}");
        assert!(lower.contains("content-type: application/x-www-form-urlencoded"));
        assert!(request.ends_with("message=hello+world"), "{request}");
    }

    #[test]
    fn test_line_rejection_maps_status() {
        let (base, _requests) = http_stub(401);
        let mut notifier = line_notifier(format!("{base}/api/notify"));

        assert_eq!(
            notifier.dispatch("hello"),
            Err(DispatchError::Rejected {
                backend: "line",
                status: 401
            })
        );
    }

    #[test]
    fn test_webhook_posts_json_text() {
        let (base, requests) = http_stub(204);
        let config = WebhookConfig {
            url: format!("{base}/hook"),
        };
        let mut notifier = WebhookNotifier::new(&config, Duration::from_secs(5)).unwrap();

        notifier.dispatch("motion at gate").unwrap();

        let request = requests.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(request.starts_with("POST /hook "), "{request}");
        assert!(request
            .to_ascii_lowercase()
            .contains("content-type: application/json"));
        let body = request.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "motion at gate" }));
    }

    #[test]
    fn test_webhook_rejection_maps_status() {
        let (base, _requests) = http_stub(400);
        let config = WebhookConfig {
            url: format!("{base}/hook"),
        };
        let mut notifier = WebhookNotifier::new(&config, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            notifier.dispatch("motion"),
            Err(DispatchError::Rejected {
                backend: "webhook",
                status: 400
            })
        ));
    }

    #[test]
    fn test_log_notifier_always_succeeds() {
        let mut notifier = LogNotifier;
        assert!(notifier.dispatch("hello").is_ok());
        notifier.close();
    }

    #[test]
    fn test_webhook_requires_url() {
        let result = WebhookNotifier::new(&WebhookConfig::default(), Duration::from_secs(1));
        assert!(matches!(
            result,
            Err(ConfigError::MissingNotifierSetting {
                backend: "webhook",
                ..
            })
        ));
    }

    #[test]
    fn test_unreachable_webhook_is_transport_error() {
        let config = WebhookConfig {
            url: "http://127.0.0.1:9/hook".into(),
        };
        let mut notifier = WebhookNotifier::new(&config, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            notifier.dispatch("motion"),
            Err(DispatchError::Transport {
                backend: "webhook",
                ..
            })
        ));
    }
}
