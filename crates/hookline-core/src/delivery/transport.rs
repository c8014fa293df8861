//! Mail transport - hands a rendered message to an SMTP relay

use async_trait::async_trait;
use hookline_storage::SendingProfile;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{authentication::Credentials, extension::ClientId},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A message ready to hand to a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// Delivery failure, classified by whether a retry could succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub permanent: bool,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

/// Sends one message through a sending profile. Best-effort; the same
/// message may be handed over twice after a lease race.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        profile: &SendingProfile,
        message: &OutboundMessage,
    ) -> Result<(), TransportError>;
}

/// SMTP transport backed by lettre
pub struct LettreTransport {
    timeout: Duration,
    hello_name: Option<String>,
}

impl LettreTransport {
    pub fn new(timeout: Duration, hello_name: Option<String>) -> Self {
        Self {
            timeout,
            hello_name,
        }
    }

    fn build_message(message: &OutboundMessage) -> Result<Message, TransportError> {
        let from: Mailbox = message
            .from
            .parse()
            .map_err(|e| TransportError::permanent(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| TransportError::permanent(format!("Invalid to address: {}", e)))?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone());

        let email = match (&message.html, &message.text) {
            (Some(html), Some(text)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text.clone()))
                    .singlepart(SinglePart::html(html.clone())),
            ),
            (Some(html), None) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
            (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
            (None, None) => builder.body(String::new()),
        };

        email.map_err(|e| TransportError::permanent(format!("Failed to build email: {}", e)))
    }

    fn build_transport(
        &self,
        profile: &SendingProfile,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let port = u16::try_from(profile.port).map_err(|_| {
            TransportError::permanent(format!("Invalid SMTP port: {}", profile.port))
        })?;

        let mut builder = if profile.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&profile.host)
        } else if profile.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&profile.host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&profile.host))
        }
        .map_err(|e| TransportError::transient(format!("Failed to create SMTP transport: {}", e)))?
        .port(port)
        .timeout(Some(self.timeout));

        if let (Some(username), Some(password)) = (&profile.username, &profile.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        if let Some(name) = &self.hello_name {
            builder = builder.hello_name(ClientId::Domain(name.clone()));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for LettreTransport {
    async fn send(
        &self,
        profile: &SendingProfile,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let email = Self::build_message(message)?;
        let mailer = self.build_transport(profile)?;

        match mailer.send(email).await {
            Ok(response) => {
                debug!(code = %response.code(), "Relay accepted message");
                Ok(())
            }
            Err(e) if e.is_permanent() => Err(TransportError::permanent(e.to_string())),
            Err(e) => Err(TransportError::transient(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str, to: &str) -> OutboundMessage {
        OutboundMessage {
            from: from.to_string(),
            to: to.to_string(),
            subject: "Quarterly review".to_string(),
            text: Some("hello".to_string()),
            html: Some("<p>hello</p>".to_string()),
        }
    }

    #[test]
    fn test_build_message() {
        assert!(LettreTransport::build_message(&message(
            "IT <it@example.com>",
            "jdoe@example.com"
        ))
        .is_ok());
    }

    #[test]
    fn test_bad_address_is_permanent() {
        let err =
            LettreTransport::build_message(&message("it@example.com", "not an address")).unwrap_err();
        assert!(err.permanent);
        assert!(err.message.contains("to address"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(!TransportError::transient("421").permanent);
        assert!(TransportError::permanent("550").permanent);
        assert_eq!(TransportError::transient("busy").to_string(), "busy");
    }
}
