use async_trait::async_trait;
use mail_send::{SmtpClientBuilder, mail_builder::MessageBuilder};

#[derive(Clone)]
pub struct EmailClientConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
}

/// Outbound mail seam, injected so handlers can run against a mock.
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), mail_send::Error>;
}

pub struct SmtpMailer {
    config: EmailClientConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailDispatcher for SmtpMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), mail_send::Error> {
        let config = &self.config;

        let message = MessageBuilder::new()
            .from(("My Store", config.username.as_str()))
            .to(to)
            .subject(subject)
            .text_body(text_body)
            .html_body(html_body);

        SmtpClientBuilder::new(config.smtp_server.as_str(), config.smtp_port)
            .implicit_tls(false)
            .credentials((config.username.as_str(), config.password.as_str()))
            .connect()
            .await?
            .send(message)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
#[derive(Clone, Debug)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Records messages instead of talking to an SMTP server.
#[cfg(test)]
#[derive(Default)]
pub struct MockMailer {
    pub sent: std::sync::Mutex<Vec<SentMail>>,
    pub fail: bool,
}

#[cfg(test)]
impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[async_trait]
impl MailDispatcher for MockMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), mail_send::Error> {
        if self.fail {
            return Err(std::io::Error::other("connection refused").into());
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_owned(),
            subject: subject.to_owned(),
            text_body: text_body.to_owned(),
            html_body: html_body.to_owned(),
        });
        Ok(())
    }
}
