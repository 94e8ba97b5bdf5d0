//! Email alerting on pastie matches.
//!
//! Grounded on `original_source/pystemon/sendmail.py`'s `PystemonSendmail`:
//! subject formatted with the matched-pattern summary, recipients are the
//! configured global address plus each matched pattern's extra `to` list,
//! oversized content is swapped for a placeholder and attached instead of
//! inlined, and any SMTP failure is logged rather than propagated (a broken
//! mail server should never take down the crawl). The Rust client is
//! `lettre`'s async SMTP transport, chosen as the standard registry crate
//! for this concern (the pack's examples show no precedent to imitate).

use async_trait::async_trait;
use lettre::message::{Attachment, MultiPart, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{error, instrument};

use crate::pastie::Pastie;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP transport configuration error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Something that can be told about a matched pastie. `EmailNotifier` is the
/// only implementor today; the trait exists so the supervisor doesn't care
/// which alerting channel is wired up.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends an alert for `pastie`. Failures are logged by the
    /// implementation and never propagated — a broken alert channel must
    /// not stop the crawl.
    async fn notify(&self, pastie: &Pastie);
}

/// SMTP alerting matching one `email:` config block.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    to: Vec<String>,
    subject_template: String,
    size_limit: usize,
}

impl EmailNotifier {
    /// Builds the SMTP transport from config. TLS is STARTTLS when
    /// requested; plain otherwise (the Python original never enforces
    /// implicit TLS either).
    pub fn new(
        server: &str,
        port: u16,
        tls: bool,
        username: Option<&str>,
        password: Option<&str>,
        from: impl Into<String>,
        to: Vec<String>,
        subject_template: impl Into<String>,
        size_limit: usize,
    ) -> Result<Self, NotifyError> {
        let mut builder = if tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(server)
        }
        .port(port);
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(username.to_string(), password.to_string()));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.into(),
            to,
            subject_template: subject_template.into(),
            size_limit,
        })
    }

    fn recipients(&self, pastie: &Pastie) -> Vec<String> {
        let mut all = self.to.clone();
        all.extend(pastie.alert_recipients());
        all
    }

    fn body(&self, pastie: &Pastie, content_note: &str) -> String {
        format!(
            "I found a hit for a regular expression on one of the pastebin sites.\n\n\
             The site where the paste came from :        {site}\n\
             The original paste was located here:        {url}\n\
             And the regular expressions that matched:   {regexes}\n\n\
             Below (after newline) is the content of the pastie:\n\n{content}\n",
            site = pastie.site_name,
            url = pastie.public_url,
            regexes = pastie
                .matches
                .iter()
                .map(|m| m.regex.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            content = content_note,
        )
    }

    fn build_message(&self, pastie: &Pastie) -> Result<Message, NotifyError> {
        let alert = format!(
            "Found hit for {matches} in pastie {url}",
            matches = pastie.matches_to_text(),
            url = pastie.public_url
        );
        let subject = self.subject_template.replace("{subject}", &alert);

        let content = pastie.content.as_deref().unwrap_or_default();
        let mut builder = Message::builder().from(self.from.parse()?).subject(subject);
        for recipient in self.recipients(pastie) {
            builder = builder.to(recipient.parse()?);
        }

        let message = if content.len() > self.size_limit {
            let body = self.body(pastie, "*** Content too large to be displayed, see attachment ***");
            let attachment = Attachment::new(format!("{}.txt", pastie.id))
                .body(content.to_vec(), ContentType::TEXT_PLAIN);
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body))
                    .singlepart(attachment),
            )?
        } else {
            let body = self.body(pastie, &String::from_utf8_lossy(content));
            builder.body(body)?
        };
        Ok(message)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip(self, pastie), fields(site = %pastie.site_name, id = %pastie.id))]
    async fn notify(&self, pastie: &Pastie) {
        let message = match self.build_message(pastie) {
            Ok(message) => message,
            Err(error) => {
                error!(%error, "unable to build alert email");
                return;
            }
        };
        if let Err(error) = self.transport.send(message).await {
            error!(%error, "unable to send alert email");
        }
    }
}
