//! Telegram storage backend: posts matched pasties to one or more chats.
//!
//! Grounded on `original_source/pystemon/storage/telegramstorage.py`: only
//! matched pasties are sent, one POST per configured chat id, and a failure
//! sending to one chat is logged and does not stop the others or raise.

use async_trait::async_trait;
use tracing::warn;

use crate::pastie::Pastie;
use crate::storage::{Storage, StorageError};

/// Sends matched pasties as chat messages via the Telegram Bot API.
pub struct TelegramStorage {
    name: String,
    client: reqwest::Client,
    token: String,
    chat_ids: Vec<String>,
}

impl TelegramStorage {
    #[must_use]
    pub fn new(name: impl Into<String>, token: impl Into<String>, chat_ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            token: token.into(),
            chat_ids,
        }
    }

    fn message_for(pastie: &Pastie) -> String {
        let content = pastie
            .content
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        format!(
            "I found a hit for a regular expression on one of the pastebin sites.\n\n\
             The site where the paste came from :        {site}\n\
             The original paste was located here:        {url}\n\
             And the regular expressions that matched:   {matches}\n\n\
             Below (after newline) is the content of the pastie:\n\n{content}",
            site = pastie.site_name,
            url = pastie.public_url,
            matches = pastie
                .matches
                .iter()
                .map(|m| m.regex.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

#[async_trait]
impl Storage for TelegramStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save_pastie(&self, pastie: &Pastie) -> Result<(), StorageError> {
        if !pastie.matched() {
            return Ok(());
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let text = Self::message_for(pastie);
        for chat_id in &self.chat_ids {
            let result = self
                .client
                .post(&url)
                .form(&[("chat_id", chat_id.as_str()), ("text", text.as_str())])
                .send()
                .await;
            if let Err(error) = result {
                warn!(%error, chat_id, "failed to alert through telegram");
            }
        }
        Ok(())
    }

    async fn seen_pastie(&self, _site: &str, _pastie_id: &str) -> Result<bool, StorageError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_includes_site_and_matches() {
        let mut p = Pastie::new(
            "pastebin",
            "abc",
            "https://example.com/raw/{id}",
            "https://example.com/{id}",
            None,
            "abc",
        );
        p.content = Some(b"secret stuff".to_vec());
        p.matches = vec![crate::pastie::MatchSummary {
            text: "Leak".to_string(),
            regex: "secret".to_string(),
            recipients: Vec::new(),
        }];
        let message = TelegramStorage::message_for(&p);
        assert!(message.contains("pastebin"));
        assert!(message.contains("secret"));
        assert!(message.contains("secret stuff"));
    }
}
