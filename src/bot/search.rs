use serenity::model::id::{ChannelId, UserId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use super::chat::{ChatGateway, ReplyMatcher};
use crate::error::MusicResult;

pub const SELECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Cómo terminó una sesión de selección.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome<T> {
    Selected(T),
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    /// Índice 0-based
    Pick(usize),
    Cancel,
}

fn interpret(text: &str, count: usize, cancel_word: &str) -> Option<Choice> {
    let text = text.trim();
    if text.eq_ignore_ascii_case(cancel_word) {
        return Some(Choice::Cancel);
    }
    match text.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(Choice::Pick(n - 1)),
        _ => None,
    }
}

/// Espera a que el dueño elija uno de los candidatos mostrados.
pub struct DisambiguationSession<T> {
    owner: UserId,
    candidates: Vec<T>,
    cancel_word: String,
    timeout: Duration,
}

impl<T: Clone> DisambiguationSession<T> {
    pub fn new(owner: UserId, candidates: Vec<T>, cancel_word: impl Into<String>) -> Self {
        Self {
            owner,
            candidates,
            cancel_word: cancel_word.into(),
            timeout: SELECTION_TIMEOUT,
        }
    }

    /// `None` si `text` no es un número en rango ni la palabra de cancelación.
    pub fn resolve(&self, text: &str) -> Option<SessionOutcome<T>> {
        match interpret(text, self.candidates.len(), &self.cancel_word)? {
            Choice::Pick(index) => Some(SessionOutcome::Selected(self.candidates[index].clone())),
            Choice::Cancel => Some(SessionOutcome::Cancelled),
        }
    }

    /// Espera una única respuesta del dueño en `channel`.
    pub async fn run(
        self,
        chat: &dyn ChatGateway,
        channel: ChannelId,
    ) -> MusicResult<SessionOutcome<T>> {
        let count = self.candidates.len();
        let cancel_word = self.cancel_word.clone();
        let matcher: ReplyMatcher =
            Arc::new(move |text: &str| interpret(text, count, &cancel_word).is_some());

        let reply = chat
            .await_reply(channel, self.owner, self.timeout, matcher)
            .await?;

        let outcome = match reply {
            Some(text) => self.resolve(&text).unwrap_or(SessionOutcome::TimedOut),
            None => SessionOutcome::TimedOut,
        };

        match &outcome {
            SessionOutcome::Selected(_) => info!("✅ {} eligió un resultado", self.owner),
            SessionOutcome::Cancelled => debug!("Selección cancelada por {}", self.owner),
            SessionOutcome::TimedOut => debug!("⌛ Selección de {} expiró", self.owner),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChat;
    use pretty_assertions::assert_eq;

    const OWNER: UserId = UserId::new(1);
    const CHANNEL: ChannelId = ChannelId::new(3);

    fn session() -> DisambiguationSession<&'static str> {
        DisambiguationSession::new(OWNER, vec!["a", "b", "c"], "cancelar")
    }

    #[test]
    fn resolves_numbers_in_range_and_cancel_word() {
        let session = session();
        assert!(session.resolve("1").is_some());
        assert!(session.resolve(" 3 ").is_some());
        assert!(session.resolve("CANCELAR").is_some());
        assert!(session.resolve("0").is_none());
        assert!(session.resolve("4").is_none());
        assert!(session.resolve("dos").is_none());
        assert_eq!(session.resolve("2"), Some(SessionOutcome::Selected("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn owner_reply_selects() {
        let chat = FakeChat::default();
        chat.script_reply(UserId::new(2), "1");
        chat.script_reply(OWNER, "hola");
        chat.script_reply(OWNER, "3");

        let outcome = session().run(&chat, CHANNEL).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Selected("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_word_ends_session() {
        let chat = FakeChat::default();
        chat.script_reply(OWNER, "cancelar");
        assert_eq!(session().run(&chat, CHANNEL).await.unwrap(), SessionOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reply_times_out() {
        let chat = FakeChat::default();
        chat.script_reply(UserId::new(2), "2");

        let started = tokio::time::Instant::now();
        assert_eq!(session().run(&chat, CHANNEL).await.unwrap(), SessionOutcome::TimedOut);
        assert!(started.elapsed() >= SELECTION_TIMEOUT);
    }
}
