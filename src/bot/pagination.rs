use futures::StreamExt;
use serenity::{
    builder::CreateEmbed,
    model::id::{ChannelId, MessageId, UserId},
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::debug;

use super::chat::{ChatGateway, Navigation};
use crate::error::MusicResult;

pub const PAGE_SIZE: usize = 10;
/// Con esta cantidad o menos se muestra una sola página sin navegación.
pub const PAGINATION_THRESHOLD: usize = 11;
pub const PAGINATION_LIFETIME: Duration = Duration::from_secs(120);

/// Navegación por páginas de una lista, atada a quien la pidió.
#[derive(Debug, Clone)]
pub struct PaginationSession<T> {
    owner: UserId,
    pages: Vec<Vec<T>>,
    current: usize,
    expires_at: Instant,
}

impl<T: Clone> PaginationSession<T> {
    /// `None` cuando la lista cabe sin paginar.
    pub fn new(owner: UserId, items: &[T], now: Instant) -> Option<Self> {
        if items.len() <= PAGINATION_THRESHOLD {
            return None;
        }

        Some(Self {
            owner,
            pages: items.chunks(PAGE_SIZE).map(<[T]>::to_vec).collect(),
            current: 0,
            expires_at: now + PAGINATION_LIFETIME,
        })
    }

    /// Página actual, 0-based.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self) -> &[T] {
        &self.pages[self.current]
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Applies a navigation action; returns `true` when the page changed.
    ///
    /// Input from anyone but the owner, input after expiry, back on the
    /// first page and forward on the last page are all no-ops.
    pub fn navigate(&mut self, actor: UserId, navigation: Navigation, now: Instant) -> bool {
        if actor != self.owner || self.is_expired(now) {
            return false;
        }

        let target = match navigation {
            Navigation::Back => self.current.checked_sub(1),
            Navigation::Forward => Some(self.current + 1).filter(|p| *p < self.pages.len()),
        };

        match target {
            Some(page) => {
                self.current = page;
                true
            }
            None => false,
        }
    }
}

impl<T: Clone + Send + Sync> PaginationSession<T> {
    /// Escucha las reacciones sobre `message` y lo edita al cambiar de página.
    ///
    /// `render` recibe la página, su índice y el total de páginas.
    pub async fn drive<F>(
        mut self,
        chat: Arc<dyn ChatGateway>,
        channel: ChannelId,
        message: MessageId,
        render: F,
    ) -> MusicResult<()>
    where
        F: Fn(&[T], usize, usize) -> CreateEmbed + Send + Sync,
    {
        chat.add_reactions(
            channel,
            message,
            &[Navigation::BACK_EMOJI, Navigation::FORWARD_EMOJI],
        )
        .await?;

        let lifetime = self.expires_at.saturating_duration_since(Instant::now());
        let mut events = chat
            .navigation_events(channel, message, self.owner, lifetime)
            .await?;

        while let Some((user, navigation)) = events.next().await {
            if !self.navigate(user, navigation, Instant::now()) {
                continue;
            }
            let embed = render(self.page(), self.current(), self.page_count());
            chat.edit_embed(channel, message, embed).await?;
        }

        debug!("⌛ Paginación del mensaje {} terminada", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChat;
    use pretty_assertions::assert_eq;

    const OWNER: UserId = UserId::new(1);
    const OTHER: UserId = UserId::new(2);

    fn numbers(n: usize) -> Vec<usize> {
        (1..=n).collect()
    }

    #[test]
    fn short_lists_are_not_paginated() {
        let now = Instant::now();
        assert!(PaginationSession::new(OWNER, &numbers(11), now).is_none());
        assert!(PaginationSession::new(OWNER, &numbers(12), now).is_some());
    }

    #[test]
    fn splits_into_pages_of_ten() {
        let now = Instant::now();
        let mut session = PaginationSession::new(OWNER, &numbers(25), now).unwrap();
        assert_eq!(session.page_count(), 3);
        assert_eq!(session.page().len(), 10);

        assert!(session.navigate(OWNER, Navigation::Forward, now));
        assert_eq!(session.page()[0], 11);
        assert!(session.navigate(OWNER, Navigation::Forward, now));
        assert_eq!(session.page(), &[21, 22, 23, 24, 25]);
    }

    #[test]
    fn edges_do_not_wrap() {
        let now = Instant::now();
        let mut session = PaginationSession::new(OWNER, &numbers(25), now).unwrap();

        assert!(!session.navigate(OWNER, Navigation::Back, now));
        assert_eq!(session.current(), 0);

        session.navigate(OWNER, Navigation::Forward, now);
        session.navigate(OWNER, Navigation::Forward, now);
        assert!(!session.navigate(OWNER, Navigation::Forward, now));
        assert_eq!(session.current(), 2);
    }

    #[test]
    fn only_owner_before_expiry() {
        let now = Instant::now();
        let mut session = PaginationSession::new(OWNER, &numbers(25), now).unwrap();

        assert!(!session.navigate(OTHER, Navigation::Forward, now));
        assert!(!session.navigate(
            OWNER,
            Navigation::Forward,
            now + PAGINATION_LIFETIME
        ));
        assert_eq!(session.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drive_edits_message_on_page_change() {
        let chat = Arc::new(FakeChat::default());
        chat.script_navigation(OWNER, Navigation::Forward);
        chat.script_navigation(OTHER, Navigation::Forward);
        chat.script_navigation(OWNER, Navigation::Forward);
        chat.script_navigation(OWNER, Navigation::Forward);

        let session = PaginationSession::new(OWNER, &numbers(25), Instant::now()).unwrap();
        session
            .drive(chat.clone(), ChannelId::new(5), MessageId::new(9), |page, index, total| {
                CreateEmbed::default().title(format!("{}/{} desde {}", index + 1, total, page[0]))
            })
            .await
            .unwrap();

        let titles: Vec<String> = chat
            .edited_embeds()
            .iter()
            .map(|e| e["title"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(titles, vec!["2/3 desde 11", "3/3 desde 21"]);
    }
}
