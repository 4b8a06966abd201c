use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::UserId;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::debug;

use crate::config::CooldownConfig;

/// Per-user command lock.
///
/// A user that runs a non-exempt command is blocked from every other
/// non-exempt command until the timer fires. There is no early release.
pub struct CooldownGate {
    entries: Arc<DashMap<UserId, Instant>>,
    duration: Duration,
    enabled: bool,
    exempt: HashSet<String>,
}

impl CooldownGate {
    pub fn new(
        enabled: bool,
        duration: Duration,
        exempt: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            duration,
            enabled,
            exempt: exempt.into_iter().map(|c| c.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &CooldownConfig) -> Self {
        Self::new(
            config.enabled,
            Duration::from_millis(config.duration_ms),
            config.exempt.iter().cloned(),
        )
    }

    pub fn is_exempt(&self, command: &str) -> bool {
        !self.enabled || self.exempt.contains(&command.to_lowercase())
    }

    pub fn is_blocked(&self, user: UserId) -> bool {
        self.enabled && self.entries.contains_key(&user)
    }

    /// Tiempo restante de cooldown, si lo hay.
    pub fn remaining(&self, user: UserId) -> Option<Duration> {
        self.entries
            .get(&user)
            .map(|expiry| expiry.saturating_duration_since(Instant::now()))
    }

    /// Marca al usuario como ocupado; `false` si ya lo estaba.
    pub fn acquire(&self, user: UserId) -> bool {
        if !self.enabled {
            return true;
        }

        match self.entries.entry(user) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let expiry = Instant::now() + self.duration;
                slot.insert(expiry);

                let entries = self.entries.clone();
                tokio::spawn(async move {
                    tokio::time::sleep_until(expiry).await;
                    // Solo borra la entrada que programó este timer
                    entries.remove_if(&user, |_, e| *e == expiry);
                    debug!("⏱️ Cooldown liberado para {}", user);
                });

                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: UserId = UserId::new(42);

    fn gate() -> CooldownGate {
        CooldownGate::new(
            true,
            Duration::from_secs(10),
            ["volume".to_string(), "np".to_string()],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_timer_fires() {
        let gate = gate();

        assert!(gate.acquire(USER));
        assert!(gate.is_blocked(USER));
        assert!(!gate.acquire(USER));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(gate.is_blocked(USER));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!gate.is_blocked(USER));
        assert!(gate.acquire(USER));
    }

    #[tokio::test(start_paused = true)]
    async fn users_are_independent() {
        let gate = gate();
        assert!(gate.acquire(USER));
        assert!(gate.acquire(UserId::new(7)));
        assert!(!gate.is_blocked(UserId::new(8)));
    }

    #[tokio::test]
    async fn disabled_gate_never_blocks() {
        let gate = CooldownGate::new(false, Duration::from_secs(10), Vec::new());
        assert!(gate.acquire(USER));
        assert!(gate.acquire(USER));
        assert!(!gate.is_blocked(USER));
        assert!(gate.is_exempt("play"));
    }

    #[test]
    fn exemptions_ignore_case() {
        let gate = gate();
        assert!(gate.is_exempt("Volume"));
        assert!(!gate.is_exempt("play"));
    }
}
