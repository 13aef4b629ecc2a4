//! Daily per-user token budget.
//!
//! Usage is accumulated under a local calendar day key (`YYYYMMDD`); a new day
//! starts from zero because nothing is stored under the new key yet.

use chrono::{DateTime, Local};

use crate::{
    domain::{ChatMessage, UserId},
    store::Store,
    Result,
};

pub fn day_key(at: DateTime<Local>) -> String {
    at.format("%Y%m%d").to_string()
}

pub fn today_key() -> String {
    day_key(Local::now())
}

/// Rough token estimate: a quarter of the character count.
pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Per-message estimate, summed (each message rounds down on its own).
pub fn estimate_tokens(messages: &[ChatMessage]) -> u64 {
    messages
        .iter()
        .map(|m| estimate_text_tokens(&m.content))
        .sum()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaCheck {
    pub used: u64,
    pub requested: u64,
    pub limit: u64,
}

impl QuotaCheck {
    pub fn allowed(&self) -> bool {
        self.used.saturating_add(self.requested) <= self.limit
    }
}

#[derive(Clone)]
pub struct QuotaLedger {
    store: Store,
    daily_limit: u64,
}

impl QuotaLedger {
    pub fn new(store: Store, daily_limit: u64) -> Self {
        Self { store, daily_limit }
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    pub async fn used_today(&self, user: UserId) -> Result<u64> {
        self.store.used_tokens(user, &today_key()).await
    }

    pub async fn check(&self, user: UserId, tokens: u64) -> Result<QuotaCheck> {
        self.check_on(user, &today_key(), tokens).await
    }

    pub async fn check_on(&self, user: UserId, day: &str, tokens: u64) -> Result<QuotaCheck> {
        Ok(QuotaCheck {
            used: self.store.used_tokens(user, day).await?,
            requested: tokens,
            limit: self.daily_limit,
        })
    }

    pub async fn can_spend(&self, user: UserId, tokens: u64) -> Result<bool> {
        Ok(self.check(user, tokens).await?.allowed())
    }

    pub async fn charge(&self, user: UserId, tokens: u64) -> Result<()> {
        self.charge_on(user, &today_key(), tokens).await
    }

    pub async fn charge_on(&self, user: UserId, day: &str, tokens: u64) -> Result<()> {
        if tokens == 0 {
            return Ok(());
        }
        self.store.add_tokens(user, day, tokens).await
    }
}
