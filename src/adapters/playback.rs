//! Playback Hint Adapter
//!
//! Implements the `PlaybackHints` port from an ordered playlist.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::ports::PlaybackHints;

/// Predicts the items following the current one in a playlist
#[derive(Debug, Default)]
pub struct PlaylistHints {
    items: RwLock<Vec<String>>,
}

impl PlaylistHints {
    pub fn new(items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().map(Into::into).collect()),
        }
    }

    /// Replace the playlist
    pub fn set_items(&self, items: impl IntoIterator<Item = impl Into<String>>) {
        *self.items.write() = items.into_iter().map(Into::into).collect();
    }

    pub fn push(&self, item: impl Into<String>) {
        self.items.write().push(item.into());
    }
}

#[async_trait]
impl PlaybackHints for PlaylistHints {
    async fn upcoming(&self, current: &str, limit: usize) -> Vec<String> {
        let items = self.items.read();
        match items.iter().position(|i| i == current) {
            Some(pos) => items.iter().skip(pos + 1).take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upcoming_items() {
        let hints = PlaylistHints::new(["ep1", "ep2", "ep3", "ep4"]);
        assert_eq!(hints.upcoming("ep2", 2).await, vec!["ep3", "ep4"]);
        assert_eq!(hints.upcoming("ep4", 2).await, Vec::<String>::new());
        assert!(hints.upcoming("unknown", 2).await.is_empty());

        hints.push("ep5");
        assert_eq!(hints.upcoming("ep4", 5).await, vec!["ep5"]);
    }
}
