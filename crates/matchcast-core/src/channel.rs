//! Channel directory for Matchcast.
//!
//! Channels are named topics that connections subscribe to in order to
//! receive broadcasts. A channel exists only while it has subscribers.

use crate::message::ConnectionId;
use crate::registry::{Hub, HubConfig, HubError, HubState};
use std::collections::HashSet;
use tracing::debug;

/// Maximum channel name (and room id) length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    validate_identifier(name)
}

pub(crate) fn validate_identifier(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Name too long");
    }
    if name.starts_with('$') {
        return Err("Names starting with '$' are reserved");
    }
    // Check for valid ASCII printable characters
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Name contains invalid characters");
    }
    Ok(())
}

/// A channel and its subscriber set.
#[derive(Debug)]
pub struct Channel {
    /// Channel name.
    name: ChannelId,
    /// Set of subscribed connection IDs.
    subscribers: HashSet<ConnectionId>,
}

impl Channel {
    /// Create a new, empty channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashSet::new(),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a connection is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, connection_id: &str) -> bool {
        self.subscribers.contains(connection_id)
    }

    /// Subscribe a connection to this channel.
    ///
    /// Returns `true` if the connection was not already subscribed.
    pub fn subscribe(&mut self, connection_id: impl Into<ConnectionId>) -> bool {
        self.subscribers.insert(connection_id.into())
    }

    /// Unsubscribe a connection from this channel.
    ///
    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, connection_id: &str) -> bool {
        self.subscribers.remove(connection_id)
    }

    /// Iterate over subscriber IDs.
    pub fn subscribers(&self) -> impl Iterator<Item = &ConnectionId> {
        self.subscribers.iter()
    }

    /// Check if the channel is empty (no subscribers).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl HubState {
    fn subscribe(
        &mut self,
        config: &HubConfig,
        connection_id: &str,
        channel_name: &str,
    ) -> Result<bool, HubError> {
        let conn = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| HubError::UnknownConnection(connection_id.to_string()))?;

        if conn.channels.contains(channel_name) {
            return Ok(false);
        }
        if conn.channels.len() >= config.max_subscriptions_per_connection {
            return Err(HubError::MaxSubscriptionsReached);
        }
        if !self.channels.contains_key(channel_name) && self.channels.len() >= config.max_channels
        {
            return Err(HubError::MaxChannelsReached);
        }

        conn.channels.insert(channel_name.to_string());
        let channel = self
            .channels
            .entry(channel_name.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel_name, "Creating new channel");
                Channel::new(channel_name)
            });
        channel.subscribe(connection_id);

        debug!(
            channel = %channel.name(),
            connection = %connection_id,
            subscribers = channel.subscriber_count(),
            "Subscribed"
        );
        Ok(true)
    }

    fn unsubscribe(&mut self, connection_id: &str, channel_name: &str) -> Result<bool, HubError> {
        let conn = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| HubError::UnknownConnection(connection_id.to_string()))?;

        if !conn.channels.remove(channel_name) {
            return Ok(false);
        }

        if let Some(channel) = self.channels.get_mut(channel_name) {
            channel.unsubscribe(connection_id);

            debug!(
                channel = %channel_name,
                connection = %connection_id,
                subscribers = channel.subscriber_count(),
                "Unsubscribed"
            );

            if channel.is_empty() {
                self.channels.remove(channel_name);
                debug!(channel = %channel_name, "Deleted empty channel");
            }
        }

        Ok(true)
    }
}

impl Hub {
    /// Subscribe a connection to a channel, creating the channel if needed.
    ///
    /// Subscribing twice is a no-op; returns `true` only for a new
    /// subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid, the connection is
    /// unknown, or a limit is exceeded.
    pub fn subscribe(&self, connection_id: &str, channel_name: &str) -> Result<bool, HubError> {
        validate_channel_name(channel_name).map_err(HubError::InvalidChannel)?;
        self.lock()
            .subscribe(self.config(), connection_id, channel_name)
    }

    /// Unsubscribe a connection from a channel, deleting the channel once
    /// empty.
    ///
    /// Returns `false` if the connection was not subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown.
    pub fn unsubscribe(&self, connection_id: &str, channel_name: &str) -> Result<bool, HubError> {
        self.lock().unsubscribe(connection_id, channel_name)
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel_name: &str) -> bool {
        self.lock().channels.contains_key(channel_name)
    }

    /// Get the subscriber count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_name: &str) -> usize {
        self.lock()
            .channels
            .get(channel_name)
            .map(Channel::subscriber_count)
            .unwrap_or(0)
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<ChannelId> {
        self.lock().channels.keys().cloned().collect()
    }

    /// Get the channels a connection is subscribed to.
    #[must_use]
    pub fn connection_channels(&self, connection_id: &str) -> Vec<ChannelId> {
        self.lock()
            .connections
            .get(connection_id)
            .map(|conn| conn.channels.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::RecordingLink;
    use std::sync::Arc;

    #[test]
    fn test_channel_subscribe_unsubscribe() {
        let mut channel = Channel::new("test");
        assert_eq!(channel.name(), "test");

        assert!(channel.subscribe("conn-1"));
        assert!(!channel.subscribe("conn-1"));
        assert_eq!(channel.subscriber_count(), 1);
        assert!(channel.is_subscribed("conn-1"));

        channel.subscribe("conn-2");
        assert_eq!(channel.subscriber_count(), 2);

        assert!(channel.unsubscribe("conn-1"));
        assert!(!channel.is_subscribed("conn-1"));

        // Unsubscribing non-existent connection
        assert!(!channel.unsubscribe("conn-1"));
    }

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("live-football").is_ok());
        assert!(validate_channel_name("match:42").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("$system").is_err());
        assert!(validate_channel_name("bad\nname").is_err());
        assert!(validate_channel_name("gól").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }

    #[test]
    fn test_hub_subscribe_is_idempotent() {
        let hub = Hub::new();
        let id = hub.register(Arc::new(RecordingLink::new()));

        assert!(hub.subscribe(&id, "live-football").unwrap());
        assert!(!hub.subscribe(&id, "live-football").unwrap());
        assert_eq!(hub.subscriber_count("live-football"), 1);
        assert_eq!(hub.connection_channels(&id), vec!["live-football".to_string()]);
    }

    #[test]
    fn test_hub_unsubscribe_prunes_channel() {
        let hub = Hub::new();
        let id = hub.register(Arc::new(RecordingLink::new()));

        hub.subscribe(&id, "live-football").unwrap();
        assert!(hub.channel_exists("live-football"));

        assert!(hub.unsubscribe(&id, "live-football").unwrap());
        assert!(!hub.channel_exists("live-football"));
        assert!(hub.connection_channels(&id).is_empty());

        // Not subscribed any more
        assert!(!hub.unsubscribe(&id, "live-football").unwrap());
    }

    #[test]
    fn test_hub_unsubscribe_keeps_shared_channel() {
        let hub = Hub::new();
        let a = hub.register(Arc::new(RecordingLink::new()));
        let b = hub.register(Arc::new(RecordingLink::new()));

        hub.subscribe(&a, "scores").unwrap();
        hub.subscribe(&b, "scores").unwrap();
        hub.unsubscribe(&a, "scores").unwrap();

        assert!(hub.channel_exists("scores"));
        assert_eq!(hub.subscriber_count("scores"), 1);
    }

    #[test]
    fn test_hub_subscribe_unknown_connection() {
        let hub = Hub::new();
        assert!(matches!(
            hub.subscribe("conn_missing", "scores"),
            Err(HubError::UnknownConnection(_))
        ));
        assert!(!hub.channel_exists("scores"));
    }

    #[test]
    fn test_hub_subscribe_invalid_channel() {
        let hub = Hub::new();
        let id = hub.register(Arc::new(RecordingLink::new()));

        assert!(matches!(
            hub.subscribe(&id, ""),
            Err(HubError::InvalidChannel(_))
        ));
        assert!(matches!(
            hub.subscribe(&id, "$system"),
            Err(HubError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_hub_subscription_limits() {
        let hub = Hub::with_config(HubConfig {
            max_subscriptions_per_connection: 2,
            max_channels: 3,
            ..Default::default()
        });
        let a = hub.register(Arc::new(RecordingLink::new()));
        let b = hub.register(Arc::new(RecordingLink::new()));

        hub.subscribe(&a, "one").unwrap();
        hub.subscribe(&a, "two").unwrap();
        assert!(matches!(
            hub.subscribe(&a, "three"),
            Err(HubError::MaxSubscriptionsReached)
        ));

        hub.subscribe(&b, "three").unwrap();
        // Joining an existing channel is fine at the channel limit
        hub.subscribe(&b, "one").unwrap();
        let c = hub.register(Arc::new(RecordingLink::new()));
        assert!(matches!(
            hub.subscribe(&c, "four"),
            Err(HubError::MaxChannelsReached)
        ));
        assert_eq!(hub.channel_names().len(), 3);
    }
}
