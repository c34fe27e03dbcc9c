//! Host-side guest registry.
//!
//! One map, keyed by guest peer identity, owns everything known about a
//! guest: the public [`GuestEntry`], the control channel it arrived on, and
//! the call leg carrying the host's stream to it (if any). The guest count
//! is the size of this map. There is no separate counter.
//!
//! Entries are replaced whole on nickname updates, and readers only ever
//! see [`GuestRoster`] snapshots taken between mutations.

use crate::transport::{DataChannel, MediaCall};
use chrono::{DateTime, Utc};
use common::types::{CallId, ChannelId, PeerId};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Nickname shown until the guest's handshake arrives.
pub const GUEST_PLACEHOLDER_NICKNAME: &str = "Guest";

/// A connected guest as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestEntry {
    pub id: PeerId,
    pub nickname: String,
    pub joined_at: DateTime<Utc>,
}

/// Immutable view of the registry at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuestRoster {
    guests: Vec<GuestEntry>,
}

impl GuestRoster {
    #[must_use]
    pub fn count(&self) -> usize {
        self.guests.len()
    }

    /// Guests ordered by peer identity.
    #[must_use]
    pub fn list(&self) -> &[GuestEntry] {
        &self.guests
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<&GuestEntry> {
        self.guests.iter().find(|g| &g.id == id)
    }

    #[must_use]
    pub fn nicknames(&self) -> Vec<String> {
        self.guests.iter().map(|g| g.nickname.clone()).collect()
    }
}

struct GuestSlot {
    entry: GuestEntry,
    channel: Box<dyn DataChannel>,
    call: Option<Box<dyn MediaCall>>,
}

/// A guest taken out of the registry, still holding its transport objects.
pub(crate) struct RemovedGuest {
    pub(crate) entry: GuestEntry,
    channel: Box<dyn DataChannel>,
    call: Option<Box<dyn MediaCall>>,
}

impl RemovedGuest {
    /// Close the guest's call leg and control channel.
    pub(crate) fn close(self) -> GuestEntry {
        if let Some(call) = self.call {
            call.close();
        }
        self.channel.close();
        self.entry
    }
}

impl From<GuestSlot> for RemovedGuest {
    fn from(slot: GuestSlot) -> Self {
        Self {
            entry: slot.entry,
            channel: slot.channel,
            call: slot.call,
        }
    }
}

#[derive(Default)]
pub(crate) struct GuestRegistry {
    guests: BTreeMap<PeerId, GuestSlot>,
}

impl GuestRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register the guest behind a new control channel with the placeholder
    /// nickname. A previous slot for the same identity is handed back.
    pub(crate) fn insert(
        &mut self,
        channel: Box<dyn DataChannel>,
    ) -> (GuestEntry, Option<RemovedGuest>) {
        let entry = GuestEntry {
            id: channel.remote_peer().clone(),
            nickname: GUEST_PLACEHOLDER_NICKNAME.to_string(),
            joined_at: Utc::now(),
        };
        debug!(
            target: "screenshare.registry",
            guest_id = %entry.id,
            channel_id = %channel.id(),
            "Guest registered"
        );
        let previous = self.guests.insert(
            entry.id.clone(),
            GuestSlot {
                entry: entry.clone(),
                channel,
                call: None,
            },
        );
        (entry, previous.map(RemovedGuest::from))
    }

    /// Apply a nickname received on `channel_id`.
    ///
    /// Returns the replacement entry, or `None` when the channel is not a
    /// live guest channel or the nickname is blank.
    pub(crate) fn rename(&mut self, channel_id: ChannelId, nickname: &str) -> Option<GuestEntry> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return None;
        }
        let slot = self
            .guests
            .values_mut()
            .find(|slot| slot.channel.id() == channel_id)?;
        slot.entry = GuestEntry {
            nickname: nickname.to_string(),
            ..slot.entry.clone()
        };
        Some(slot.entry.clone())
    }

    pub(crate) fn channel(&self, channel_id: ChannelId) -> Option<&dyn DataChannel> {
        self.guests
            .values()
            .find(|slot| slot.channel.id() == channel_id)
            .map(|slot| slot.channel.as_ref())
    }

    pub(crate) fn contains(&self, id: &PeerId) -> bool {
        self.guests.contains_key(id)
    }

    pub(crate) fn remove_by_channel(&mut self, channel_id: ChannelId) -> Option<RemovedGuest> {
        let id = self
            .guests
            .iter()
            .find(|(_, slot)| slot.channel.id() == channel_id)
            .map(|(id, _)| id.clone())?;
        self.guests.remove(&id).map(RemovedGuest::from)
    }

    pub(crate) fn remove(&mut self, id: &PeerId) -> Option<RemovedGuest> {
        self.guests.remove(id).map(RemovedGuest::from)
    }

    pub(crate) fn remove_by_call(&mut self, call_id: CallId) -> Option<RemovedGuest> {
        let id = self
            .guests
            .iter()
            .find(|(_, slot)| slot.call.as_ref().is_some_and(|c| c.id() == call_id))
            .map(|(id, _)| id.clone())?;
        self.guests.remove(&id).map(RemovedGuest::from)
    }

    pub(crate) fn has_call(&self, id: &PeerId) -> bool {
        self.guests.get(id).is_some_and(|slot| slot.call.is_some())
    }

    /// Record the call leg to a guest.
    ///
    /// # Errors
    ///
    /// Hands the call back if the guest is no longer registered.
    pub(crate) fn attach_call(
        &mut self,
        id: &PeerId,
        call: Box<dyn MediaCall>,
    ) -> Result<Option<Box<dyn MediaCall>>, Box<dyn MediaCall>> {
        match self.guests.get_mut(id) {
            Some(slot) => Ok(slot.call.replace(call)),
            None => Err(call),
        }
    }

    /// Forget a call leg that closed on its own. The guest stays.
    pub(crate) fn detach_call(&mut self, call_id: CallId) -> Option<PeerId> {
        self.guests.iter_mut().find_map(|(id, slot)| {
            if slot.call.as_ref().is_some_and(|c| c.id() == call_id) {
                slot.call = None;
                Some(id.clone())
            } else {
                None
            }
        })
    }

    /// Close every call leg, keeping the guests. Returns how many closed.
    pub(crate) fn close_calls(&mut self) -> usize {
        let mut closed = 0;
        for slot in self.guests.values_mut() {
            if let Some(call) = slot.call.take() {
                call.close();
                closed += 1;
            }
        }
        closed
    }

    pub(crate) fn live_calls(&self) -> usize {
        self.guests.values().filter(|slot| slot.call.is_some()).count()
    }

    pub(crate) fn ids(&self) -> Vec<PeerId> {
        self.guests.keys().cloned().collect()
    }

    pub(crate) fn count(&self) -> usize {
        self.guests.len()
    }

    pub(crate) fn roster(&self) -> GuestRoster {
        GuestRoster {
            guests: self.guests.values().map(|slot| slot.entry.clone()).collect(),
        }
    }

    /// Remove everyone, handing back the transport objects.
    pub(crate) fn drain(&mut self) -> Vec<RemovedGuest> {
        std::mem::take(&mut self.guests)
            .into_values()
            .map(RemovedGuest::from)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::MediaStream;
    use crate::transport::TransportError;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct StubChannel {
        id: ChannelId,
        remote: PeerId,
        closed: Arc<AtomicBool>,
    }

    impl DataChannel for StubChannel {
        fn id(&self) -> ChannelId {
            self.id
        }
        fn remote_peer(&self) -> &PeerId {
            &self.remote
        }
        fn send(&self, _payload: Value) -> Result<(), TransportError> {
            Ok(())
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct StubCall {
        id: CallId,
        remote: PeerId,
        closed: Arc<AtomicBool>,
    }

    impl MediaCall for StubCall {
        fn id(&self) -> CallId {
            self.id
        }
        fn remote_peer(&self) -> &PeerId {
            &self.remote
        }
        fn answer(&self, _stream: Option<&MediaStream>) -> Result<(), TransportError> {
            Ok(())
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn channel(remote: &str) -> (Box<dyn DataChannel>, ChannelId, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let id = ChannelId::new();
        let channel = StubChannel {
            id,
            remote: PeerId::new(remote),
            closed: Arc::clone(&closed),
        };
        (Box::new(channel), id, closed)
    }

    fn call(remote: &str) -> (Box<dyn MediaCall>, CallId, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let id = CallId::new();
        let call = StubCall {
            id,
            remote: PeerId::new(remote),
            closed: Arc::clone(&closed),
        };
        (Box::new(call), id, closed)
    }

    #[test]
    fn test_insert_uses_placeholder() {
        let mut registry = GuestRegistry::new();
        let (ch, _, _) = channel("guest-a");

        let (entry, previous) = registry.insert(ch);

        assert!(previous.is_none());
        assert_eq!(entry.id, PeerId::new("guest-a"));
        assert_eq!(entry.nickname, GUEST_PLACEHOLDER_NICKNAME);
        assert_eq!(registry.count(), 1);
        assert!(registry.contains(&PeerId::new("guest-a")));
    }

    #[test]
    fn test_rename_replaces_entry_and_keeps_join_time() {
        let mut registry = GuestRegistry::new();
        let (ch, channel_id, _) = channel("guest-a");
        let (original, _) = registry.insert(ch);

        let renamed = registry.rename(channel_id, "  Bob ").unwrap();

        assert_eq!(renamed.nickname, "Bob");
        assert_eq!(renamed.joined_at, original.joined_at);
        assert_eq!(registry.roster().list(), &[renamed]);
    }

    #[test]
    fn test_rename_ignores_blank_and_unknown_channels() {
        let mut registry = GuestRegistry::new();
        let (ch, channel_id, _) = channel("guest-a");
        registry.insert(ch);

        assert!(registry.rename(channel_id, "   ").is_none());
        assert!(registry.rename(ChannelId::new(), "Mallory").is_none());
        assert_eq!(
            registry.roster().nicknames(),
            vec![GUEST_PLACEHOLDER_NICKNAME.to_string()]
        );
    }

    #[test]
    fn test_reinsert_same_identity_returns_previous_slot() {
        let mut registry = GuestRegistry::new();
        let (first, first_id, first_closed) = channel("guest-a");
        registry.insert(first);
        let (second, _, _) = channel("guest-a");

        let (_, previous) = registry.insert(second);
        previous.unwrap().close();

        assert!(first_closed.load(Ordering::SeqCst));
        assert_eq!(registry.count(), 1);
        assert!(registry.channel(first_id).is_none());
    }

    #[test]
    fn test_roster_count_matches_list() {
        let mut registry = GuestRegistry::new();
        for name in ["c", "a", "b"] {
            let (ch, _, _) = channel(name);
            registry.insert(ch);
        }

        let roster = registry.roster();
        assert_eq!(roster.count(), roster.list().len());
        let ids: Vec<&str> = roster.list().iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_by_channel_only_touches_that_guest() {
        let mut registry = GuestRegistry::new();
        let (a, a_id, a_closed) = channel("guest-a");
        let (b, _, b_closed) = channel("guest-b");
        registry.insert(a);
        registry.insert(b);

        let removed = registry.remove_by_channel(a_id).unwrap();
        assert_eq!(removed.entry.id, PeerId::new("guest-a"));
        removed.close();

        assert!(a_closed.load(Ordering::SeqCst));
        assert!(!b_closed.load(Ordering::SeqCst));
        assert_eq!(registry.ids(), vec![PeerId::new("guest-b")]);
        assert!(registry.remove_by_channel(a_id).is_none());
    }

    #[test]
    fn test_call_leg_lifecycle() {
        let mut registry = GuestRegistry::new();
        let (ch, _, _) = channel("guest-a");
        registry.insert(ch);
        let guest = PeerId::new("guest-a");

        let (leg, call_id, _) = call("guest-a");
        assert!(registry.attach_call(&guest, leg).unwrap().is_none());
        assert!(registry.has_call(&guest));
        assert_eq!(registry.live_calls(), 1);

        assert_eq!(registry.detach_call(call_id), Some(guest.clone()));
        assert!(!registry.has_call(&guest));
        assert_eq!(registry.count(), 1);
        assert!(registry.detach_call(call_id).is_none());
    }

    #[test]
    fn test_attach_call_to_unknown_guest_hands_it_back() {
        let mut registry = GuestRegistry::new();
        let (leg, call_id, _) = call("ghost");

        let returned = registry.attach_call(&PeerId::new("ghost"), leg).unwrap_err();
        assert_eq!(returned.id(), call_id);
    }

    #[test]
    fn test_remove_by_call_closes_channel_and_call() {
        let mut registry = GuestRegistry::new();
        let (ch, _, ch_closed) = channel("guest-a");
        registry.insert(ch);
        let (leg, call_id, call_closed) = call("guest-a");
        registry.attach_call(&PeerId::new("guest-a"), leg).unwrap();

        registry.remove_by_call(call_id).unwrap().close();

        assert!(ch_closed.load(Ordering::SeqCst));
        assert!(call_closed.load(Ordering::SeqCst));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_close_calls_keeps_guests() {
        let mut registry = GuestRegistry::new();
        let mut flags = Vec::new();
        for name in ["guest-a", "guest-b"] {
            let (ch, _, _) = channel(name);
            registry.insert(ch);
            let (leg, _, closed) = call(name);
            registry.attach_call(&PeerId::new(name), leg).unwrap();
            flags.push(closed);
        }

        assert_eq!(registry.close_calls(), 2);
        assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.live_calls(), 0);
        assert_eq!(registry.close_calls(), 0);
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = GuestRegistry::new();
        let (ch, _, closed) = channel("guest-a");
        registry.insert(ch);

        let removed = registry.drain();
        assert_eq!(removed.len(), 1);
        for guest in removed {
            guest.close();
        }
        assert!(closed.load(Ordering::SeqCst));
        assert!(registry.roster().is_empty());
    }
}
