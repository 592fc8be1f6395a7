//! Channel registry and reply fan-out.
//!
//! A channel is an ACL-protected reply-addressing surface: a request may
//! point `reply_to` at a channel route, and replies posted there fan out
//! to every participant, rewritten onto each participant's own subsystem.

// Layer 1: Standard library imports
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

// Layer 3: Internal module imports
use crate::access::{PrincipalRegistry, PublicKeyRecord};
use crate::message::{Message, MessagePath};
use crate::util::PrincipalId;

/// Channel registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A channel already exists at the route.
    #[error("channel already registered: {0}")]
    DuplicateChannel(String),

    /// No channel exists at the route.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The caller is neither owner nor participant.
    #[error("access denied on channel {route} for {caller}")]
    AccessDenied {
        /// Channel route.
        route: String,
        /// Denied principal.
        caller: PrincipalId,
    },

    /// The operation requires channel ownership.
    #[error("caller does not own channel {0}")]
    NotOwner(String),
}

/// One registered channel.
#[derive(Debug, Clone)]
pub struct Channel {
    /// The route replies are posted to.
    pub route: MessagePath,
    /// Owning principal.
    pub owner: PublicKeyRecord,
    /// Principals receiving fan-out copies.
    pub participants: HashSet<PrincipalId>,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
}

/// Registry of channels with per-channel participant ACLs.
///
/// # Example
/// ```rust
/// use plexus_rt::access::{PrincipalKind, PrincipalRegistry};
/// use plexus_rt::channel::ChannelManager;
/// use plexus_rt::message::MessagePath;
/// use std::sync::Arc;
///
/// let principals = Arc::new(PrincipalRegistry::new());
/// let manager = ChannelManager::new(Arc::clone(&principals), principals.kernel_pkr());
///
/// let owner = principals.mint(PrincipalKind::TopLevel, "svc", None).unwrap();
/// let route = MessagePath::parse("svc://updates").unwrap();
/// manager.register_channel(route.clone(), owner.clone()).unwrap();
///
/// assert!(manager.can_use_channel(&route, &owner));
/// ```
pub struct ChannelManager {
    channels: DashMap<String, Channel>,
    by_owner: DashMap<PrincipalId, HashSet<String>>,
    principals: Arc<PrincipalRegistry>,
    kernel: PublicKeyRecord,
}

impl ChannelManager {
    /// Create an empty channel registry.
    pub fn new(principals: Arc<PrincipalRegistry>, kernel: PublicKeyRecord) -> Self {
        Self {
            channels: DashMap::new(),
            by_owner: DashMap::new(),
            principals,
            kernel,
        }
    }

    /// Register a channel at a route.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::DuplicateChannel`] when the route is taken.
    pub fn register_channel(
        &self,
        route: MessagePath,
        owner: PublicKeyRecord,
    ) -> Result<(), ChannelError> {
        let key = route.to_string();
        if self.channels.contains_key(&key) {
            return Err(ChannelError::DuplicateChannel(key));
        }
        debug!(route = %key, owner = %owner.id(), "channel registered");
        self.by_owner
            .entry(owner.id())
            .or_default()
            .insert(key.clone());
        self.channels.insert(
            key,
            Channel {
                route,
                owner,
                participants: HashSet::new(),
                metadata: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Remove a channel. Owner or kernel only.
    ///
    /// # Errors
    ///
    /// [`ChannelError::UnknownChannel`] or [`ChannelError::NotOwner`].
    pub fn unregister_channel(
        &self,
        route: &MessagePath,
        caller: &PublicKeyRecord,
    ) -> Result<(), ChannelError> {
        let key = route.to_string();
        let owner_id = {
            let channel = self
                .channels
                .get(&key)
                .ok_or_else(|| ChannelError::UnknownChannel(key.clone()))?;
            if caller != &channel.owner && caller != &self.kernel {
                return Err(ChannelError::NotOwner(key.clone()));
            }
            channel.owner.id()
        };
        self.channels.remove(&key);
        if let Some(mut owned) = self.by_owner.get_mut(&owner_id) {
            owned.remove(&key);
        }
        Ok(())
    }

    /// Add a participant. Owner or kernel only.
    ///
    /// # Errors
    ///
    /// [`ChannelError::UnknownChannel`] or [`ChannelError::NotOwner`].
    pub fn add_participant(
        &self,
        route: &MessagePath,
        caller: &PublicKeyRecord,
        participant: &PublicKeyRecord,
    ) -> Result<(), ChannelError> {
        let key = route.to_string();
        let mut channel = self
            .channels
            .get_mut(&key)
            .ok_or_else(|| ChannelError::UnknownChannel(key.clone()))?;
        if caller != &channel.owner && caller != &self.kernel {
            return Err(ChannelError::NotOwner(key));
        }
        channel.participants.insert(participant.id());
        Ok(())
    }

    /// Remove a participant. Owner or kernel only.
    ///
    /// # Errors
    ///
    /// [`ChannelError::UnknownChannel`] or [`ChannelError::NotOwner`].
    pub fn remove_participant(
        &self,
        route: &MessagePath,
        caller: &PublicKeyRecord,
        participant: &PublicKeyRecord,
    ) -> Result<(), ChannelError> {
        let key = route.to_string();
        let mut channel = self
            .channels
            .get_mut(&key)
            .ok_or_else(|| ChannelError::UnknownChannel(key.clone()))?;
        if caller != &channel.owner && caller != &self.kernel {
            return Err(ChannelError::NotOwner(key));
        }
        channel.participants.remove(&participant.id());
        Ok(())
    }

    /// Owner, participant, or kernel.
    pub fn can_use_channel(&self, route: &MessagePath, caller: &PublicKeyRecord) -> bool {
        if caller == &self.kernel {
            return true;
        }
        match self.channels.get(&route.to_string()) {
            Some(channel) => {
                caller == &channel.owner || channel.participants.contains(&caller.id())
            }
            None => false,
        }
    }

    /// [`Self::can_use_channel`] as a result.
    ///
    /// # Errors
    ///
    /// [`ChannelError::AccessDenied`] when the caller may not use the
    /// channel.
    pub fn verify_access(
        &self,
        route: &MessagePath,
        caller: &PublicKeyRecord,
    ) -> Result<(), ChannelError> {
        if self.can_use_channel(route, caller) {
            Ok(())
        } else {
            Err(ChannelError::AccessDenied {
                route: route.to_string(),
                caller: caller.id(),
            })
        }
    }

    /// Channel registered at a path, if any.
    pub fn lookup(&self, path: &MessagePath) -> Option<Channel> {
        self.channels.get(&path.to_string()).map(|c| c.clone())
    }

    /// Routes of channels owned by a principal.
    pub fn channels_of(&self, owner: &PublicKeyRecord) -> Vec<String> {
        self.by_owner
            .get(&owner.id())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True when no channels are registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn caller_of(&self, message: &Message) -> Option<PublicKeyRecord> {
        let raw = message.custom_get("callerId")?;
        let uuid = Uuid::parse_str(raw.as_str()?).ok()?;
        self.principals.pkr_of(&PrincipalId::from_uuid(uuid))
    }

    /// Fan a reply posted to a channel route out to the participants.
    ///
    /// Returns `Ok(None)` when the path is not a channel; otherwise one
    /// copy per participant, rewritten onto the participant's subsystem
    /// (the participant principal's name).
    ///
    /// # Errors
    ///
    /// [`ChannelError::AccessDenied`] when the posting principal is
    /// neither owner nor participant.
    pub fn expand(&self, reply: &Message) -> Result<Option<Vec<Message>>, ChannelError> {
        let Some(channel) = self.lookup(reply.path()) else {
            return Ok(None);
        };

        if let Some(caller) = self.caller_of(reply) {
            self.verify_access(reply.path(), &caller)?;
        }

        let mut copies = Vec::new();
        for participant in &channel.participants {
            let Some(principal) = self.principals.get(participant) else {
                continue;
            };
            let Ok(path) = reply.path().with_subsystem(&principal.name) else {
                continue;
            };
            let copy = Message::from_parts(
                crate::util::MessageId::new(),
                path,
                reply.kind(),
                reply.body().clone(),
                reply.meta().clone(),
                reply.custom_snapshot(),
            );
            copies.push(copy);
        }
        Ok(Some(copies))
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
mod tests {
    use super::*;
    use crate::access::PrincipalKind;
    use crate::message::MessageFactory;
    use serde_json::json;

    struct Fixture {
        manager: ChannelManager,
        principals: Arc<PrincipalRegistry>,
        owner: PublicKeyRecord,
        member: PublicKeyRecord,
        stranger: PublicKeyRecord,
        route: MessagePath,
    }

    fn fixture() -> Fixture {
        let principals = Arc::new(PrincipalRegistry::new());
        let manager = ChannelManager::new(Arc::clone(&principals), principals.kernel_pkr());
        let owner = principals
            .mint(PrincipalKind::TopLevel, "svc", None)
            .unwrap();
        let member = principals
            .mint(PrincipalKind::TopLevel, "worker", None)
            .unwrap();
        let stranger = principals
            .mint(PrincipalKind::Friend, "stranger", None)
            .unwrap();
        let route = MessagePath::parse("svc://updates").unwrap();
        manager.register_channel(route.clone(), owner.clone()).unwrap();
        Fixture {
            manager,
            principals,
            owner,
            member,
            stranger,
            route,
        }
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let f = fixture();
        let err = f
            .manager
            .register_channel(f.route.clone(), f.owner.clone())
            .unwrap_err();
        assert!(matches!(err, ChannelError::DuplicateChannel(_)));
    }

    #[test]
    fn test_owner_and_kernel_can_use() {
        let f = fixture();
        assert!(f.manager.can_use_channel(&f.route, &f.owner));
        assert!(f
            .manager
            .can_use_channel(&f.route, &f.principals.kernel_pkr()));
        assert!(!f.manager.can_use_channel(&f.route, &f.stranger));
    }

    #[test]
    fn test_participant_membership() {
        let f = fixture();
        f.manager
            .add_participant(&f.route, &f.owner, &f.member)
            .unwrap();
        assert!(f.manager.can_use_channel(&f.route, &f.member));

        f.manager
            .remove_participant(&f.route, &f.owner, &f.member)
            .unwrap();
        assert!(!f.manager.can_use_channel(&f.route, &f.member));
    }

    #[test]
    fn test_only_owner_manages_participants() {
        let f = fixture();
        let err = f
            .manager
            .add_participant(&f.route, &f.stranger, &f.member)
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotOwner(_)));
    }

    #[test]
    fn test_unregister_requires_ownership() {
        let f = fixture();
        assert!(matches!(
            f.manager.unregister_channel(&f.route, &f.stranger),
            Err(ChannelError::NotOwner(_))
        ));
        f.manager.unregister_channel(&f.route, &f.owner).unwrap();
        assert!(f.manager.lookup(&f.route).is_none());
        assert!(f.manager.channels_of(&f.owner).is_empty());
    }

    #[test]
    fn test_expand_non_channel_is_none() {
        let f = fixture();
        let factory = MessageFactory::new();
        let reply = factory.create("worker://reply", json!(null)).unwrap();
        assert!(f.manager.expand(&reply).unwrap().is_none());
    }

    #[test]
    fn test_expand_fans_out_to_participants() {
        let f = fixture();
        f.manager
            .add_participant(&f.route, &f.owner, &f.member)
            .unwrap();

        let factory = MessageFactory::new();
        let reply = factory.create("svc://updates", json!({"v": 1})).unwrap();
        reply.custom_set("callerId", json!(f.owner.id().to_string()));

        let copies = f.manager.expand(&reply).unwrap().unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].path().to_string(), "worker://updates");
        assert_eq!(copies[0].body()["v"], 1);
        assert_ne!(copies[0].id(), reply.id());
    }

    #[test]
    fn test_expand_denies_strangers() {
        let f = fixture();
        let factory = MessageFactory::new();
        let reply = factory.create("svc://updates", json!(null)).unwrap();
        reply.custom_set("callerId", json!(f.stranger.id().to_string()));

        assert!(matches!(
            f.manager.expand(&reply),
            Err(ChannelError::AccessDenied { .. })
        ));
    }
}
