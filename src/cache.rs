//! Application context shared by the client and every listener.
//!
//! The [`Cache`] is updated from the read loop before listeners for the same event run,
//! so a GUILD_CREATE listener always finds its guild in the cache.

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;

use crate::Result;
use crate::gateway::codec::{Dispatch, EventKind};
use crate::models::{Application, Guild, Ready, Snowflake, UnavailableGuild, User};
use crate::serde_helpers::deserialize_with_warnings;

/// Objects built from a dispatch, handed to its listeners.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub guild: Option<Arc<Guild>>,
    pub user: Option<Arc<User>>,
}

#[derive(Debug, Default)]
pub struct Cache {
    current_user: RwLock<Option<Arc<User>>>,
    application: RwLock<Option<Application>>,
    guilds: DashMap<Snowflake, Arc<Guild>>,
    users: DashMap<Snowflake, Arc<User>>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The user the client is logged in as, known after READY.
    #[must_use]
    pub fn current_user(&self) -> Option<Arc<User>> {
        self.current_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn application(&self) -> Option<Application> {
        self.application
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.guilds.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// First guild with exactly this name.
    #[must_use]
    pub fn guild_by_name(&self, name: &str) -> Option<Arc<Guild>> {
        self.guilds
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn guilds(&self) -> Vec<Arc<Guild>> {
        self.guilds
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    #[must_use]
    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    #[must_use]
    pub fn user(&self, id: Snowflake) -> Option<Arc<User>> {
        self.users.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Update the cache from a dispatch and return the objects it produced.
    ///
    /// Events without a cached representation resolve to nothing.
    pub fn apply(&self, dispatch: &Dispatch) -> Result<Resolved> {
        let data = || dispatch.data.clone();

        match dispatch.kind {
            EventKind::Ready => {
                let ready: Ready = deserialize_with_warnings(data())?;
                let user = Arc::new(ready.user);

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    user = %user.display_name(),
                    guilds = ready.guilds.len(),
                    "session ready"
                );

                // A new session replays its guilds through GUILD_CREATE
                self.guilds.clear();
                self.users.insert(user.id, Arc::clone(&user));
                *self
                    .current_user
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&user));
                *self
                    .application
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(ready.application);

                Ok(Resolved {
                    guild: None,
                    user: Some(user),
                })
            }
            EventKind::GuildCreate | EventKind::GuildUpdate => {
                let guild = Arc::new(deserialize_with_warnings::<Guild>(data())?);
                self.guilds.insert(guild.id, Arc::clone(&guild));

                Ok(Resolved {
                    guild: Some(guild),
                    user: None,
                })
            }
            EventKind::GuildDelete => {
                let deleted: UnavailableGuild = deserialize_with_warnings(data())?;
                let guild = self.guilds.remove(&deleted.id).map(|(_, guild)| guild);

                Ok(Resolved { guild, user: None })
            }
            EventKind::UserUpdate => {
                let user = Arc::new(deserialize_with_warnings::<User>(data())?);
                self.users.insert(user.id, Arc::clone(&user));

                let mut current = self
                    .current_user
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                if current.as_ref().is_some_and(|me| me.id == user.id) {
                    *current = Some(Arc::clone(&user));
                }

                Ok(Resolved {
                    guild: None,
                    user: Some(user),
                })
            }
            _ => Ok(Resolved::default()),
        }
    }
}
