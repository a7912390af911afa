//! Domain objects built from gateway dispatches and REST responses.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

/// Milliseconds between the Unix epoch and the first second of 2015.
const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

/// A unique id. Sent as a string on the wire, accepted as a string or an integer.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snowflake(#[serde_as(as = "PickFirst<(DisplayFromStr, _)>")] pub u64);

impl Snowflake {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Creation time encoded in the id.
    #[must_use]
    pub fn created_at(self) -> Option<DateTime<Utc>> {
        let millis = (self.0 >> 22).checked_add(SNOWFLAKE_EPOCH_MS)?;
        DateTime::from_timestamp_millis(i64::try_from(millis).ok()?)
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    /// The global name, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

/// Partial application object delivered with READY.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: Snowflake,
    #[serde(default)]
    pub flags: Option<u64>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    /// Empty for guilds that are unavailable
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub features: Vec<String>,
    /// Only sent with GUILD_CREATE
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub approximate_member_count: Option<u64>,
    #[serde(default)]
    pub approximate_presence_count: Option<u64>,
    #[serde(default)]
    pub unavailable: bool,
}

/// Body of GUILD_DELETE.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    /// Set when the guild went down in an outage rather than the bot leaving it
    #[serde(default)]
    pub unavailable: bool,
}

/// Body of READY.
#[non_exhaustive]
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    #[serde(rename = "v")]
    pub version: u8,
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
    pub application: Application,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

bitflags! {
    /// Gateway intents. Combine with `|`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION = 1 << 21;
        const GUILD_MESSAGE_POLLS = 1 << 24;
        const DIRECT_MESSAGE_POLLS = 1 << 25;

        /// Guild and direct messages
        const MESSAGES = Self::GUILD_MESSAGES.bits() | Self::DIRECT_MESSAGES.bits();
        /// Guild and direct message reactions
        const REACTIONS = Self::GUILD_MESSAGE_REACTIONS.bits() | Self::DIRECT_MESSAGE_REACTIONS.bits();
        /// Guild and direct typing indicators
        const TYPING = Self::GUILD_MESSAGE_TYPING.bits() | Self::DIRECT_MESSAGE_TYPING.bits();
        /// Guild and direct message polls
        const POLLS = Self::GUILD_MESSAGE_POLLS.bits() | Self::DIRECT_MESSAGE_POLLS.bits();
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::none()
    }
}

impl Intents {
    /// Intents that have to be enabled for the application before they can be requested.
    pub const PRIVILEGED: Self = Self::GUILD_MEMBERS
        .union(Self::GUILD_PRESENCES)
        .union(Self::MESSAGE_CONTENT);

    #[must_use]
    pub const fn none() -> Self {
        Self::empty()
    }

    /// Every intent except the privileged ones.
    #[must_use]
    pub const fn non_privileged() -> Self {
        Self::all().difference(Self::PRIVILEGED)
    }
}
