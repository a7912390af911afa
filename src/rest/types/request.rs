#![allow(
    clippy::module_name_repetitions,
    reason = "Request suffix is intentional for clarity"
)]

use bon::Builder;
use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::error::Error;
use crate::models::Snowflake;

/// AFK timeouts the API accepts, in seconds.
pub const AFK_TIMEOUTS: [u32; 5] = [60, 300, 900, 1_800, 3_600];

#[skip_serializing_none]
#[derive(Debug, Clone, Builder, Serialize)]
#[non_exhaustive]
pub struct GuildRequest {
    #[serde(skip_serializing)]
    #[builder(into)]
    pub id: Snowflake,
    /// Include approximate member and presence counts
    pub with_counts: Option<bool>,
}

/// Fields to change on a guild. Unset fields are left untouched; a setter called with
/// `None` on a nullable field clears it.
#[skip_serializing_none]
#[derive(Debug, Clone, Builder, Serialize)]
#[non_exhaustive]
pub struct ModifyGuildRequest {
    #[serde(skip_serializing)]
    #[builder(into)]
    pub id: Snowflake,
    /// Sent as the `X-Audit-Log-Reason` header
    #[serde(skip_serializing)]
    #[builder(into)]
    pub reason: Option<String>,
    #[builder(into)]
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub afk_channel_id: Option<Option<Snowflake>>,
    /// One of [`AFK_TIMEOUTS`]
    pub afk_timeout: Option<u32>,
    pub verification_level: Option<u8>,
    pub default_message_notifications: Option<u8>,
    pub explicit_content_filter: Option<u8>,
    pub owner_id: Option<Snowflake>,
    pub system_channel_id: Option<Option<Snowflake>>,
    pub premium_progress_bar_enabled: Option<bool>,
}

impl ModifyGuildRequest {
    /// Check the request before it is sent.
    pub fn validate(&self) -> crate::Result<()> {
        let is_empty = self.name.is_none()
            && self.description.is_none()
            && self.afk_channel_id.is_none()
            && self.afk_timeout.is_none()
            && self.verification_level.is_none()
            && self.default_message_notifications.is_none()
            && self.explicit_content_filter.is_none()
            && self.owner_id.is_none()
            && self.system_channel_id.is_none()
            && self.premium_progress_bar_enabled.is_none();
        if is_empty {
            return Err(Error::validation("at least one guild field must be set"));
        }

        if let Some(name) = &self.name {
            let length = name.chars().count();
            if !(2..=100).contains(&length) {
                return Err(Error::validation(format!(
                    "guild name must be between 2 and 100 characters, got {length}"
                )));
            }
        }

        if let Some(timeout) = self.afk_timeout
            && !AFK_TIMEOUTS.contains(&timeout)
        {
            return Err(Error::validation(format!(
                "afk_timeout must be one of {AFK_TIMEOUTS:?}, got {timeout}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ToQueryParams as _;
    use crate::error::Kind;

    #[test]
    fn guild_request_query() {
        let request = GuildRequest::builder().id(1_u64).with_counts(true).build();
        assert_eq!(request.query_params(), "?with_counts=true");

        let request = GuildRequest::builder().id(1_u64).build();
        assert_eq!(request.query_params(), "");
    }

    #[test]
    fn modify_guild_serializes_only_set_fields() {
        let request = ModifyGuildRequest::builder()
            .id(1_u64)
            .reason("rename")
            .name("Democord")
            .description(None)
            .build();

        request.validate().unwrap();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"name": "Democord", "description": null})
        );
    }

    #[test]
    fn modify_guild_rejects_invalid_values() {
        let empty = ModifyGuildRequest::builder().id(1_u64).build();
        assert_eq!(empty.validate().unwrap_err().kind(), Kind::Validation);

        let short = ModifyGuildRequest::builder().id(1_u64).name("x").build();
        assert!(short.validate().is_err());

        let timeout = ModifyGuildRequest::builder()
            .id(1_u64)
            .afk_timeout(120)
            .build();
        let err = timeout.validate().unwrap_err();
        assert!(err.to_string().contains("afk_timeout"));

        let valid = ModifyGuildRequest::builder()
            .id(1_u64)
            .afk_timeout(1_800)
            .build();
        valid.validate().unwrap();
    }
}
