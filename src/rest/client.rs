//! HTTP client for the REST API.
//!
//! # Example
//!
//! ```no_run
//! use democord::rest::Client;
//! use democord::rest::types::request::GuildRequest;
//! use democord::types::SecretString;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(democord::DEFAULT_API_BASE, &SecretString::from("token"))?;
//!
//! let me = client.current_user().await?;
//! let guild = client
//!     .guild(&GuildRequest::builder().id(41_771_983_423_143_937_u64).with_counts(true).build())
//!     .await?;
//! println!("{} is in {}", me.display_name(), guild.name);
//! # Ok(())
//! # }
//! ```

use reqwest::{
    Client as ReqwestClient, Method,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT},
};
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::request::{GuildRequest, ModifyGuildRequest};
use super::types::response::GatewayInfo;
use crate::auth::authorization_header;
use crate::models::{Guild, User};
use crate::{API_VERSION, Result, ToQueryParams as _};

/// Header carrying the reason shown in the guild's audit log.
pub const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";

const USER_AGENT_VALUE: &str = concat!("democord (", env!("CARGO_PKG_VERSION"), ")");

/// HTTP client for the REST API.
///
/// Every request carries `Authorization: Bot <token>`.
#[derive(Clone, Debug)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
}

impl Client {
    /// Create a client for `api_base`, for example `https://discord.com/api`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the token is not a valid header value or
    /// the HTTP client cannot be created.
    pub fn new(api_base: &str, token: &SecretString) -> Result<Self> {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, authorization_header(token)?);
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        let host = format!("{}/v{API_VERSION}/", api_base.trim_end_matches('/'));
        Ok(Self {
            host: Url::parse(&host)?,
            client,
        })
    }

    /// Versioned base URL every path is appended to.
    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    async fn get<Req: Serialize, Res: DeserializeOwned>(
        &self,
        path: &str,
        req: &Req,
    ) -> Result<Res> {
        let query = req.query_params();
        let request = self
            .client
            .request(Method::GET, format!("{}{path}{query}", self.host))
            .build()?;
        crate::request(&self.client, request).await
    }

    /// Gateway URL to connect to.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn gateway(&self) -> Result<GatewayInfo> {
        self.get("gateway", &()).await
    }

    /// The user the token belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the token is rejected.
    pub async fn current_user(&self) -> Result<User> {
        self.get("users/@me", &()).await
    }

    /// Fetch a guild, optionally with approximate member and presence counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn guild(&self, request: &GuildRequest) -> Result<Guild> {
        self.get(&format!("guilds/{}", request.id), request).await
    }

    /// Change guild settings and return the updated guild.
    ///
    /// # Errors
    ///
    /// Returns a validation error before sending if the request is invalid, or an error
    /// if the request fails.
    pub async fn modify_guild(&self, request: &ModifyGuildRequest) -> Result<Guild> {
        request.validate()?;

        let mut builder = self
            .client
            .request(Method::PATCH, format!("{}guilds/{}", self.host, request.id))
            .json(request);
        if let Some(reason) = &request.reason {
            builder = builder.header(AUDIT_LOG_REASON, HeaderValue::from_str(reason)?);
        }

        crate::request(&self.client, builder.build()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_versioned() {
        let client = Client::new("https://discord.com/api/", &SecretString::from("token")).unwrap();
        assert_eq!(client.host().as_str(), "https://discord.com/api/v10/");
    }

    #[test]
    fn invalid_base_is_rejected() {
        assert!(Client::new("not a url", &SecretString::from("token")).is_err());
    }
}
