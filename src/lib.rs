#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod cache;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod models;
pub mod rest;
pub(crate) mod serde_helpers;
pub mod types;

use reqwest::{Request, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use crate::client::{Client, Config};
use crate::error::Error;
pub use crate::error::BoxError;
use crate::rest::types::response::ApiError;

pub type Result<T> = std::result::Result<T, Error>;

/// REST and gateway API version.
pub const API_VERSION: u8 = 10;

/// Base URL of the REST API, without the version segment.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api";

/// Environment variable [`Client::from_env`] reads the bot token from.
pub const TOKEN_VAR: &str = "TOKEN";

/// Trait for converting request types to URL query parameters.
///
/// This trait is automatically implemented for all types that implement [`Serialize`].
/// It uses [`serde_html_form`] to serialize the struct fields into a query string.
pub trait ToQueryParams: Serialize {
    /// Converts the request to a URL query string.
    ///
    /// Returns an empty string if no parameters are set, otherwise a string starting
    /// with `?`.
    fn query_params(&self) -> String {
        let params = serde_html_form::to_string(self)
            .inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::error!("Unable to convert to URL-encoded string {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_html_form::ser::Error = e;
            })
            .unwrap_or_default();

        if params.is_empty() {
            String::new()
        } else {
            format!("?{params}")
        }
    }
}

impl<T: Serialize> ToQueryParams for T {}

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    request: Request,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiError>(&body) {
            Ok(api_error) => format!("{} (code {})", api_error.message, api_error.code),
            Err(_) => body,
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "API request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    if status_code == StatusCode::NO_CONTENT {
        return serde_helpers::deserialize_with_warnings(serde_json::Value::Null);
    }

    let json_value = response.json::<serde_json::Value>().await?;
    serde_helpers::deserialize_with_warnings(json_value)
}
