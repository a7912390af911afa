//! Bot token handling.

use reqwest::header::HeaderValue;
pub use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;
use crate::{Result, TOKEN_VAR};

const SCHEME: &str = "Bot ";

/// `Authorization` header value for `token`, marked sensitive so it never appears in
/// debug output.
///
/// A token that already carries the `Bot ` prefix is used as is.
pub fn authorization_header(token: &SecretString) -> Result<HeaderValue> {
    let token = token.expose_secret().trim();
    let mut value = if token.starts_with(SCHEME) {
        HeaderValue::from_str(token)?
    } else {
        HeaderValue::from_str(&format!("{SCHEME}{token}"))?
    };
    value.set_sensitive(true);
    Ok(value)
}

/// Read the token from the [`TOKEN_VAR`] environment variable.
pub fn token_from_env() -> Result<SecretString> {
    match std::env::var(TOKEN_VAR) {
        Ok(token) if !token.trim().is_empty() => Ok(SecretString::from(token.trim().to_owned())),
        Ok(_) => Err(Error::validation(format!("{TOKEN_VAR} is empty"))),
        Err(e) => Err(Error::validation(format!("{TOKEN_VAR} is not set: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_has_bot_scheme() {
        let header = authorization_header(&SecretString::from("abc.def")).unwrap();

        assert_eq!(header.to_str().unwrap(), "Bot abc.def");
        assert!(header.is_sensitive());
        assert_eq!(format!("{header:?}"), "Sensitive");
    }

    #[test]
    fn prefixed_token_is_not_doubled() {
        let header = authorization_header(&SecretString::from("Bot abc")).unwrap();
        assert_eq!(header.to_str().unwrap(), "Bot abc");
    }

    #[test]
    fn newline_in_token_is_rejected() {
        assert!(authorization_header(&SecretString::from("abc\ndef")).is_err());
    }
}
