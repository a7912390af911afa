//! Types for the REST API.
//!
//! Request types use the builder pattern via [`bon`](https://docs.rs/bon):
//!
//! ```
//! use democord::rest::types::request::ModifyGuildRequest;
//!
//! let request = ModifyGuildRequest::builder()
//!     .id(41_771_983_423_143_937_u64)
//!     .name("Democord")
//!     .reason("rebrand")
//!     .build();
//! ```
//!
//! Responses that are domain objects ([`crate::models::User`], [`crate::models::Guild`])
//! live in [`crate::models`].

pub mod request;
pub mod response;
