//! REST API client and types.
//!
//! ## Available Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/gateway` | GET | Gateway discovery |
//! | `/users/@me` | GET | Current user |
//! | `/guilds/{id}` | GET | Guild, optionally with counts |
//! | `/guilds/{id}` | PATCH | Modify guild settings |

pub mod client;
pub mod types;

pub use client::Client;
