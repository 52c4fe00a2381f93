//! Core data models for the marketplace client core.
//!
//! `session` holds the authenticated actor's client-side state; `grant`
//! holds upload authorization requests and the presigned grants issued for
//! them. Both serialize as camelCase JSON via `serde`.

pub mod grant;
pub mod session;
