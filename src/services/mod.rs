//! Service layer: session state, request signing and upload authorization.

pub mod backend_client;
pub mod session_manager;
pub mod signer;
pub mod upload_service;
