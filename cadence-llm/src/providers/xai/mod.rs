//! xAI provider implementation

pub mod client;
pub mod drafts;
pub mod types;

pub use client::{XaiClient, DEFAULT_XAI_BASE_URL};
pub use drafts::{XaiDraftProvider, DEFAULT_XAI_MODEL};
