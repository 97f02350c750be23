//! SiteBlock Core Library
//!
//! This crate holds the background logic of the SiteBlock browser extension:
//! turning user-entered URLs into blocking rules, keeping the rule set free of
//! duplicates, and enforcing strict mode.
//!
//! # Architecture
//!
//! Blocking itself is done by the host browser's declarative rule engine and
//! state lives in the host's key-value storage. This crate only decides what
//! to write there. The host APIs sit behind the traits in [`host`], so the
//! same logic runs inside the extension (via `sb-wasm`), against a state file
//! (via `sb-cli`) and in tests.
//!
//! # Modules
//!
//! - `config`: runtime settings
//! - `pattern`: URL to canonical pattern translation and back
//! - `store`: add / bulk update / delete with pattern deduplication
//! - `strict`: deferred reactivation of rules disabled under strict mode
//! - `quota`: daily limit on disabling rules under strict mode
//! - `matcher`: client-side check of in-tab URL changes
//! - `messages`: request/response protocol
//! - `background`: message handler tying it together
//! - `host`: host API traits and the in-memory host
//! - `types`: shared type definitions

pub mod background;
pub mod config;
pub mod error;
pub mod host;
pub mod matcher;
pub mod messages;
pub mod pattern;
pub mod quota;
pub mod store;
pub mod strict;
pub mod types;

// Re-export commonly used types
pub use background::{Background, NavigationOutcome};
pub use config::Settings;
pub use error::{BlockerError, HostError, InvalidUrl};
pub use matcher::Matcher;
pub use messages::{Action, Response, Status};
pub use pattern::{strip_pattern, url_to_pattern};
pub use types::{DeferredEntry, DnrRule, RuleEdit, Site};
