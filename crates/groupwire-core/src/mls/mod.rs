//! MLS integration: credentials (C3), key packages (C4), group creation and
//! client state (C5), the message pipeline (C6), commit ordering and
//! ingestion (C7), admin policy (C8), and welcome handling (C9).
//!
//! # Components
//!
//! - [`credential`]: identity ↔ MLS basic credential mapping
//! - [`key_package`]: key package generation, publication, custody hashing
//! - [`group`]: group creation and the persisted client-state wrapper
//! - [`message`]: envelope key derivation, encrypt/decrypt, rumor codec
//! - [`ingest`]: batch decrypt, deterministic commit ordering, state advance
//! - [`admin`]: admin-list enforcement for inbound commits
//! - [`welcome`]: welcome construction and join-from-welcome
//! - [`provider`]: `OpenMLS` provider built on the `Environment` abstraction

pub mod admin;
pub mod credential;
pub mod group;
pub mod ingest;
pub mod key_package;
pub mod message;
pub mod provider;
pub mod welcome;

pub use admin::AdminPolicy;
pub use credential::{create_credential, get_pubkey, AuthenticationPolicy, Identity};
pub use group::{ClientState, MemberId};
pub use ingest::{IngestOutcome, UnreadableEvent};
pub use key_package::{generate_key_package, GeneratedKeyPackage, CIPHERSUITE};
pub use message::EpochHistory;
pub use provider::MlsProvider;
pub use welcome::{referenced_key_package_refs, JoinedGroup};
