//! Group creation and the persisted client-state wrapper (C5).
//!
//! `ClientState` owns the live `openmls` group together with the signer and
//! provider needed to keep operating on it. Creation always embeds the
//! group-data extension first in the group's context extension list, so
//! that every peer following this crate's conventions can recover the
//! group's Nostr-facing metadata straight from the MLS group context.

use openmls::prelude::*;
use openmls_basic_credential::SignatureKeyPair;
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize};

use groupwire_codec::{GroupDataExtension, EXTENSION_TYPE_GROUP_DATA};

use crate::env::Environment;
use crate::error::CoreError;
use crate::mls::credential::{self, create_credential, Identity};
use crate::mls::key_package::{self, GeneratedKeyPackage};
use crate::mls::message::{self, EpochHistory};
use crate::mls::provider::{self, MlsProvider};

/// A member's position in the group's ratchet tree.
pub type MemberId = u32;

/// Number of prior epochs' conversation keys retained for decrypt retry.
const DEFAULT_EPOCH_HISTORY_CAPACITY: usize = 3;

/// The outcome of classifying one processed inbound MLS message.
pub enum InboundMessage {
    /// An application message, decoded down to its plaintext payload.
    Application {
        /// The sender's identity, resolved from their leaf credential.
        sender: Identity,
        /// Decrypted MLS application payload.
        plaintext: Vec<u8>,
    },
    /// A standalone proposal, not yet committed.
    Proposal {
        /// The sender's identity, if their credential resolved.
        sender: Option<Identity>,
    },
    /// An external-join proposal.
    ExternalJoinProposal,
    /// A commit, staged but not yet merged.
    Commit {
        /// The sender's identity, if their credential resolved. `None` here
        /// is the "unverifiable commit" case the admin policy decides on.
        sender: Option<Identity>,
        /// The staged commit, ready for [`ClientState::merge_staged_commit`].
        staged: Box<StagedCommit>,
    },
}

/// The result of building a commit that adds one or more members.
pub struct AddMembersResult {
    /// TLS-serialized commit message, to be published as a kind-445 event.
    pub commit_bytes: Vec<u8>,
    /// TLS-serialized Welcome, shared by every admitted recipient; each
    /// recipient locates their own secrets within it by key-package hash.
    pub welcome_bytes: Vec<u8>,
}

/// The result of committing whatever proposals are currently queued.
pub struct CommitResult {
    /// TLS-serialized commit message, to be published as a kind-445 event.
    pub commit_bytes: Vec<u8>,
    /// TLS-serialized Welcome, present iff the committed proposals admitted
    /// at least one new member.
    pub welcome_bytes: Option<Vec<u8>>,
}

/// Live MLS group state plus the signer and provider needed to keep using
/// it, the unit `groupwire-client` persists and operates on per group.
pub struct ClientState<E: Environment> {
    mls_group: MlsGroup,
    signer: SignatureKeyPair,
    provider: MlsProvider<E>,
    epoch_history: EpochHistory,
}

fn leaf_capabilities() -> Capabilities {
    Capabilities::new(
        None,
        None,
        Some(&key_package::SUPPORTED_EXTENSIONS.map(ExtensionType::Unknown)),
        None,
        None,
    )
}

impl<E: Environment> ClientState<E> {
    /// Creates a new group, embedding `group_data` as the first group-context
    /// extension and pinning the MLS group id to `group_data.group_id`.
    ///
    /// `generated` supplies the creator's identity, signer, and provider;
    /// typically the same [`GeneratedKeyPackage`] already published as the
    /// creator's own key package, though its key package itself is unused
    /// here (group creation builds a fresh leaf directly).
    pub fn create(
        generated: GeneratedKeyPackage<E>,
        group_data: GroupDataExtension,
        extra_extensions: Vec<Extension>,
    ) -> Result<Self, CoreError> {
        let GeneratedKeyPackage { identity, signer, provider, .. } = generated;

        let credential = create_credential(identity);
        let credential_with_key =
            CredentialWithKey { credential, signature_key: signer.public().into() };

        let group_data_extension =
            Extension::Unknown(EXTENSION_TYPE_GROUP_DATA, UnknownExtension(group_data.encode()));
        let mut extensions = vec![group_data_extension];
        extensions.extend(extra_extensions);
        let gc_extensions = Extensions::from_vec(extensions)
            .map_err(|e| CoreError::Mls(format!("invalid group context extensions: {e}")))?;

        let group_config = MlsGroupCreateConfig::builder()
            .ciphersuite(key_package::CIPHERSUITE)
            .use_ratchet_tree_extension(true)
            .capabilities(leaf_capabilities())
            .with_group_context_extensions(gc_extensions)
            .map_err(|e| CoreError::Mls(format!("invalid group context extensions: {e}")))?
            .build();

        let group_id = GroupId::from_slice(&group_data.group_id);

        let mls_group = MlsGroup::new_with_group_id(
            &provider,
            &signer,
            &group_config,
            group_id,
            credential_with_key,
        )
        .map_err(|e| CoreError::Mls(format!("failed to create group: {e}")))?;

        signer
            .store(provider.storage())
            .map_err(|e| CoreError::Mls(format!("failed to persist signer: {e}")))?;

        Ok(Self {
            mls_group,
            signer,
            provider,
            epoch_history: EpochHistory::new(DEFAULT_EPOCH_HISTORY_CAPACITY),
        })
    }

    /// Joins a group from a Welcome message, consuming a key package
    /// generated earlier whose private material (already written to
    /// `generated`'s provider during generation) the Welcome references.
    pub fn join_from_welcome(generated: GeneratedKeyPackage<E>, welcome_bytes: &[u8]) -> Result<Self, CoreError> {
        let GeneratedKeyPackage { signer, provider, .. } = generated;

        let mls_message = MlsMessageIn::tls_deserialize(&mut &welcome_bytes[..])
            .map_err(|e| CoreError::Decode(format!("invalid welcome bytes: {e}")))?;

        let welcome = match mls_message.extract() {
            MlsMessageBodyIn::Welcome(welcome) => welcome,
            _ => return Err(CoreError::InvalidInput("message is not a welcome".to_string())),
        };

        let join_config = MlsGroupJoinConfig::builder().use_ratchet_tree_extension(true).build();

        let mls_group = StagedWelcome::new_from_welcome(&provider, &join_config, welcome, None)
            .map_err(|e| CoreError::ProtocolViolation(format!("failed to stage welcome: {e}")))?
            .into_group(&provider)
            .map_err(|e| CoreError::ProtocolViolation(format!("failed to join group from welcome: {e}")))?;

        signer
            .store(provider.storage())
            .map_err(|e| CoreError::Mls(format!("failed to persist signer: {e}")))?;

        Ok(Self {
            mls_group,
            signer,
            provider,
            epoch_history: EpochHistory::new(DEFAULT_EPOCH_HISTORY_CAPACITY),
        })
    }

    /// The MLS group identifier, equal to the group-data extension's
    /// `group_id` at creation time.
    pub fn group_id(&self) -> &GroupId {
        self.mls_group.group_id()
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.mls_group.epoch().as_u64()
    }

    /// Count of occupied leaves in the ratchet tree.
    pub fn member_count(&self) -> usize {
        self.mls_group.members().count()
    }

    /// This client's own leaf index.
    pub fn own_leaf_index(&self) -> MemberId {
        self.mls_group.own_leaf_index().u32()
    }

    /// Locates the first group-context extension of type `0xf2ee` and
    /// decodes it. Returns `None` on absence or decode failure (logged).
    pub fn extract_group_data(&self) -> Option<GroupDataExtension> {
        let bytes = self.mls_group.extensions().iter().find_map(|ext| match ext {
            Extension::Unknown(EXTENSION_TYPE_GROUP_DATA, UnknownExtension(bytes)) => {
                Some(bytes.clone())
            },
            _ => None,
        })?;

        match GroupDataExtension::decode(&bytes) {
            Ok(data) => Some(data),
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode group data extension");
                None
            },
        }
    }

    /// The leaf index of the member whose credential resolves to `identity`.
    pub fn leaf_index_for(&self, identity: &Identity) -> Option<MemberId> {
        self.mls_group.members().find_map(|m| {
            (credential::get_pubkey(&m.credential).ok().as_ref() == Some(identity))
                .then_some(m.index.u32())
        })
    }

    /// The identity of the member at `leaf_index`, if occupied and its
    /// credential resolves.
    pub fn leaf_identity(&self, leaf_index: MemberId) -> Option<Identity> {
        self.mls_group.members().find_map(|m| {
            if m.index.u32() == leaf_index {
                credential::get_pubkey(&m.credential).ok()
            } else {
                None
            }
        })
    }

    /// Exports a raw secret from the current epoch's key schedule.
    pub fn export_secret(&self, label: &str, context: &[u8], length: usize) -> Result<Vec<u8>, CoreError> {
        self.mls_group
            .export_secret(self.provider.crypto(), label, context, length)
            .map_err(|e| CoreError::Mls(format!("failed to export secret: {e}")))
    }

    /// Derives this epoch's envelope conversation key (§4.6) from the MLS
    /// exporter secret.
    pub fn conversation_key(&self) -> Result<[u8; 32], CoreError> {
        let secret = self.export_secret(message::EXPORTER_LABEL, message::EXPORTER_CONTEXT, message::EXPORTER_LENGTH)?;
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| CoreError::Mls("exporter secret was not 32 bytes".to_string()))?;
        Ok(message::derive_conversation_key(&secret))
    }

    /// Records the current epoch's conversation key in the retry history.
    pub fn remember_current_epoch(&mut self) -> Result<(), CoreError> {
        let key = self.conversation_key()?;
        self.epoch_history.record(self.epoch(), key);
        Ok(())
    }

    /// The retained history of recent epochs' conversation keys.
    pub fn epoch_history(&self) -> &EpochHistory {
        &self.epoch_history
    }

    /// Encrypts `plaintext` as an MLS application message, returning the
    /// TLS-serialized wire bytes (still to be envelope-encrypted by the
    /// caller via [`crate::mls::message`]).
    pub fn create_application_message(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        let message = self
            .mls_group
            .create_message(&self.provider, &self.signer, plaintext)
            .map_err(|e| CoreError::Mls(format!("failed to create application message: {e}")))?;

        message
            .tls_serialize_detached()
            .map_err(|e| CoreError::Mls(format!("failed to serialize application message: {e}")))
    }

    /// Deserializes and processes one inbound TLS-encoded MLS message,
    /// classifying it by content type.
    ///
    /// Failures here are reported as [`CoreError::Ordering`] — an
    /// out-of-order or missing-prior-commit condition is exactly the retry
    /// trigger ingestion (C7) acts on.
    pub fn process_inbound(&mut self, mls_bytes: &[u8]) -> Result<InboundMessage, CoreError> {
        let mls_message = MlsMessageIn::tls_deserialize(&mut &mls_bytes[..])
            .map_err(|e| CoreError::Decode(format!("invalid MLS message: {e}")))?;

        let protocol_message: ProtocolMessage = mls_message
            .try_into()
            .map_err(|e| CoreError::Decode(format!("not a protocol message: {e:?}")))?;

        let processed = self
            .mls_group
            .process_message(&self.provider, protocol_message)
            .map_err(|e| CoreError::Ordering(format!("failed to process mls message: {e}")))?;

        let sender = credential::get_pubkey(processed.credential()).ok();

        Ok(match processed.into_content() {
            ProcessedMessageContent::ApplicationMessage(app) => InboundMessage::Application {
                sender: sender.ok_or_else(|| {
                    CoreError::ProtocolViolation("application message sender credential invalid".to_string())
                })?,
                plaintext: app.into_bytes(),
            },
            ProcessedMessageContent::ProposalMessage(_) => InboundMessage::Proposal { sender },
            ProcessedMessageContent::ExternalJoinProposalMessage(_) => InboundMessage::ExternalJoinProposal,
            ProcessedMessageContent::StagedCommitMessage(staged) => {
                InboundMessage::Commit { sender, staged }
            },
        })
    }

    /// Merges a commit already staged by [`Self::process_inbound`], advancing
    /// the epoch.
    pub fn merge_staged_commit(&mut self, staged_commit: Box<StagedCommit>) -> Result<(), CoreError> {
        self.mls_group
            .merge_staged_commit(&self.provider, *staged_commit)
            .map_err(|e| CoreError::ProtocolViolation(format!("failed to merge commit: {e}")))
    }

    /// Builds a commit that adds `key_packages` as new members, producing a
    /// Welcome for the admitted members.
    pub fn add_members(&mut self, key_packages: &[KeyPackage]) -> Result<AddMembersResult, CoreError> {
        let (commit, welcome, _group_info) = self
            .mls_group
            .add_members(&self.provider, &self.signer, key_packages)
            .map_err(|e| CoreError::Mls(format!("failed to add members: {e}")))?;

        let commit_bytes = commit
            .tls_serialize_detached()
            .map_err(|e| CoreError::Mls(format!("failed to serialize commit: {e}")))?;
        let welcome_bytes = welcome
            .tls_serialize_detached()
            .map_err(|e| CoreError::Mls(format!("failed to serialize welcome: {e}")))?;

        Ok(AddMembersResult { commit_bytes, welcome_bytes })
    }

    /// Builds a commit that removes the members at `leaf_indices`.
    pub fn remove_members(&mut self, leaf_indices: &[MemberId]) -> Result<Vec<u8>, CoreError> {
        if leaf_indices.is_empty() {
            return Err(CoreError::InvalidInput("no members specified for removal".to_string()));
        }

        let indices: Vec<LeafNodeIndex> = leaf_indices.iter().copied().map(LeafNodeIndex::new).collect();

        let (commit, _welcome, _group_info) = self
            .mls_group
            .remove_members(&self.provider, &self.signer, &indices)
            .map_err(|e| CoreError::Mls(format!("failed to remove members: {e}")))?;

        commit
            .tls_serialize_detached()
            .map_err(|e| CoreError::Mls(format!("failed to serialize commit: {e}")))
    }

    /// Commits every proposal currently queued by this group (standalone
    /// Proposal messages staged via [`Self::process_inbound`]), optionally
    /// producing a Welcome if the bundle admitted new members.
    pub fn commit_to_pending_proposals(&mut self) -> Result<CommitResult, CoreError> {
        let (commit, welcome, _group_info) = self
            .mls_group
            .commit_to_pending_proposals(&self.provider, &self.signer)
            .map_err(|e| CoreError::Mls(format!("failed to commit pending proposals: {e}")))?;

        let commit_bytes = commit
            .tls_serialize_detached()
            .map_err(|e| CoreError::Mls(format!("failed to serialize commit: {e}")))?;
        let welcome_bytes = welcome
            .map(|w| w.tls_serialize_detached())
            .transpose()
            .map_err(|e| CoreError::Mls(format!("failed to serialize welcome: {e}")))?;

        Ok(CommitResult { commit_bytes, welcome_bytes })
    }

    /// Creates this member's own Remove proposal; another member must commit
    /// it to actually remove this client from the group.
    pub fn propose_leave(&mut self) -> Result<Vec<u8>, CoreError> {
        let proposal = self
            .mls_group
            .leave_group(&self.provider, &self.signer)
            .map_err(|e| CoreError::Mls(format!("failed to create leave proposal: {e}")))?;

        proposal
            .tls_serialize_detached()
            .map_err(|e| CoreError::Mls(format!("failed to serialize leave proposal: {e}")))
    }

    /// Merges this client's own pending commit (e.g. after `add_members` or
    /// `remove_members`), advancing the epoch.
    pub fn merge_pending_commit(&mut self) -> Result<(), CoreError> {
        self.mls_group
            .merge_pending_commit(&self.provider)
            .map_err(|e| CoreError::Mls(format!("failed to merge pending commit: {e}")))
    }

    /// Serializes the complete client state to opaque bytes: the network
    /// group id, followed by the `openmls` storage backend's own
    /// persistence-feature encoding (which includes the signer once stored).
    pub fn serialize(&self) -> Result<Vec<u8>, CoreError> {
        let storage_bytes = provider::persist_storage(self.provider.storage())?;
        let mut out = Vec::with_capacity(self.mls_group.group_id().as_slice().len() + storage_bytes.len());
        out.extend_from_slice(self.mls_group.group_id().as_slice());
        out.extend_from_slice(&storage_bytes);
        Ok(out)
    }

    /// Restores a client state previously produced by [`Self::serialize`].
    /// Corrupted input is surfaced as [`CoreError::Decode`].
    pub fn deserialize(env: E, bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < 32 {
            return Err(CoreError::Decode("client state shorter than a group id".to_string()));
        }
        let (group_id_bytes, storage_bytes) = bytes.split_at(32);
        let group_id = GroupId::from_slice(group_id_bytes);

        let storage = provider::restore_storage(storage_bytes)?;
        let provider = MlsProvider::from_storage(env, storage);

        let mls_group = MlsGroup::load(provider.storage(), &group_id)
            .map_err(|e| CoreError::Decode(format!("failed to load group from storage: {e}")))?
            .ok_or_else(|| CoreError::Decode("group not present in restored storage".to_string()))?;

        let own_leaf = mls_group
            .own_leaf()
            .ok_or_else(|| CoreError::Decode("own leaf missing after restore".to_string()))?;

        let signer = SignatureKeyPair::read(
            provider.storage(),
            own_leaf.signature_key().as_slice(),
            mls_group.ciphersuite().signature_algorithm(),
        )
        .ok_or_else(|| CoreError::Decode("signer not found in restored storage".to_string()))?;

        Ok(Self {
            mls_group,
            signer,
            provider,
            epoch_history: EpochHistory::new(DEFAULT_EPOCH_HISTORY_CAPACITY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_support::TestEnvironment;
    use crate::mls::key_package::generate_key_package;

    fn sample_group_data(group_id: [u8; 32], admins: Vec<String>) -> GroupDataExtension {
        GroupDataExtension::new(
            group_id,
            "book club",
            "weekly chat",
            admins,
            vec!["wss://relay.example".to_string()],
        )
    }

    fn creator_identity_hex(identity: &Identity) -> String {
        groupwire_codec::primitives::to_hex(identity)
    }

    #[test]
    fn create_embeds_group_data_as_first_extension_and_pins_group_id() {
        let creator_identity: Identity = [1u8; 32];
        let generated = generate_key_package(TestEnvironment::default(), creator_identity, false, 7_776_000).unwrap();
        let group_id = [9u8; 32];
        let group_data = sample_group_data(group_id, vec![creator_identity_hex(&creator_identity)]);

        let state = ClientState::create(generated, group_data.clone(), vec![]).unwrap();

        assert_eq!(state.group_id().as_slice(), group_id.as_slice());
        assert_eq!(state.epoch(), 0);
        assert_eq!(state.member_count(), 1);

        let extracted = state.extract_group_data().unwrap();
        assert_eq!(extracted, group_data);
    }

    #[test]
    fn extract_group_data_reflects_the_embedded_admin_list() {
        let creator_identity: Identity = [2u8; 32];
        let generated = generate_key_package(TestEnvironment::default(), creator_identity, false, 7_776_000).unwrap();
        let admin_hex = creator_identity_hex(&creator_identity);
        let group_data = sample_group_data([3u8; 32], vec![admin_hex.clone()]);
        let state = ClientState::create(generated, group_data, vec![]).unwrap();

        let extracted = state.extract_group_data().unwrap();
        assert!(extracted.is_admin(&admin_hex));
        assert!(!extracted.is_admin("not an admin"));
    }

    #[test]
    fn add_member_welcome_join_and_exchange_application_message() {
        let alice_identity: Identity = [10u8; 32];
        let alice_generated =
            generate_key_package(TestEnvironment::default(), alice_identity, false, 7_776_000).unwrap();
        let group_data = sample_group_data([4u8; 32], vec![creator_identity_hex(&alice_identity)]);
        let mut alice = ClientState::create(alice_generated, group_data, vec![]).unwrap();

        let bob_identity: Identity = [11u8; 32];
        let bob_generated = generate_key_package(TestEnvironment::default(), bob_identity, true, 7_776_000).unwrap();
        let bob_key_package = bob_generated.key_package.clone();

        let add_result = alice.add_members(&[bob_key_package]).unwrap();
        alice.merge_pending_commit().unwrap();
        assert_eq!(alice.epoch(), 1);
        assert_eq!(alice.member_count(), 2);

        let mut bob = ClientState::join_from_welcome(bob_generated, &add_result.welcome_bytes).unwrap();
        assert_eq!(bob.epoch(), 1);
        assert_eq!(bob.group_id(), alice.group_id());

        let wire = alice.create_application_message(b"hello bob").unwrap();
        match bob.process_inbound(&wire).unwrap() {
            InboundMessage::Application { sender, plaintext } => {
                assert_eq!(sender, alice_identity);
                assert_eq!(plaintext, b"hello bob");
            },
            _ => panic!("expected an application message"),
        }
    }

    #[test]
    fn remove_members_revokes_future_decryption() {
        let alice_identity: Identity = [20u8; 32];
        let alice_generated =
            generate_key_package(TestEnvironment::default(), alice_identity, false, 7_776_000).unwrap();
        let group_data = sample_group_data([5u8; 32], vec![creator_identity_hex(&alice_identity)]);
        let mut alice = ClientState::create(alice_generated, group_data, vec![]).unwrap();

        let bob_identity: Identity = [21u8; 32];
        let bob_generated = generate_key_package(TestEnvironment::default(), bob_identity, true, 7_776_000).unwrap();
        let bob_key_package = bob_generated.key_package.clone();

        let add_result = alice.add_members(&[bob_key_package]).unwrap();
        alice.merge_pending_commit().unwrap();
        let mut bob = ClientState::join_from_welcome(bob_generated, &add_result.welcome_bytes).unwrap();

        let bob_leaf = alice.leaf_index_for(&bob_identity).unwrap();
        alice.remove_members(&[bob_leaf]).unwrap();
        alice.merge_pending_commit().unwrap();
        assert_eq!(alice.member_count(), 1);

        let wire = alice.create_application_message(b"bob is gone").unwrap();
        assert!(bob.process_inbound(&wire).is_err());
    }

    #[test]
    fn commit_to_pending_proposals_merges_a_standalone_proposal() {
        let alice_identity: Identity = [80u8; 32];
        let alice_generated = generate_key_package(TestEnvironment::default(), alice_identity, false, 7_776_000).unwrap();
        let group_data = sample_group_data([7u8; 32], vec![creator_identity_hex(&alice_identity)]);
        let mut alice = ClientState::create(alice_generated, group_data, vec![]).unwrap();

        let bob_identity: Identity = [81u8; 32];
        let bob_generated = generate_key_package(TestEnvironment::default(), bob_identity, true, 7_776_000).unwrap();
        let bob_key_package = bob_generated.key_package.clone();
        let add_result = alice.add_members(&[bob_key_package]).unwrap();
        alice.merge_pending_commit().unwrap();
        let mut bob = ClientState::join_from_welcome(bob_generated, &add_result.welcome_bytes).unwrap();

        let leave_proposal = bob.propose_leave().unwrap();
        match alice.process_inbound(&leave_proposal).unwrap() {
            InboundMessage::Proposal { .. } => {},
            _ => panic!("expected a standalone proposal"),
        }

        let commit_result = alice.commit_to_pending_proposals().unwrap();
        assert!(commit_result.welcome_bytes.is_none());
        alice.merge_pending_commit().unwrap();
        assert_eq!(alice.member_count(), 1);
    }

    #[test]
    fn serialize_then_deserialize_preserves_group_id_and_epoch() {
        let identity: Identity = [30u8; 32];
        let generated = generate_key_package(TestEnvironment::default(), identity, false, 7_776_000).unwrap();
        let group_data = sample_group_data([6u8; 32], vec![creator_identity_hex(&identity)]);
        let state = ClientState::create(generated, group_data, vec![]).unwrap();

        let bytes = state.serialize().unwrap();
        let restored = ClientState::deserialize(TestEnvironment::default(), &bytes).unwrap();

        assert_eq!(restored.group_id(), state.group_id());
        assert_eq!(restored.epoch(), state.epoch());
        assert_eq!(restored.member_count(), state.member_count());
    }

    #[test]
    fn deserialize_rejects_truncated_bytes() {
        let result = ClientState::<TestEnvironment>::deserialize(TestEnvironment::default(), &[1, 2, 3]);
        assert!(result.is_err());
    }
}
