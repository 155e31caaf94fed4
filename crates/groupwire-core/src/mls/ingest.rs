//! Commit ordering and ingestion (C7).
//!
//! Turns a batch of kind-445 group message events into application rumors
//! and an advanced [`ClientState`], retrying the whole batch (re-sorted)
//! when a message fails for an ordering-related reason that a different
//! processing order might resolve.

use crate::env::Environment;
use crate::error::CoreError;
use crate::event::{UnsignedEvent, KIND_GROUP_MESSAGE};
use crate::mls::admin::AdminPolicy;
use crate::mls::group::{ClientState, InboundMessage};
use crate::mls::message::Envelope;

/// One event that could not be turned into an application rumor even after
/// exhausting retries.
#[derive(Debug, Clone)]
pub struct UnreadableEvent {
    /// The event id, for the caller to report non-blockingly.
    pub id: String,
    /// Human-readable reason, taken from the error that produced it.
    pub reason: String,
}

/// The result of ingesting a batch of group message events.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Decrypted application payloads, in the order they were applied.
    pub application_rumors: Vec<Vec<u8>>,
    /// Events that could not be processed, with their failure reason.
    pub unreadable: Vec<UnreadableEvent>,
    /// Count of commits that were merged and advanced the epoch.
    pub commits_applied: usize,
}

struct PendingEvent<'a> {
    event: &'a UnsignedEvent,
    mls_bytes: Vec<u8>,
}

fn decrypt_event<E: Environment>(state: &ClientState<E>, event: &UnsignedEvent) -> Result<Vec<u8>, CoreError> {
    let envelope_bytes = groupwire_codec::primitives::from_base64(&event.content)?;
    let envelope = Envelope::from_bytes(&envelope_bytes)?;

    for (_, key) in state.epoch_history().iter() {
        if let Ok(plaintext) = crate::mls::message::decrypt_envelope(key, &envelope) {
            return Ok(plaintext);
        }
    }

    Err(CoreError::Decrypt("no retained epoch key could decrypt this envelope".to_string()))
}

fn sort_key(event: &UnsignedEvent) -> (u64, [u8; 32], String) {
    let publisher = event.pubkey_bytes().unwrap_or([0u8; 32]);
    (event.created_at, publisher, event.id.clone())
}

/// Ingests `events` (each expected to be kind 445) against `state`, applying
/// admin-accepted commits, collecting application payloads, and retrying
/// the remaining batch up to `max_retries` times on ordering failures.
///
/// `persist` is invoked after each commit is merged, so that a crash
/// mid-batch leaves previously-applied commits durable; it is not called
/// when the batch contains no commits.
pub fn ingest<E: Environment>(
    state: &mut ClientState<E>,
    events: &[UnsignedEvent],
    admin_policy: &AdminPolicy,
    max_retries: u32,
    mut persist: impl FnMut(&ClientState<E>) -> Result<(), CoreError>,
) -> Result<IngestOutcome, CoreError> {
    state.remember_current_epoch()?;

    let mut outcome = IngestOutcome::default();

    let mut pending: Vec<PendingEvent<'_>> = Vec::new();
    for event in events {
        if event.kind != KIND_GROUP_MESSAGE {
            outcome.unreadable.push(UnreadableEvent {
                id: event.id.clone(),
                reason: format!("expected kind {KIND_GROUP_MESSAGE}, got {}", event.kind),
            });
            continue;
        }

        match decrypt_event(state, event) {
            Ok(mls_bytes) => pending.push(PendingEvent { event, mls_bytes }),
            Err(err) => outcome.unreadable.push(UnreadableEvent { id: event.id.clone(), reason: err.to_string() }),
        }
    }

    let mut round = 0u32;
    loop {
        pending.sort_by(|a, b| sort_key(a.event).cmp(&sort_key(b.event)));

        let mut retry_next_round = Vec::new();

        for item in pending {
            match state.process_inbound(&item.mls_bytes) {
                Ok(InboundMessage::Application { plaintext, .. }) => {
                    outcome.application_rumors.push(plaintext);
                },
                Ok(InboundMessage::Proposal { .. } | InboundMessage::ExternalJoinProposal) => {},
                Ok(InboundMessage::Commit { sender, staged }) => {
                    let Some(group_data) = state.extract_group_data() else {
                        outcome.unreadable.push(UnreadableEvent {
                            id: item.event.id.clone(),
                            reason: "group data extension missing; cannot evaluate admin policy".to_string(),
                        });
                        continue;
                    };

                    if admin_policy.accepts(&group_data, sender.as_ref()) {
                        state.merge_staged_commit(staged)?;
                        state.remember_current_epoch()?;
                        outcome.commits_applied += 1;
                        persist(state)?;
                    } else {
                        tracing::warn!(event_id = %item.event.id, "rejected commit from non-admin sender");
                    }
                },
                Err(err) if err.is_batch_tolerable() => retry_next_round.push(item),
                Err(err) => outcome.unreadable.push(UnreadableEvent { id: item.event.id.clone(), reason: err.to_string() }),
            }
        }

        if retry_next_round.is_empty() {
            break;
        }

        if round >= max_retries {
            for item in retry_next_round {
                outcome.unreadable.push(UnreadableEvent {
                    id: item.event.id.clone(),
                    reason: "exhausted retries without resolving message order".to_string(),
                });
            }
            break;
        }

        pending = retry_next_round;
        round += 1;
    }

    Ok(outcome)
}
