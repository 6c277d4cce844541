//! End-to-end scenarios over the in-memory harness in `shuffle_tests`
//!
//! Each scenario drives a small group of [`shuffle_core::Round`]s to a
//! terminal [`shuffle_core::Status`] and checks the one property the
//! scenario is named for: the happy path delivers every payload, a
//! misbehaving member ends up accused, a stalled member is caught by the
//! timeout path, and so on.

use std::time::Duration;

use generic_ec::curves::Secp256k1;
use generic_ec::{NonZero, SecretScalar};
use rand::rngs::StdRng;
use rand::SeedableRng;

use shuffle_core::Status;
use shuffle_tests::{
    build_parties, build_parties_with_keys, drain_mailbox, member_id_for, run_to_completion, start_all, statuses,
    tick_all,
};

type E = Secp256k1;

const ROUND_ID: [u8; 32] = *b"scenario-round-id-0000000000000";
const TIMEOUT: Duration = Duration::from_secs(10);

fn payloads(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| vec![b'A' + i as u8; 4]).collect()
}

/// S1: three members, all shufflers, nobody misbehaves — every payload is
/// delivered and no member is accused.
#[test]
fn happy_path_all_shufflers() {
    let (mut parties, mailbox) = build_parties::<E>(payloads(3), vec![0, 1, 2], ROUND_ID, TIMEOUT);
    run_to_completion(&mut parties, &mailbox, TIMEOUT, 10_000);

    let mut delivered = Vec::new();
    for (i, status) in statuses(&parties).into_iter().enumerate() {
        match status {
            Status::Finished(payloads) => delivered.push(payloads),
            other => panic!("party {i} did not finish: {other:?}"),
        }
    }

    // every honest member's Round independently decrypts the same multiset
    let mut expected = payloads(3);
    expected.sort();
    for mut got in delivered {
        got.sort();
        assert_eq!(got, expected);
    }
}

/// S6: five members, two shufflers, happy path.
#[test]
fn happy_path_five_members_two_shufflers() {
    let (mut parties, mailbox) = build_parties::<E>(payloads(5), vec![1, 3], ROUND_ID, TIMEOUT);
    run_to_completion(&mut parties, &mailbox, TIMEOUT, 10_000);

    let mut expected = payloads(5);
    expected.sort();
    for (i, status) in statuses(&parties).into_iter().enumerate() {
        match status {
            Status::Finished(mut got) => {
                got.sort();
                assert_eq!(got, expected);
            }
            other => panic!("party {i} did not finish: {other:?}"),
        }
    }
}

/// S2: a member sends junk instead of a well-formed onion-encrypted `Data`
/// message. `shuffler[0]` can't peel it, raises a `PeelFailure`, and the
/// round falls into blame naming the sender.
#[test]
fn junk_data_is_blamed() {
    let mut member1_rng = StdRng::seed_from_u64(9001);
    let member1_secret = NonZero::<SecretScalar<E>>::random(&mut member1_rng);

    let (mut parties, mailbox) = build_parties_with_keys::<E>(
        payloads(3),
        vec![0, 1, 2],
        ROUND_ID,
        TIMEOUT,
        vec![None, Some(member1_secret.clone()), None],
    );
    start_all(&mut parties);

    let forged_payload = shuffle_core::messages::Payload::Data(shuffle_core::messages::DataMsg {
        ciphertext: b"not an onion layer".to_vec(),
    });
    let signed = shuffle_core::messages::signed_bytes(&ROUND_ID, 1, &forged_payload);
    let signature = shuffle_core::crypto::sign::sign(&member1_secret, &signed, &mut member1_rng);
    let forged = shuffle_core::codec::encode(&shuffle_core::messages::Envelope {
        round_id: ROUND_ID,
        sender_index: 1,
        payload: forged_payload,
        signature,
    });

    // drain the mailbox one message at a time, substituting the forged
    // envelope for member 1's genuine `Data` message on its way to
    // shuffler 0 (everything else is delivered untouched, since member 1's
    // outer key is still the real, signed-for one).
    loop {
        let next = mailbox.borrow_mut().pop_front();
        let Some((from, to, bytes)) = next else { break };
        let is_member1_data = from == 1
            && to == 0
            && matches!(
                shuffle_core::codec::decode::<E>(&bytes).map(|e| e.payload),
                Ok(shuffle_core::messages::Payload::Data(_))
            );
        if is_member1_data {
            parties[0].round.deliver(&forged, 1).ok();
        } else {
            parties[usize::from(to)].round.deliver(&bytes, from).ok();
        }
    }
    run_to_completion(&mut parties, &mailbox, TIMEOUT, 10_000);

    let shuffler0 = &parties[0];
    match shuffler0.round.status() {
        Status::Aborted(accused) => assert!(
            accused.contains(&member_id_for(1)),
            "expected member 1 accused, got {accused:?}"
        ),
        other => panic!("expected shuffler 0 to abort into blame, got {other:?}"),
    }
}

/// S3: the last shuffler drops one ciphertext from its final broadcast.
/// `|input|=3` but `|output|=2`; every other member sees the shrunken
/// multiset, votes no-go (or disagrees on the transcript hash), and blame
/// replay pins the drop on the shuffler once outer keys are revealed.
#[test]
fn shuffler_drops_a_ciphertext_is_blamed() {
    let mut member1_rng = StdRng::seed_from_u64(9002);
    let member1_secret = NonZero::<SecretScalar<E>>::random(&mut member1_rng);

    let (mut parties, mailbox) = build_parties_with_keys::<E>(
        payloads(3),
        vec![0, 1],
        ROUND_ID,
        TIMEOUT,
        vec![None, Some(member1_secret.clone()), None],
    );
    start_all(&mut parties);

    // every copy of shuffler 1's final broadcast is replaced with the same
    // forged (one-ciphertext-short) message, still validly signed by its
    // real outer key — shuffler 1's own transcript keeps the true version
    // it actually computed, which is exactly the discrepancy blame replay
    // is meant to catch.
    loop {
        let next = mailbox.borrow_mut().pop_front();
        let Some((from, to, bytes)) = next else { break };
        let is_shuffler1_broadcast = from == 1
            && matches!(
                shuffle_core::codec::decode::<E>(&bytes).map(|e| e.payload),
                Ok(shuffle_core::messages::Payload::EncryptedData(_))
            );
        if is_shuffler1_broadcast {
            let envelope = shuffle_core::codec::decode::<E>(&bytes).expect("well-formed broadcast");
            let shuffle_core::messages::Payload::EncryptedData(msg) = envelope.payload else {
                unreachable!("matched above")
            };
            let mut ciphertexts = msg.ciphertexts;
            ciphertexts.pop();
            let forged_payload = shuffle_core::messages::Payload::EncryptedData(
                shuffle_core::messages::EncryptedDataMsg { ciphertexts },
            );
            let signed = shuffle_core::messages::signed_bytes(&ROUND_ID, 1, &forged_payload);
            let signature = shuffle_core::crypto::sign::sign(&member1_secret, &signed, &mut member1_rng);
            let forged = shuffle_core::codec::encode(&shuffle_core::messages::Envelope {
                round_id: ROUND_ID,
                sender_index: 1,
                payload: forged_payload,
                signature,
            });
            parties[usize::from(to)].round.deliver(&forged, 1).ok();
        } else {
            parties[usize::from(to)].round.deliver(&bytes, from).ok();
        }
    }
    run_to_completion(&mut parties, &mailbox, TIMEOUT, 10_000);

    let mut saw_abort = false;
    for (i, status) in statuses(&parties).into_iter().enumerate() {
        if let Status::Aborted(accused) = status {
            saw_abort = true;
            assert!(
                accused.contains(&member_id_for(1)),
                "party {i}: expected member 1 accused, got {accused:?}"
            );
        }
    }
    assert!(saw_abort, "expected at least one party to abort into blame");
}

/// S4: a member never shows up for `PrivateKeySharing`. Every other member's
/// clock eventually passes the phase deadline and the round falls into
/// blame naming the missing member.
#[test]
fn stalled_member_is_timed_out() {
    let (mut parties, mailbox) = build_parties::<E>(payloads(3), vec![0, 1, 2], ROUND_ID, TIMEOUT);

    // drive every party except member 2 through `start`, so the round
    // reaches `PrivateKeySharing` everywhere but member 2 never discloses.
    parties[0].round.start().ok();
    parties[1].round.start().ok();
    drain_mailbox(&mut parties, &mailbox, 10_000);

    let mut now = Duration::ZERO;
    for _ in 0..8 {
        now += TIMEOUT * 2 + Duration::from_secs(1);
        tick_all(&mut parties, now);
        drain_mailbox(&mut parties, &mailbox, 10_000);
    }

    match parties[0].round.status() {
        Status::Aborted(accused) => assert!(
            accused.contains(&member_id_for(2)),
            "expected member 2 accused, got {accused:?}"
        ),
        other => panic!("expected shuffler 0 to abort into blame, got {other:?}"),
    }
}

/// The at-most-once invariant: replaying an already-accepted message doesn't
/// change the outcome (the transcript rejects the duplicate instead of
/// double-counting it).
#[test]
fn duplicate_delivery_is_idempotent() {
    let (mut parties, mailbox) = build_parties::<E>(payloads(3), vec![0, 1, 2], ROUND_ID, TIMEOUT);
    start_all(&mut parties);

    // replay every queued message twice before draining the rest
    let replay: Vec<_> = mailbox.borrow().queue_snapshot();
    for (from, to, bytes) in &replay {
        parties[usize::from(*to)].round.deliver(bytes, *from).ok();
    }
    drain_mailbox(&mut parties, &mailbox, 10_000);
    run_to_completion(&mut parties, &mailbox, TIMEOUT, 10_000);

    let mut expected = payloads(3);
    expected.sort();
    for status in statuses(&parties) {
        match status {
            Status::Finished(mut got) => {
                got.sort();
                assert_eq!(got, expected);
            }
            other => panic!("expected every party to finish, got {other:?}"),
        }
    }
}

/// Anonymity invariant #1: if two honest senders swap which payload they
/// submit, nothing observable on the wire changes. Onion layers pad the
/// inner payload to a declared length rather than leaking its size, so an
/// observer watching only message sizes — not contents, which are
/// encrypted — can't tell the two runs apart.
#[test]
fn swapping_two_honest_senders_payloads_is_wire_indistinguishable() {
    let c = payloads(3)[2].clone();
    let a = vec![b'A'; 4];
    let b = vec![b'B'; 4];

    let sizes_ab = wire_message_sizes(vec![a.clone(), b.clone(), c.clone()]);
    let sizes_ba = wire_message_sizes(vec![b, a, c]);

    assert_eq!(
        sizes_ab, sizes_ba,
        "swapping two honest senders' payloads changed the observable wire traffic shape"
    );
}

/// Runs a happy-path round to completion, recording the size of every wire
/// message as it's delivered, in delivery order.
fn wire_message_sizes(payload_set: Vec<Vec<u8>>) -> Vec<usize> {
    let (mut parties, mailbox) = build_parties::<E>(payload_set, vec![0, 1, 2], ROUND_ID, TIMEOUT);
    start_all(&mut parties);

    let mut sizes = Vec::new();
    let mut drain = |parties: &mut [shuffle_tests::Party<E>], max_steps: usize| {
        let mut steps = 0;
        while steps < max_steps {
            let next = mailbox.borrow_mut().pop_front();
            let Some((from, to, bytes)) = next else { break };
            steps += 1;
            sizes.push(bytes.len());
            parties[usize::from(to)].round.deliver(&bytes, from).ok();
        }
    };
    drain(&mut parties, 10_000);

    let mut now = Duration::ZERO;
    for _ in 0..8 {
        now += TIMEOUT * 2 + Duration::from_secs(1);
        tick_all(&mut parties, now);
        drain(&mut parties, 10_000);
    }

    for status in statuses(&parties) {
        assert!(matches!(status, Status::Finished(_)), "expected happy path to finish, got {status:?}");
    }

    sizes
}
