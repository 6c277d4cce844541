//! Blame replay, `spec.md` §4.5
//!
//! Once every member's signed log and disclosed outer key have (or haven't)
//! arrived, this reconstructs each shuffler's input/output ciphertext
//! multisets from the union of submitted logs and checks them against each
//! other — "with every outer private key revealed, and every message log
//! attested, each shuffler's input multiset and output multiset are
//! derivable from the logs; honest peers check multiset equality."

use std::collections::{BTreeMap, BTreeSet};

use generic_ec::{Curve, Point, Scalar, SecretScalar};

use group::{Group, Valid};

use crate::crypto::onion;
use crate::messages::{BlameMsg, Payload, Phase, PublicKeysMsg};
use crate::transcript::{LogEntry, TranscriptLog};

/// Replays the shuffle from every submitted [`BlameMsg`] and returns the
/// accused member indices (never empty when called from a genuine Blame
/// entry, since at minimum the triggering violation pre-populated one)
pub(super) fn replay<E>(
    group: &Valid<Group<E>>,
    public_keys: &BTreeMap<u16, PublicKeysMsg<E>>,
    blame_msgs: &BTreeMap<u16, BlameMsg>,
    expected: &[u16],
) -> BTreeSet<u16>
where
    E: Curve,
{
    let mut accused = BTreeSet::new();

    for &m in expected {
        if !blame_msgs.contains_key(&m) {
            accused.insert(m);
        }
    }

    let mut merged: BTreeMap<(u16, u8), Vec<u8>> = BTreeMap::new();
    let mut outer_secrets: BTreeMap<u16, SecretScalar<E>> = BTreeMap::new();

    for (&submitter, blame) in blame_msgs {
        let Some(signer) = public_keys.get(&submitter) else {
            accused.insert(submitter);
            continue;
        };
        let sender_pub = |sender: u16| public_keys.get(&sender).map(|pk| pk.outer_pub);
        if !TranscriptLog::verify_snapshot(&blame.log_snapshot, sender_pub) {
            accused.insert(submitter);
            continue;
        }
        let Ok(mut scalar) = serde_json::from_slice::<Scalar<E>>(&blame.outer_secret_bytes) else {
            accused.insert(submitter);
            continue;
        };
        let secret = SecretScalar::new(&mut scalar);
        if Point::generator() * secret.as_ref() != signer.outer_pub {
            accused.insert(submitter);
            continue;
        }
        outer_secrets.insert(submitter, secret);

        let Ok(entries) = serde_json::from_slice::<Vec<((u16, u8), LogEntry)>>(&blame.log_snapshot)
        else {
            accused.insert(submitter);
            continue;
        };
        for (key, entry) in entries {
            match merged.get(&key) {
                Some(existing) if *existing != entry.bytes => {
                    // two signed messages for the same (sender, phase) with
                    // different contents: the sender equivocated.
                    accused.insert(key.0);
                }
                Some(_) => {}
                None => {
                    merged.insert(key, entry.bytes);
                }
            }
        }
    }

    if let Some(&first) = group.shufflers().first() {
        if let Some(secret) = outer_secrets.get(&first) {
            for &sender in expected {
                if let Some(ct) = merged
                    .get(&(sender, Phase::Data as u8))
                    .and_then(|b| extract::<E>(b))
                    .and_then(as_data_ciphertext)
                {
                    if onion::decrypt_layer(secret, &ct).is_err() {
                        accused.insert(sender);
                    }
                }
            }
        }
    }

    for (pos, &shuffler) in group.shufflers().iter().enumerate() {
        let Some(secret) = outer_secrets.get(&shuffler) else {
            continue;
        };

        let input: Vec<Vec<u8>> = if pos == 0 {
            expected
                .iter()
                .filter_map(|&s| merged.get(&(s, Phase::Data as u8)))
                .filter_map(|b| extract::<E>(b))
                .filter_map(as_data_ciphertext)
                .collect()
        } else {
            let prev = group.shufflers()[pos - 1];
            merged
                .get(&(prev, Phase::Shuffle as u8))
                .and_then(|b| extract::<E>(b))
                .and_then(as_shuffle_ciphertexts)
                .unwrap_or_default()
        };

        let is_last = pos + 1 == group.shufflers().len();
        let out_phase = if is_last { Phase::EncryptedData } else { Phase::Shuffle };
        let claimed_output: Vec<Vec<u8>> = merged
            .get(&(shuffler, out_phase as u8))
            .and_then(|b| extract::<E>(b))
            .and_then(|p| if is_last { as_encrypted_data_ciphertexts(p) } else { as_shuffle_ciphertexts(p) })
            .unwrap_or_default();

        let mut expected_output: Vec<Vec<u8>> = input
            .iter()
            .filter_map(|ct| onion::decrypt_layer(secret, ct).ok())
            .collect();
        expected_output.sort();
        let mut claimed_sorted = claimed_output;
        claimed_sorted.sort();

        if expected_output != claimed_sorted {
            accused.insert(shuffler);
        }
    }

    accused
}

/// A log entry's recorded bytes are [`crate::messages::signed_bytes`]
/// output: `round_id(32) ‖ phase_tag(1) ‖ sender_index(2) ‖ payload`
fn extract<E>(bytes: &[u8]) -> Option<Payload<E>>
where
    E: Curve,
    Payload<E>: serde::de::DeserializeOwned,
{
    let payload_bytes = bytes.get(35..)?;
    serde_json::from_slice(payload_bytes).ok()
}

fn as_data_ciphertext<E: Curve>(payload: Payload<E>) -> Option<Vec<u8>> {
    match payload {
        Payload::Data(msg) => Some(msg.ciphertext),
        _ => None,
    }
}

fn as_shuffle_ciphertexts<E: Curve>(payload: Payload<E>) -> Option<Vec<Vec<u8>>> {
    match payload {
        Payload::Shuffle(msg) => Some(msg.ciphertexts),
        _ => None,
    }
}

fn as_encrypted_data_ciphertexts<E: Curve>(payload: Payload<E>) -> Option<Vec<Vec<u8>>> {
    match payload {
        Payload::EncryptedData(msg) => Some(msg.ciphertexts),
        _ => None,
    }
}
