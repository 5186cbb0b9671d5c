// Onchain resolution daemon for a Lightning Network channel.
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Per-commitment key tweaking per BOLT-3. Out of scope per spec.md §1
//! ("Key derivation formulas ... taken as library primitives with the same
//! contracts as BOLT #3"), but a concrete implementation is still required
//! to exercise the classifier/deconstructors end to end, so it is provided
//! here as a thin adapter over `secp256k1` rather than assumed away.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey, Signing, Verification};

use crate::error::FatalError;
use crate::types::KeySet;

fn tweak_hash(point_a: &PublicKey, point_b: &PublicKey) -> [u8; 32] {
    let mut engine = sha256::Hash::engine();
    engine.input(&point_a.serialize());
    engine.input(&point_b.serialize());
    sha256::Hash::from_engine(engine).to_byte_array()
}

/// `basepoint + SHA256(per_commitment_point || basepoint) * G`
pub fn derive_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
) -> Result<PublicKey, FatalError> {
    let hash = tweak_hash(per_commitment_point, basepoint);
    let hashkey = PublicKey::from_secret_key(
        secp,
        &SecretKey::from_slice(&hash)
            .map_err(|_| FatalError::CryptoFailed("tweak hash not a valid scalar".into()))?,
    );
    basepoint
        .combine(&hashkey)
        .map_err(|_| FatalError::CryptoFailed("basepoint tweak resulted in point at infinity".into()))
}

/// `basepoint_secret + SHA256(per_commitment_point || basepoint)`
pub fn derive_privkey<C: Signing>(
    secp: &Secp256k1<C>,
    basepoint_secret: &SecretKey,
    per_commitment_point: &PublicKey,
) -> Result<SecretKey, FatalError> {
    let basepoint = PublicKey::from_secret_key(secp, basepoint_secret);
    let hash = tweak_hash(per_commitment_point, &basepoint);
    let scalar = Scalar::from_be_bytes(hash)
        .map_err(|_| FatalError::CryptoFailed("tweak scalar out of range".into()))?;
    basepoint_secret
        .add_tweak(&scalar)
        .map_err(|_| FatalError::CryptoFailed("basepoint secret tweak invalid".into()))
}

/// `revocation_basepoint * SHA256(revocation_basepoint || per_commitment_point)`
/// `+ per_commitment_point * SHA256(per_commitment_point || revocation_basepoint)`
pub fn derive_revocation_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    revocation_basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
) -> Result<PublicKey, FatalError> {
    let hash1 = tweak_hash(revocation_basepoint, per_commitment_point);
    let scalar1 = Scalar::from_be_bytes(hash1)
        .map_err(|_| FatalError::CryptoFailed("revocation tweak 1 out of range".into()))?;
    let component1 = revocation_basepoint
        .mul_tweak(secp, &scalar1)
        .map_err(|_| FatalError::CryptoFailed("revocation tweak 1 invalid".into()))?;

    let hash2 = tweak_hash(per_commitment_point, revocation_basepoint);
    let scalar2 = Scalar::from_be_bytes(hash2)
        .map_err(|_| FatalError::CryptoFailed("revocation tweak 2 out of range".into()))?;
    let component2 = per_commitment_point
        .mul_tweak(secp, &scalar2)
        .map_err(|_| FatalError::CryptoFailed("revocation tweak 2 invalid".into()))?;

    component1
        .combine(&component2)
        .map_err(|_| FatalError::CryptoFailed("revocation pubkey combination resulted in point at infinity".into()))
}

/// Derives every key needed to reconstruct one side's version of the
/// commitment transaction. Mirrors `derive_keyset` in `onchain.c`.
/// `broadcaster_*` are the basepoints of whoever signed and published
/// this commitment; `nonbroadcaster_*` belong to the other party.
#[allow(clippy::too_many_arguments)]
pub fn derive_keyset<C: Verification>(
    secp: &Secp256k1<C>,
    per_commitment_point: &PublicKey,
    broadcaster_delayed_payment_basepoint: &PublicKey,
    broadcaster_htlc_basepoint: &PublicKey,
    nonbroadcaster_revocation_basepoint: &PublicKey,
    nonbroadcaster_htlc_basepoint: &PublicKey,
    nonbroadcaster_payment_basepoint: &PublicKey,
) -> Result<KeySet, FatalError> {
    Ok(KeySet {
        revocation_pubkey: derive_revocation_pubkey(secp, nonbroadcaster_revocation_basepoint, per_commitment_point)?,
        delayed_pubkey: derive_pubkey(secp, broadcaster_delayed_payment_basepoint, per_commitment_point)?,
        remote_pubkey: *nonbroadcaster_payment_basepoint,
        broadcaster_htlc_pubkey: derive_pubkey(secp, broadcaster_htlc_basepoint, per_commitment_point)?,
        nonbroadcaster_htlc_pubkey: derive_pubkey(secp, nonbroadcaster_htlc_basepoint, per_commitment_point)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_and_privkey_derivation_agree() {
        let secp = Secp256k1::new();
        let basepoint_secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let basepoint = PublicKey::from_secret_key(&secp, &basepoint_secret);
        let per_commitment_secret = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let per_commitment_point = PublicKey::from_secret_key(&secp, &per_commitment_secret);

        let derived_pub = derive_pubkey(&secp, &basepoint, &per_commitment_point).unwrap();
        let derived_priv = derive_privkey(&secp, &basepoint_secret, &per_commitment_point).unwrap();
        assert_eq!(derived_pub, PublicKey::from_secret_key(&secp, &derived_priv));
    }
}
