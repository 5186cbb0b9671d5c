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

//! Classifies whatever transaction spent the funding output into one of
//! mutual-close / our-unilateral / their-unilateral / their-revoked-cheat.
//! Mirrors `resolve_tx_type` / `unmask_commit_number` in `onchain.c`.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::PublicKey;
use bitcoin::Transaction;

use crate::error::FatalError;
use crate::types::Side;

const LOCKTIME_FLAG: u32 = 0x20000000;
const SEQUENCE_FLAG: u32 = 0x80000000;

/// `SHA256(funder_payment_basepoint || fundee_payment_basepoint)`, last 48
/// bits. Mirrors `commit_number_obscurer` in `onchain.c`.
pub fn commit_number_obscurer(funder_payment_basepoint: &PublicKey, fundee_payment_basepoint: &PublicKey) -> u64 {
    let mut engine = sha256::Hash::engine();
    engine.input(&funder_payment_basepoint.serialize());
    engine.input(&fundee_payment_basepoint.serialize());
    let hash = sha256::Hash::from_engine(engine).to_byte_array();
    let mut buf = [0u8; 8];
    buf[2..].copy_from_slice(&hash[26..32]);
    u64::from_be_bytes(buf)
}

/// Recovers the commitment number from a commitment transaction's locktime
/// and its single input's nSequence, given the obscurer. Returns `None` if
/// the flag bits don't match the commitment-transaction pattern at all
/// (i.e. this isn't a commitment transaction, masked or not).
pub fn unmask_commit_number(locktime: u32, sequence: u32, obscurer: u64) -> Option<u64> {
    if locktime & 0xff000000 != LOCKTIME_FLAG || sequence & 0xff000000 != SEQUENCE_FLAG {
        return None;
    }
    let masked = (((sequence & 0x00ffffff) as u64) << 24) | ((locktime & 0x00ffffff) as u64);
    Some(masked ^ obscurer)
}

/// Inverse of `unmask_commit_number`, used to construct a commitment
/// transaction's locktime/sequence fields (and, in tests, to round-trip
/// the unmasking logic).
pub fn build_commitment_locktime_and_sequence(commitment_number: u64, obscurer: u64) -> (u32, u32) {
    let masked = commitment_number ^ obscurer;
    let locktime = LOCKTIME_FLAG | ((masked & 0x00ffffff) as u32);
    let sequence = SEQUENCE_FLAG | (((masked >> 24) & 0x00ffffff) as u32);
    (locktime, sequence)
}

/// A transaction is a mutual close iff its locktime/sequence do not follow
/// the masked commitment-transaction pattern at all — BOLT-2 mandates
/// `nSequence = 0xFFFFFFFF` for the closing transaction, which never
/// matches the `0x80xxxxxx` commitment pattern.
pub fn is_mutual_close(tx: &Transaction) -> Result<bool, FatalError> {
    let input = tx
        .input
        .first()
        .ok_or_else(|| FatalError::BadCommand("spending transaction has no inputs".into()))?;
    Ok(unmask_commit_number(tx.lock_time.to_consensus_u32(), input.sequence.0, 0).is_none())
}

/// Which commitment a transaction spending the funding output turned out
/// to be.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ClosingKind {
    MutualClose,
    OurUnilateral { commitment_number: u64 },
    TheirUnilateralCurrent { commitment_number: u64 },
    TheirUnilateralRevoked { commitment_number: u64, owner: Side },
}

/// Classifies the transaction that spent the funding output. `our_number`
/// is our next-to-be-broadcast commitment number; `their_last_revoked` is
/// the highest commitment number for which we already hold their
/// revocation secret (`None` if we hold none yet).
pub fn classify(
    tx: &Transaction,
    obscurer: u64,
    our_number: u64,
    their_last_revoked: Option<u64>,
) -> Result<ClosingKind, FatalError> {
    if is_mutual_close(tx)? {
        return Ok(ClosingKind::MutualClose);
    }
    let input = tx
        .input
        .first()
        .ok_or_else(|| FatalError::BadCommand("spending transaction has no inputs".into()))?;
    let commitment_number = unmask_commit_number(tx.lock_time.to_consensus_u32(), input.sequence.0, obscurer)
        .ok_or_else(|| FatalError::InternalError("commitment pattern matched before unmasking but not after".into()))?;

    if commitment_number == our_number {
        return Ok(ClosingKind::OurUnilateral { commitment_number });
    }
    if let Some(revoked) = their_last_revoked {
        if commitment_number <= revoked {
            return Ok(ClosingKind::TheirUnilateralRevoked {
                commitment_number,
                owner: Side::Remote,
            });
        }
    }
    Ok(ClosingKind::TheirUnilateralCurrent { commitment_number })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn pubkey(byte: u8) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    #[test]
    fn mask_unmask_round_trip() {
        let obscurer = commit_number_obscurer(&pubkey(1), &pubkey(2));
        for n in [0u64, 1, 42, 0xffffff, 0xabcdef123456] {
            let (locktime, sequence) = build_commitment_locktime_and_sequence(n, obscurer);
            assert_eq!(unmask_commit_number(locktime, sequence, obscurer), Some(n));
        }
    }

    #[test]
    fn obscurer_is_order_dependent() {
        let a = commit_number_obscurer(&pubkey(1), &pubkey(2));
        let b = commit_number_obscurer(&pubkey(2), &pubkey(1));
        assert_ne!(a, b);
    }
}
