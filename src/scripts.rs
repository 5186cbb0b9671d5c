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

//! BOLT-3 witness script templates. Out of scope per spec.md §1 ("HTLC/
//! delayed-output witness-script templates ... taken as library
//! primitives"), implemented here the same way as the rest of the crypto/TX
//! plumbing in `keys.rs`.

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script::{self, Script};
use bitcoin::hashes::{hash160, ripemd160, Hash};
use bitcoin::secp256k1::PublicKey;

/// `to_local` script: revocable-or-delayed spend of our main commitment
/// output. Matches `to_self_wscript` in `onchain.c` / `create_to_local_script`
/// ("Exercise 15") in `src/exercises/scripts/commitment.rs`.
pub fn to_self_wscript(
    revocation_pubkey: &PublicKey,
    delayed_pubkey: &PublicKey,
    to_self_delay: u16,
) -> script::ScriptBuf {
    script::Builder::new()
        .push_opcode(OP_IF)
        .push_slice(&revocation_pubkey.serialize())
        .push_opcode(OP_ELSE)
        .push_int(to_self_delay as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_slice(&delayed_pubkey.serialize())
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// P2WSH scriptpubkey for a witness script.
pub fn p2wsh(wscript: &Script) -> script::ScriptBuf {
    script::Builder::new()
        .push_int(0)
        .push_slice(&wscript.wscript_hash())
        .into_script()
}

/// P2WPKH scriptpubkey for a `to_remote` output, addressed directly to a
/// plain public key.
pub fn p2wpkh(pubkey: &PublicKey) -> script::ScriptBuf {
    let hash = hash160::Hash::hash(&pubkey.serialize());
    script::Builder::new()
        .push_int(0)
        .push_slice(&hash)
        .into_script()
}

/// Witness script for an HTLC we (the committing party) offered. Claimable
/// by the counterparty with the preimage, or by us after `cltv_expiry` via
/// the HTLC-timeout transaction. Matches `bitcoin_wscript_htlc_offer_*` in
/// `onchain.c` / `create_offered_htlc_script` ("Exercise 21") in
/// `src/exercises/scripts/htlc.rs`.
pub fn htlc_offered_wscript(
    revocation_pubkey: &PublicKey,
    local_htlc_pubkey: &PublicKey,
    remote_htlc_pubkey: &PublicKey,
    ripemd: &[u8; 20],
) -> script::ScriptBuf {
    let revocation_pubkey_hash = hash160::Hash::hash(&revocation_pubkey.serialize());
    script::Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&revocation_pubkey_hash)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_slice(&remote_htlc_pubkey.serialize())
        .push_opcode(OP_SWAP)
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_NOTIF)
        .push_opcode(OP_DROP)
        .push_int(2)
        .push_opcode(OP_SWAP)
        .push_slice(&local_htlc_pubkey.serialize())
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_HASH160)
        .push_slice(ripemd)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// Witness script for an HTLC we received. Claimable by us with the
/// preimage, or by the counterparty after `cltv_expiry`. Matches
/// `htlc_received_wscript` in `onchain.c` / `create_received_htlc_script`
/// ("Exercise 24") in `src/exercises/scripts/htlc.rs`.
pub fn htlc_received_wscript(
    revocation_pubkey: &PublicKey,
    local_htlc_pubkey: &PublicKey,
    remote_htlc_pubkey: &PublicKey,
    ripemd: &[u8; 20],
    cltv_expiry: u32,
) -> script::ScriptBuf {
    let revocation_pubkey_hash = hash160::Hash::hash(&revocation_pubkey.serialize());
    script::Builder::new()
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&revocation_pubkey_hash)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_slice(&remote_htlc_pubkey.serialize())
        .push_opcode(OP_SWAP)
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(ripemd)
        .push_opcode(OP_EQUALVERIFY)
        .push_int(2)
        .push_opcode(OP_SWAP)
        .push_slice(&local_htlc_pubkey.serialize())
        .push_int(2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_DROP)
        .push_int(cltv_expiry as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script()
}

fn ripemd160_of(payment_hash: &[u8; 32]) -> [u8; 20] {
    *ripemd160::Hash::hash(payment_hash).as_byte_array()
}

/// Used when matching an HTLC output against a known preimage: the ripemd
/// the witness script commits to.
pub fn ripemd_of_preimage(preimage: &[u8; 32]) -> [u8; 20] {
    let sha = bitcoin::hashes::sha256::Hash::hash(preimage);
    ripemd160_of(sha.as_byte_array())
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
    fn to_self_wscript_is_p2wsh_spendable() {
        let revocation = pubkey(1);
        let delayed = pubkey(2);
        let wscript = to_self_wscript(&revocation, &delayed, 144);
        let spk = p2wsh(&wscript);
        assert!(spk.is_v0_p2wsh());
    }

    #[test]
    fn p2wpkh_matches_pubkey_hash() {
        let key = pubkey(3);
        let spk = p2wpkh(&key);
        assert!(spk.is_v0_p2wpkh());
    }
}
