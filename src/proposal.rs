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

//! Builds the raw, fully-signed transactions the deconstructors propose to
//! the registry. One input, one output, fee taken out of the single
//! output. Mirrors `tx_to_us`/`htlc_timeout_tx`/`htlc_success_tx` in
//! `onchain.c`.

use bitcoin::blockdata::locktime::absolute::LockTime;
use bitcoin::blockdata::script::ScriptBuf;
use bitcoin::blockdata::transaction::{OutPoint, Sequence, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::secp256k1::{ecdsa, Message, Secp256k1, SecretKey, Signing};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Txid};
use tracing::debug;

use crate::error::FatalError;
use crate::feerate::FeerateRange;

/// A conservative fixed weight for the single-input/single-output
/// `to_us` spend (P2WSH 2-branch script, witness stack: sig + 0 + script).
/// Matches the constant used by `tx_to_us` for its own feerate math.
const TO_US_WEIGHT: u64 = 500;

/// Spends a single P2WSH `to_self`-style output we are entitled to by
/// delay (the revocation branch is for the counterparty; we always take
/// the delay branch here). `dust_limit`: if the fee would leave less than
/// this, the source still proposes the transaction anyway rather than
/// drop it — this mirrors `tx_to_us`'s own behavior exactly, which is
/// a known, not a fixed, wart (see SPEC_FULL.md §4.2).
#[allow(clippy::too_many_arguments)]
pub fn tx_to_us<C: Signing>(
    secp: &Secp256k1<C>,
    spend_txid: Txid,
    spend_outnum: u32,
    amount: Amount,
    wscript: &ScriptBuf,
    privkey: &SecretKey,
    destination: ScriptBuf,
    to_self_delay: u16,
    feerate_per_kw: u64,
) -> Result<Transaction, FatalError> {
    let fee = Amount::from_sat(feerate_per_kw * TO_US_WEIGHT / 1000);
    let output_value = amount.checked_sub(fee).unwrap_or(Amount::ZERO);
    if output_value == Amount::ZERO {
        debug!("tx_to_us: fee {} consumes entire output {}; proposing dust anyway", fee, amount);
    }

    let mut tx = Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(spend_txid, spend_outnum),
            script_sig: ScriptBuf::new(),
            sequence: Sequence(to_self_delay as u32),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: output_value.to_sat(),
            script_pubkey: destination,
        }],
    };

    let sighash = SighashCache::new(&tx)
        .segwit_signature_hash(0, wscript, amount.to_sat(), EcdsaSighashType::All)
        .map_err(|e| FatalError::InternalError(format!("sighash computation failed: {e}")))?;
    let message = Message::from_slice(sighash.as_ref())
        .map_err(|e| FatalError::CryptoFailed(format!("invalid sighash message: {e}")))?;
    let signature = secp.sign_ecdsa(&message, privkey);
    let mut sig_with_type = signature.serialize_der().to_vec();
    sig_with_type.push(EcdsaSighashType::All as u8);

    tx.input[0].witness = Witness::from_slice(&[sig_with_type, vec![], wscript.to_bytes()]);
    Ok(tx)
}

/// Searches downward from `range.max` for the highest feerate such that the
/// resulting fee on an HTLC-timeout transaction is an even multiple of
/// 1000 satoshi (so its true rate can later be recovered losslessly by
/// `FeerateRange::narrow`). Mirrors the search loop in `htlc_timeout_tx`.
pub fn search_feerate_and_narrow(range: &mut FeerateRange, multiplier: u64) -> u64 {
    let mut feerate = range.max;
    loop {
        let fee = feerate * multiplier / 1000;
        range.narrow(fee, multiplier);
        if feerate <= range.min || feerate == 0 {
            break;
        }
        if fee * 1000 / multiplier == feerate {
            break;
        }
        feerate -= 1;
    }
    feerate
}

/// Builds the HTLC-timeout transaction reclaiming an HTLC we offered after
/// its `cltv_expiry`, or the HTLC-success transaction claiming one offered
/// to us once we know the preimage. Structurally identical; the only
/// difference is the witness stack content and which multiplier the
/// resulting fee is measured against (`HTLC_TIMEOUT_MULTIPLIER` vs.
/// `HTLC_SUCCESS_MULTIPLIER`, see `feerate.rs`).
#[allow(clippy::too_many_arguments)]
pub fn htlc_second_stage_tx<C: Signing>(
    secp: &Secp256k1<C>,
    spend_txid: Txid,
    spend_outnum: u32,
    amount: Amount,
    wscript: &ScriptBuf,
    privkey: &SecretKey,
    preimage: Option<[u8; 32]>,
    cltv_expiry: u32,
    feerate_per_kw: u64,
    multiplier: u64,
) -> Result<Transaction, FatalError> {
    let fee = Amount::from_sat(feerate_per_kw * multiplier / 1000);
    let output_value = amount.checked_sub(fee).unwrap_or(Amount::ZERO);

    let lock_time = if preimage.is_some() {
        LockTime::ZERO
    } else {
        LockTime::from_consensus(cltv_expiry)
    };

    let mut tx = Transaction {
        version: 2,
        lock_time,
        input: vec![TxIn {
            previous_output: OutPoint::new(spend_txid, spend_outnum),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: output_value.to_sat(),
            script_pubkey: wscript.to_v0_p2wsh(),
        }],
    };

    let sighash = SighashCache::new(&tx)
        .segwit_signature_hash(0, wscript, amount.to_sat(), EcdsaSighashType::All)
        .map_err(|e| FatalError::InternalError(format!("sighash computation failed: {e}")))?;
    let message = Message::from_slice(sighash.as_ref())
        .map_err(|e| FatalError::CryptoFailed(format!("invalid sighash message: {e}")))?;
    let signature: ecdsa::Signature = secp.sign_ecdsa(&message, privkey);
    let mut sig_with_type = signature.serialize_der().to_vec();
    sig_with_type.push(EcdsaSighashType::All as u8);

    let witness_items: Vec<Vec<u8>> = match preimage {
        Some(preimage) => vec![vec![], sig_with_type, preimage.to_vec(), wscript.to_bytes()],
        None => vec![vec![], sig_with_type, vec![], wscript.to_bytes()],
    };
    tx.input[0].witness = Witness::from_slice(&witness_items);
    Ok(tx)
}
