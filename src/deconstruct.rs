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

//! Per-output dispatch once a unilateral close has been classified.
//! Mirrors `our_unilateral`/`their_unilateral` in `onchain.c`: one call
//! per output of the commitment transaction, each either tracked and
//! (maybe) given a proposal, or left untracked because it belongs to the
//! other side and carries no delay we need to watch.

use bitcoin::secp256k1::{Secp256k1, SecretKey, Signing};
use bitcoin::{Amount, Transaction, Txid};
use tracing::{debug, error};

use crate::error::FatalError;
use crate::feerate::{FeerateRange, HTLC_TIMEOUT_MULTIPLIER};
use crate::proposal::{htlc_second_stage_tx, search_feerate_and_narrow, tx_to_us};
use crate::registry::{Handle, PendingHtlcClaim, Registry};
use crate::scripts::{htlc_received_wscript, p2wpkh, p2wsh, to_self_wscript};
use crate::types::{HtlcStub, KeySet, OutputType, Side, TxType};

/// Everything needed to deconstruct one side's version of the commitment
/// transaction: its keyset, the private keys we hold against it, who
/// broadcast it, the delay applying to the broadcaster's own delayed
/// output, and the HTLCs it carries. Mirrors the bundle of context
/// threaded through `resolve_our_unilateral`/`resolve_their_unilateral`.
/// `self_*_privkey` are only meaningful (and only used) when `broadcaster
/// == Side::Local`, since we can only sign with our own keys.
pub struct UnilateralContext<'a> {
    pub tx: &'a Transaction,
    pub blockheight: u32,
    pub broadcaster: Side,
    pub keys: KeySet,
    pub self_delayed_privkey: SecretKey,
    pub self_htlc_privkey: SecretKey,
    pub to_self_delay: u16,
    pub wallet_destination: bitcoin::ScriptBuf,
    pub htlcs: &'a [(u32, HtlcStub)],
    pub funding_satoshi: u64,
}

/// Processes our own broadcast commitment transaction: tracks every
/// output, proposing the delayed-claim spend for the one the delay
/// applies to (ours), and simply watching the counterparty's immediate
/// output (theirs, no proposal needed from us).
pub fn our_unilateral<C: Signing>(
    secp: &Secp256k1<C>,
    registry: &mut Registry,
    ctx: &UnilateralContext,
    feerate_per_kw: u64,
) -> Result<(), FatalError> {
    let txid = ctx.tx.txid();
    let mut feerate_range = FeerateRange::init(
        ctx.funding_satoshi,
        &ctx.tx.output.iter().map(|o| o.value).collect::<Vec<_>>(),
    );
    let to_self_wscript = to_self_wscript(&ctx.keys.revocation_pubkey, &ctx.keys.delayed_pubkey, ctx.to_self_delay);

    for (outnum, out) in ctx.tx.output.iter().enumerate() {
        let outnum = outnum as u32;
        if let Some((_, htlc)) = ctx.htlcs.iter().find(|(n, _)| *n == outnum) {
            track_our_htlc(secp, registry, ctx, txid, outnum, out.value, htlc, &mut feerate_range, feerate_per_kw)?;
            continue;
        }

        if out.script_pubkey == p2wsh(&to_self_wscript) {
            let handle = registry.track(
                txid,
                ctx.blockheight,
                TxType::OurUnilateral,
                outnum,
                out.value,
                OutputType::DelayedOutputToUs,
            );
            let tx = tx_to_us(
                secp,
                txid,
                outnum,
                Amount::from_sat(out.value),
                &to_self_wscript,
                &ctx.self_delayed_privkey,
                ctx.wallet_destination.clone(),
                ctx.to_self_delay,
                feerate_per_kw,
            )?;
            registry.propose(handle, Some(tx), ctx.to_self_delay as u32, TxType::OurUnilateralToUsReturnToWallet);
            continue;
        }

        if out.script_pubkey == p2wpkh(&ctx.keys.remote_pubkey) {
            // Their immediate output; nothing for us to do but watch it.
            registry.track(txid, ctx.blockheight, TxType::OurUnilateral, outnum, out.value, OutputType::OutputToThem);
            continue;
        }

        debug!("our_unilateral: output {}:{} matches no known script, skipping", txid, outnum);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn track_our_htlc<C: Signing>(
    secp: &Secp256k1<C>,
    registry: &mut Registry,
    ctx: &UnilateralContext,
    txid: Txid,
    outnum: u32,
    amount: u64,
    htlc: &HtlcStub,
    feerate_range: &mut FeerateRange,
    feerate_per_kw: u64,
) -> Result<(), FatalError> {
    let output_type = if htlc.owner == ctx.broadcaster { OutputType::OurHtlc } else { OutputType::TheirHtlc };
    let handle = registry.track(txid, ctx.blockheight, TxType::OurUnilateral, outnum, amount, output_type);

    if htlc.owner != ctx.broadcaster {
        // An HTLC we offered, carried on our own commitment: only
        // resolvable by them (preimage) or by us (timeout past
        // cltv_expiry), and we hold no claim to propose before then.
        return Ok(());
    }

    // An HTLC the counterparty offered us, carried on our own
    // commitment: reclaimable by us after cltv_expiry via the timeout
    // branch (the preimage branch belongs to them).
    let wscript = htlc_received_wscript(
        &ctx.keys.revocation_pubkey,
        &ctx.keys.broadcaster_htlc_pubkey,
        &ctx.keys.nonbroadcaster_htlc_pubkey,
        &htlc.ripemd,
        htlc.cltv_expiry,
    );
    let feerate = search_feerate_and_narrow(feerate_range, HTLC_TIMEOUT_MULTIPLIER);
    let tx = htlc_second_stage_tx(
        secp,
        txid,
        outnum,
        Amount::from_sat(amount),
        &wscript,
        &ctx.self_htlc_privkey,
        None,
        htlc.cltv_expiry,
        feerate,
        HTLC_TIMEOUT_MULTIPLIER,
    )?;
    registry.propose_at_block(handle, Some(tx), htlc.cltv_expiry, TxType::OurHtlcTimeoutToUs);
    Ok(())
}

/// Processes a commitment transaction broadcast by the counterparty
/// (current, not revoked). Our own immediate output needs no proposal;
/// HTLCs the counterparty offered us are claimable with the preimage as
/// soon as we learn it (tracked with claim context for
/// `claim_with_preimage`); HTLCs we offered them time out to them,
/// watched but never claimed by us.
pub fn their_unilateral<C: Signing>(
    secp: &Secp256k1<C>,
    registry: &mut Registry,
    ctx: &UnilateralContext,
) -> Result<(), FatalError> {
    let _ = secp;
    let txid = ctx.tx.txid();

    for (outnum, out) in ctx.tx.output.iter().enumerate() {
        let outnum = outnum as u32;
        if let Some((_, htlc)) = ctx.htlcs.iter().find(|(n, _)| *n == outnum) {
            let output_type = if htlc.owner == ctx.broadcaster { OutputType::TheirHtlc } else { OutputType::OurHtlc };
            let handle = registry.track(txid, ctx.blockheight, TxType::TheirUnilateral, outnum, out.value, output_type);
            if htlc.owner == ctx.broadcaster {
                // Offered to us: stash what we need to build the success
                // claim the moment a matching preimage arrives.
                let wscript = htlc_received_wscript(
                    &ctx.keys.revocation_pubkey,
                    &ctx.keys.broadcaster_htlc_pubkey,
                    &ctx.keys.nonbroadcaster_htlc_pubkey,
                    &htlc.ripemd,
                    htlc.cltv_expiry,
                );
                registry.set_pending_htlc_claim(
                    handle,
                    PendingHtlcClaim {
                        wscript,
                        local_htlc_privkey: ctx.self_htlc_privkey,
                        ripemd: htlc.ripemd,
                        cltv_expiry: htlc.cltv_expiry,
                    },
                );
            } else {
                // We offered it; it times out back to them, nothing we
                // can or need to claim.
                registry.propose_at_block(handle, None, htlc.cltv_expiry, TxType::TheirHtlcTimeoutToThem);
            }
            continue;
        }

        if out.script_pubkey == p2wpkh(&ctx.keys.remote_pubkey) {
            let handle = registry.track(txid, ctx.blockheight, TxType::TheirUnilateral, outnum, out.value, OutputType::OutputToUs);
            registry.propose(handle, None, 0, TxType::SelfOutput);
            continue;
        }

        debug!("their_unilateral: output {}:{} matches no known script, skipping", txid, outnum);
    }
    Ok(())
}

/// The counterparty broadcast an old, revoked commitment: a cheat. Per
/// `onchain.c`'s own `handle_their_cheat` this is an unimplemented stub
/// there too — penalty-transaction construction (spending every output via
/// the revocation branch) is intentionally out of scope here as well
/// (spec.md §1, "Constructing ... the revocation-claim penalty transaction
/// ... assumed out of scope").
pub fn handle_their_cheat(revoked_commitment_number: u64) -> Result<(), FatalError> {
    error!(
        "their commitment #{} was revoked but still broadcast: a cheat attempt. \
         Penalty-transaction construction is not implemented; outputs will remain untracked.",
        revoked_commitment_number
    );
    Err(FatalError::InternalError(
        "penalty transaction construction for revoked commitments is not implemented".into(),
    ))
}

/// Given a newly-learned preimage, finds the tracked output (if any) it
/// resolves and builds the HTLC-success claim, handing back the handle
/// of the output it resolves. Called from `eventloop::handle_message` on
/// `known_preimage`.
pub fn claim_with_preimage<C: Signing>(
    secp: &Secp256k1<C>,
    registry: &mut Registry,
    preimage: [u8; 32],
    feerate_per_kw: u64,
) -> Result<Option<Handle>, FatalError> {
    use crate::feerate::HTLC_SUCCESS_MULTIPLIER;
    use crate::scripts::ripemd_of_preimage;

    let ripemd = ripemd_of_preimage(&preimage);
    let handle = registry
        .iter()
        .enumerate()
        .find(|(_, out)| {
            out.resolved.is_none()
                && out
                    .pending_htlc_claim
                    .as_ref()
                    .map(|claim| claim.ripemd == ripemd)
                    .unwrap_or(false)
        })
        .map(|(h, _)| h);

    let Some(handle) = handle else {
        return Ok(None);
    };
    let out = registry.get(handle);
    let claim = out.pending_htlc_claim.clone().expect("matched above");
    let tx = htlc_second_stage_tx(
        secp,
        out.txid,
        out.outnum,
        Amount::from_sat(out.satoshi),
        &claim.wscript,
        &claim.local_htlc_privkey,
        Some(preimage),
        claim.cltv_expiry,
        feerate_per_kw,
        HTLC_SUCCESS_MULTIPLIER,
    )?;
    registry.propose(handle, Some(tx), 0, TxType::OurHtlcSuccessToUs);
    Ok(Some(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{PublicKey, Secp256k1};

    fn secret(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn their_unilateral_watches_our_payment_output_for_immediate_resolve() {
        let secp = Secp256k1::new();
        let our_payment_pk = PublicKey::from_secret_key(&secp, &secret(4));
        let other_pk = PublicKey::from_secret_key(&secp, &secret(5));

        let spk = p2wpkh(&our_payment_pk);
        let tx = Transaction {
            version: 2,
            lock_time: bitcoin::blockdata::locktime::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![bitcoin::TxOut { value: 500_000, script_pubkey: spk }],
        };

        let keys = KeySet {
            revocation_pubkey: other_pk,
            delayed_pubkey: other_pk,
            remote_pubkey: our_payment_pk,
            broadcaster_htlc_pubkey: other_pk,
            nonbroadcaster_htlc_pubkey: our_payment_pk,
        };
        let ctx = UnilateralContext {
            tx: &tx,
            blockheight: 100,
            broadcaster: Side::Remote,
            keys,
            self_delayed_privkey: secret(1),
            self_htlc_privkey: secret(2),
            to_self_delay: 144,
            wallet_destination: bitcoin::ScriptBuf::new(),
            htlcs: &[],
            funding_satoshi: 1_000_000,
        };

        let mut registry = Registry::new();
        their_unilateral(&secp, &mut registry, &ctx).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).output_type, OutputType::OutputToUs);
        assert_eq!(registry.get(0).proposal.as_ref().unwrap().depth_required, 0);
    }
}
