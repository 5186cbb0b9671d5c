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

//! Append-only collection of on-chain outputs of interest. Mirrors
//! `struct tracked_output` and the `tracked_output_*`/`propose_resolution*`
//! family of functions in `onchain.c`.
//!
//! Reorg semantics (SPEC_FULL.md §9): `depth` may regress for any
//! not-yet-100-deep resolution. The registry never clears a `resolved`
//! once set (invariant 1) and only tracks the latest depth reported for
//! the currently resolving txid; a regression below `depth_required`
//! does not un-fire an already-broadcast proposal. Re-confirmation after
//! a reorg that replaces the resolving transaction is the master's
//! responsibility, via a fresh `spent` frame for whatever transaction
//! actually ends up confirmed.

use bitcoin::secp256k1::SecretKey;
use bitcoin::{ScriptBuf, Transaction, Txid};
use tracing::{debug, info, warn};

use crate::types::{OutputType, TxType};

pub type Handle = usize;

/// Enough context to build an HTLC-success claim once the preimage
/// becomes known, for an HTLC the counterparty offered us on their own
/// broadcast commitment. Kept on the tracked output itself rather than a
/// side table, since it only ever applies to exactly the output it is
/// attached to.
#[derive(Clone, Debug)]
pub struct PendingHtlcClaim {
    pub wscript: ScriptBuf,
    pub local_htlc_privkey: SecretKey,
    pub ripemd: [u8; 20],
    pub cltv_expiry: u32,
}

/// A transaction proposed to resolve a tracked output, gated by depth.
/// `tx` absent means "resolve by ignore": once the depth gate is met, the
/// output is simply marked resolved without broadcasting anything (e.g. a
/// timed-out HTLC the counterparty offered, which we do not need to claim).
#[derive(Clone, Debug)]
pub struct Proposal {
    pub tx: Option<Transaction>,
    pub depth_required: u32,
    pub tx_type: TxType,
}

#[derive(Copy, Clone, Debug)]
pub struct Resolution {
    pub spending_txid: Txid,
    pub depth: u32,
    pub tx_type: TxType,
}

#[derive(Clone, Debug)]
pub struct TrackedOutput {
    pub txid: Txid,
    pub outnum: u32,
    pub tx_blockheight: u32,
    pub satoshi: u64,
    pub tx_type: TxType,
    pub output_type: OutputType,
    pub proposal: Option<Proposal>,
    pub resolved: Option<Resolution>,
    pub pending_htlc_claim: Option<PendingHtlcClaim>,
}

impl TrackedOutput {
    pub fn outpoint(&self) -> (Txid, u32) {
        (self.txid, self.outnum)
    }
}

/// Append-only registry of tracked outputs (invariant 3: handles are
/// stable indices for the daemon's lifetime; invariant 4: entry 0 is
/// always the funding output).
#[derive(Clone, Debug, Default)]
pub struct Registry {
    outputs: Vec<TrackedOutput>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry { outputs: Vec::new() }
    }

    pub fn get(&self, handle: Handle) -> &TrackedOutput {
        &self.outputs[handle]
    }

    pub fn get_mut(&mut self, handle: Handle) -> &mut TrackedOutput {
        &mut self.outputs[handle]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedOutput> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Appends a new tracked output and returns a stable handle to it.
    pub fn track(
        &mut self,
        txid: Txid,
        tx_blockheight: u32,
        tx_type: TxType,
        outnum: u32,
        satoshi: u64,
        output_type: OutputType,
    ) -> Handle {
        info!(
            "Tracking {:?}/{:?} for {}:{} ({} sat)",
            tx_type, output_type, txid, outnum, satoshi
        );
        self.outputs.push(TrackedOutput {
            txid,
            outnum,
            tx_blockheight,
            satoshi,
            tx_type,
            output_type,
            proposal: None,
            resolved: None,
            pending_htlc_claim: None,
        });
        self.outputs.len() - 1
    }

    /// Attaches claim context to an already-tracked HTLC output, for use
    /// once a matching preimage arrives.
    pub fn set_pending_htlc_claim(&mut self, handle: Handle, claim: PendingHtlcClaim) {
        self.outputs[handle].pending_htlc_claim = Some(claim);
    }

    /// Attaches a proposal to a tracked output. Invariant 1: at most one
    /// live proposal; this overwrites any prior one (callers — the
    /// deconstructors — only ever call it once per output, per §4.1).
    pub fn propose(
        &mut self,
        handle: Handle,
        tx: Option<Transaction>,
        depth_required: u32,
        tx_type: TxType,
    ) {
        debug!(
            "Proposing resolution for output #{}: {:?} at depth {}",
            handle, tx_type, depth_required
        );
        self.outputs[handle].proposal = Some(Proposal {
            tx,
            depth_required,
            tx_type,
        });
    }

    /// Same as `propose`, but expressed as an absolute block height: the
    /// depth is computed relative to the tracked output's own confirmation
    /// height, clamped at zero (it may already have passed).
    pub fn propose_at_block(
        &mut self,
        handle: Handle,
        tx: Option<Transaction>,
        absolute_block: u32,
        tx_type: TxType,
    ) {
        let tx_blockheight = self.outputs[handle].tx_blockheight;
        let depth_required = absolute_block.saturating_sub(tx_blockheight);
        self.propose(handle, tx, depth_required, tx_type);
    }

    /// Resolves an output by ignoring it: no proposal, immediately
    /// resolved at depth 0 with `TxType::SelfOutput`.
    pub fn ignore(&mut self, handle: Handle) {
        let txid = self.outputs[handle].txid;
        debug!("Ignoring output #{}", handle);
        self.outputs[handle].resolved = Some(Resolution {
            spending_txid: txid,
            depth: 0,
            tx_type: TxType::SelfOutput,
        });
    }

    /// Succeeds iff this output has a broadcastable proposal whose txid
    /// equals `spending_txid`; on success installs the resolution.
    pub fn resolved_by_proposal(&mut self, handle: Handle, spending_txid: Txid) -> bool {
        let out = &mut self.outputs[handle];
        let Some(proposal) = &out.proposal else {
            return false;
        };
        let Some(tx) = &proposal.tx else {
            return false;
        };
        if tx.txid() != spending_txid {
            return false;
        }
        let tx_type = proposal.tx_type;
        info!("Output #{} resolved by our own proposal ({:?})", handle, tx_type);
        out.resolved = Some(Resolution {
            spending_txid,
            depth: 0,
            tx_type,
        });
        true
    }

    /// Installs a resolution coming from some transaction we did not
    /// propose ourselves (e.g. the counterparty's sweep, or our own
    /// wallet's direct spend of an already-ours output).
    pub fn resolved_by_other(&mut self, handle: Handle, spending_txid: Txid, tx_type: TxType) {
        info!("Output #{} resolved by other tx {} ({:?})", handle, spending_txid, tx_type);
        self.outputs[handle].resolved = Some(Resolution {
            spending_txid,
            depth: 0,
            tx_type,
        });
    }

    /// An output was spent by a transaction we have no explanation for.
    /// Recorded, not fatal: a placeholder for a louder alarm (§4.1).
    pub fn unknown_spend(&mut self, handle: Handle, spending_txid: Txid) {
        warn!(
            "Output #{} spent by unrecognized transaction {}; recording as unknown",
            handle, spending_txid
        );
        self.outputs[handle].resolved = Some(Resolution {
            spending_txid,
            depth: 0,
            tx_type: TxType::UnknownTxType,
        });
    }

    /// Applies a `depth` notification for `txid` across every tracked
    /// output: bumps the depth of whichever output is already resolved by
    /// that txid, and returns the handles whose proposal just met its
    /// depth gate (for the caller to fire).
    pub fn apply_depth(&mut self, txid: Txid, depth: u32) -> Vec<Handle> {
        let mut to_fire = Vec::new();
        for (handle, out) in self.outputs.iter_mut().enumerate() {
            if let Some(resolution) = &mut out.resolved {
                if resolution.spending_txid == txid {
                    resolution.depth = depth;
                }
                continue;
            }
            if out.txid == txid {
                if let Some(proposal) = &out.proposal {
                    if depth >= proposal.depth_required {
                        to_fire.push(handle);
                    }
                }
            }
        }
        to_fire
    }

    pub fn all_irrevocably_resolved(&self) -> bool {
        self.outputs
            .iter()
            .all(|out| matches!(out.resolved, Some(r) if r.depth >= 100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn txid(byte: u8) -> Txid {
        Txid::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn ignored_output_is_resolved_at_depth_zero() {
        let mut reg = Registry::new();
        let h = reg.track(txid(1), 100, TxType::OurUnilateral, 0, 900_000, OutputType::OutputToThem);
        reg.ignore(h);
        let out = reg.get(h);
        assert_eq!(out.resolved.unwrap().depth, 0);
        assert_eq!(out.resolved.unwrap().tx_type, TxType::SelfOutput);
    }

    #[test]
    fn all_irrevocably_resolved_requires_every_output_at_100() {
        let mut reg = Registry::new();
        let h0 = reg.track(txid(1), 100, TxType::FundingTransaction, 0, 1_000_000, OutputType::FundingOutput);
        let h1 = reg.track(txid(1), 100, TxType::OurUnilateral, 1, 900_000, OutputType::OutputToThem);
        reg.resolved_by_other(h0, txid(2), TxType::OurUnilateral);
        reg.ignore(h1);
        assert!(!reg.all_irrevocably_resolved());
        reg.apply_depth(txid(2), 100);
        assert!(!reg.all_irrevocably_resolved());
        reg.apply_depth(txid(1), 100);
        assert!(reg.all_irrevocably_resolved());
    }

    #[test]
    fn depth_regression_does_not_clear_resolution() {
        let mut reg = Registry::new();
        let h = reg.track(txid(1), 100, TxType::FundingTransaction, 0, 1_000_000, OutputType::FundingOutput);
        reg.resolved_by_other(h, txid(2), TxType::OurUnilateral);
        reg.apply_depth(txid(2), 50);
        reg.apply_depth(txid(2), 3);
        assert_eq!(reg.get(h).resolved.unwrap().depth, 3);
        assert!(reg.get(h).resolved.is_some());
    }

    #[test]
    fn proposal_fires_once_depth_gate_met() {
        let mut reg = Registry::new();
        let h = reg.track(txid(5), 200, TxType::OurUnilateral, 0, 900_000, OutputType::DelayedOutputToUs);
        reg.propose(h, None, 144, TxType::OurUnilateralToUsReturnToWallet);
        assert!(reg.apply_depth(txid(5), 10).is_empty());
        let fired = reg.apply_depth(txid(5), 144);
        assert_eq!(fired, vec![h]);
    }
}
