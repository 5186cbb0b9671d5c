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

//! Closed enumerations and small value types shared across the classifier,
//! the deconstructors and the tracked-output registry.

use bitcoin::secp256k1::PublicKey;

/// Which of the two channel parties a value belongs to.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[derive(LightningEncode, LightningDecode)]
pub enum Side {
    #[display("local")]
    Local,
    #[display("remote")]
    Remote,
}

impl Side {
    /// The other side. Mirrors the source's `!side` negation idiom used when
    /// indexing `keys[funder]` / `keys[!funder]` in `unmask_commit_number`.
    pub fn opposite(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

/// Role a transaction plays in the protocol. Closed enumeration mirroring
/// `enum tx_type` in `onchain.c`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
pub enum TxType {
    #[display("funding_transaction")]
    FundingTransaction,
    #[display("mutual_close")]
    MutualClose,
    #[display("our_unilateral")]
    OurUnilateral,
    #[display("their_unilateral")]
    TheirUnilateral,
    #[display("our_htlc_timeout_to_us")]
    OurHtlcTimeoutToUs,
    #[display("our_unilateral_to_us_return_to_wallet")]
    OurUnilateralToUsReturnToWallet,
    #[display("their_htlc_timeout_to_them")]
    TheirHtlcTimeoutToThem,
    /// Our successful claim of an HTLC they offered, after learning the
    /// preimage. See SPEC_FULL.md §4.3 — an expansion of the open
    /// `handle_preimage`/`handle_their_htlc_fulfill` item.
    #[display("our_htlc_success_to_us")]
    OurHtlcSuccessToUs,
    /// Ignored: we created it ourselves (the "resolve by ignore" case).
    #[display("self")]
    SelfOutput,
    #[display("unknown_txtype")]
    UnknownTxType,
}

/// Classification of a single output of a closing transaction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
pub enum OutputType {
    #[display("funding_output")]
    FundingOutput,
    #[display("output_to_us")]
    OutputToUs,
    #[display("output_to_them")]
    OutputToThem,
    #[display("delayed_output_to_us")]
    DelayedOutputToUs,
    #[display("delayed_output_to_them")]
    DelayedOutputToThem,
    #[display("our_htlc")]
    OurHtlc,
    #[display("their_htlc")]
    TheirHtlc,
}

/// Set of public keys derived from a per-commitment point, sufficient to
/// reconstruct every witness script of one side's version of the
/// commitment transaction. "Broadcaster" names the party whose
/// commitment this is (the one who signed and published it), matching
/// BOLT-3's own `local`/`remote` terminology for script construction.
/// Mirrors `struct keyset` in `onchain.c` and the field layout of
/// `CommitmentKeys` in `src/exercises/types.rs`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct KeySet {
    /// Spendable by the non-broadcaster, immediately, if they reveal the
    /// per-commitment secret for this commitment (the revocation case).
    pub revocation_pubkey: PublicKey,
    /// Spendable by the broadcaster after `to_self_delay`.
    pub delayed_pubkey: PublicKey,
    /// The non-broadcaster's immediate output (`to_remote`). Untweaked:
    /// this crate targets `option_static_remotekey` channels only.
    pub remote_pubkey: PublicKey,
    /// The broadcaster's HTLC key, used in both HTLC script branches.
    pub broadcaster_htlc_pubkey: PublicKey,
    /// The non-broadcaster's HTLC key.
    pub nonbroadcaster_htlc_pubkey: PublicKey,
}

/// The minimum information needed to recognize an HTLC output and build its
/// timeout/success witness. Mirrors `struct htlc_stub`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[derive(StrictEncode, StrictDecode)]
#[derive(LightningEncode, LightningDecode)]
pub struct HtlcStub {
    pub owner: Side,
    pub cltv_expiry: u32,
    pub ripemd: [u8; 20],
}
