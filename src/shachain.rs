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

//! The per-commitment revocation secret store is assumed provided (spec.md
//! §1): this daemon never derives or stores shachain secrets itself, only
//! looks an index up. `SecretProvider` is the seam.

/// Looks up the revocation secret for a given commitment index, if the
/// store has learned it yet (it will not have, for the party's own
/// not-yet-revoked current and next commitments).
pub trait SecretProvider {
    fn secret_for_index(&self, index: u64) -> Option<[u8; 32]>;
}

/// A `SecretProvider` that never has anything, for contexts where no
/// revoked commitment is possible (e.g. processing the funding
/// transaction itself).
#[derive(Copy, Clone, Debug, Default)]
pub struct EmptyProvider;

impl SecretProvider for EmptyProvider {
    fn secret_for_index(&self, _index: u64) -> Option<[u8; 32]> {
        None
    }
}
