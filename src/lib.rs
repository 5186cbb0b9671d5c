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

//! Library half of `onchaind`: the classifier, deconstructors, registry
//! and wire protocol, exposed so the binary (`main.rs`) and the
//! integration tests can drive the same event loop without a real
//! process boundary.

#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    dead_code
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate amplify_derive;
#[macro_use]
extern crate strict_encoding;
#[macro_use]
extern crate lightning_encoding;

pub mod classify;
pub mod deconstruct;
pub mod error;
pub mod eventloop;
pub mod feerate;
pub mod keys;
pub mod proposal;
pub mod registry;
pub mod scripts;
pub mod shachain;
pub mod types;
pub mod wire;
