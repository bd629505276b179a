//! Utility functions for id minting

use crate::types::Role;
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Mint a fresh unit id (`unit_1...`).
pub fn new_unit_id() -> anyhow::Result<String> {
    new_uuid_to_bech32("unit_")
}

/// Mint a fresh actor id with the role's prefix.
pub fn new_actor_id(role: Role) -> anyhow::Result<String> {
    new_uuid_to_bech32(role.hrp())
}
