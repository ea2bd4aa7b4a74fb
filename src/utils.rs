//! Utility functions for id minting and hashing

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Hash a CBOR payload; the digest becomes the record's storage key.
pub fn content_hash(cbor: &[u8]) -> String {
    sha256::digest(cbor)
}
