//! CID computation for the in-process engine.
//!
//! CIDs are version 0: base58btc over a sha2-256 multihash. That always
//! yields 46 characters starting with `Qm`.

use sha2::{Digest, Sha256};

use crate::cid::CID_SIZE;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const SHA2_256: u8 = 0x12;
const DIGEST_LEN: u8 = 0x20;

/// Computes the CID of `data`.
pub(crate) fn compute(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    encode_multihash(&digest)
}

/// Generates a fresh random peer identity in the same textual form.
pub(crate) fn random_peer_id() -> String {
    let seed: [u8; 32] = rand::random();
    encode_multihash(&seed)
}

/// Returns true if `cid` parses as a version 0 CID.
pub(crate) fn is_well_formed(cid: &str) -> bool {
    cid.len() == CID_SIZE && cid.starts_with("Qm") && cid.bytes().all(|b| ALPHABET.contains(&b))
}

fn encode_multihash(digest: &[u8]) -> String {
    let mut multihash = Vec::with_capacity(digest.len() + 2);
    multihash.push(SHA2_256);
    multihash.push(DIGEST_LEN);
    multihash.extend_from_slice(digest);
    base58_encode(&multihash)
}

fn base58_encode(input: &[u8]) -> String {
    let zeros = input.iter().take_while(|&&b| b == 0).count();

    // little-endian base58 digits
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 138 / 100 + 1);
    for &byte in &input[zeros..] {
        let mut carry = u32::from(byte);
        for digit in &mut digits {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|&d| char::from(ALPHABET[usize::from(d)])));
    out
}
