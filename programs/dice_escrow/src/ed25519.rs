//! Ed25519 co-instruction verification.
//!
//! The runtime's native ed25519 program has already verified the signature by
//! the time `resolve_bet` runs; this module only proves, via the instructions
//! sysvar, that the verified triple (public key, message, signature) is the
//! one this bet expects. The co-instruction must sit immediately before the
//! resolving instruction so nothing can alter the signed byte image in
//! between.

use anchor_lang::prelude::*;
use solana_program::ed25519_program;
use solana_program::sysvar::instructions::{
    load_current_index_checked, load_instruction_at_checked,
};

use crate::DiceError;

/// Header: signature count byte plus one padding byte.
pub const ED25519_HEADER_LEN: usize = 2;
/// One serialized Ed25519SignatureOffsets struct.
pub const ED25519_OFFSETS_LEN: usize = 14;
/// First byte past the offsets table; payload offsets must point at or after it.
pub const ED25519_DATA_START: usize = ED25519_HEADER_LEN + ED25519_OFFSETS_LEN;
pub const ED25519_PUBKEY_LEN: usize = 32;
pub const ED25519_SIGNATURE_LEN: usize = 64;

/// Confirm the instruction immediately preceding the current one is the
/// native ed25519 program asserting `house` signed `message` with `sig`.
pub fn verify_house_signature(
    instruction_sysvar: &AccountInfo,
    house: &Pubkey,
    message: &[u8],
    sig: &[u8],
) -> Result<()> {
    let current_index = load_current_index_checked(instruction_sysvar)?;
    require!(current_index > 0, DiceError::StaleOrMissingCoInstruction);

    let co_instruction =
        load_instruction_at_checked(current_index as usize - 1, instruction_sysvar)?;
    require!(
        co_instruction.program_id == ed25519_program::ID,
        DiceError::StaleOrMissingCoInstruction
    );

    check_ed25519_data(&co_instruction.data, &house.to_bytes(), message, sig)
}

/// Check a raw ed25519 instruction payload against the expected triple.
/// Fails closed on any structural or content mismatch.
pub fn check_ed25519_data(
    data: &[u8],
    expected_pubkey: &[u8; 32],
    expected_message: &[u8],
    expected_signature: &[u8],
) -> Result<()> {
    require!(
        data.len() >= ED25519_DATA_START,
        DiceError::SignatureVerificationFailed
    );
    // Exactly one signature; data[1] is padding.
    require!(data[0] == 1, DiceError::SignatureVerificationFailed);

    let signature_offset = le_u16(data, 2) as usize;
    let signature_ix_index = le_u16(data, 4);
    let pubkey_offset = le_u16(data, 6) as usize;
    let pubkey_ix_index = le_u16(data, 8);
    let message_offset = le_u16(data, 10) as usize;
    let message_len = le_u16(data, 12) as usize;
    let message_ix_index = le_u16(data, 14);

    // Self-contained only: referencing another instruction's bytes would let
    // the payload change out from under the verifier.
    require!(
        signature_ix_index == u16::MAX
            && pubkey_ix_index == u16::MAX
            && message_ix_index == u16::MAX,
        DiceError::SignatureVerificationFailed
    );

    let pubkey = payload_at(data, pubkey_offset, ED25519_PUBKEY_LEN)?;
    let signature = payload_at(data, signature_offset, ED25519_SIGNATURE_LEN)?;
    let message = payload_at(data, message_offset, message_len)?;

    require!(pubkey == expected_pubkey, DiceError::SignatureVerificationFailed);
    require!(
        signature == expected_signature,
        DiceError::SignatureVerificationFailed
    );
    require!(
        message == expected_message,
        DiceError::SignatureVerificationFailed
    );

    Ok(())
}

fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn payload_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or(DiceError::SignatureVerificationFailed)?;
    require!(
        offset >= ED25519_DATA_START && end <= data.len(),
        DiceError::SignatureVerificationFailed
    );
    Ok(&data[offset..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build instruction data the way Ed25519Program lays it out:
    /// header, offsets, pubkey at 16, signature at 48, message at 112.
    fn ed25519_ix_data(pubkey: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Vec<u8> {
        let pubkey_offset = ED25519_DATA_START as u16;
        let signature_offset = pubkey_offset + ED25519_PUBKEY_LEN as u16;
        let message_offset = signature_offset + ED25519_SIGNATURE_LEN as u16;

        let mut data = vec![1u8, 0u8];
        data.extend_from_slice(&signature_offset.to_le_bytes());
        data.extend_from_slice(&u16::MAX.to_le_bytes());
        data.extend_from_slice(&pubkey_offset.to_le_bytes());
        data.extend_from_slice(&u16::MAX.to_le_bytes());
        data.extend_from_slice(&message_offset.to_le_bytes());
        data.extend_from_slice(&(message.len() as u16).to_le_bytes());
        data.extend_from_slice(&u16::MAX.to_le_bytes());
        data.extend_from_slice(pubkey);
        data.extend_from_slice(signature);
        data.extend_from_slice(message);
        data
    }

    #[test]
    fn accepts_matching_payload() {
        let pubkey = [7u8; 32];
        let signature = [9u8; 64];
        let message = b"bet record bytes".to_vec();
        let data = ed25519_ix_data(&pubkey, &message, &signature);
        assert!(check_ed25519_data(&data, &pubkey, &message, &signature).is_ok());
    }

    #[test]
    fn rejects_any_altered_message_byte() {
        let pubkey = [7u8; 32];
        let signature = [9u8; 64];
        let message: Vec<u8> = (0u8..98).collect();
        let data = ed25519_ix_data(&pubkey, &message, &signature);
        for i in 0..message.len() {
            let mut tampered = message.clone();
            tampered[i] ^= 0x01;
            assert!(
                check_ed25519_data(&data, &pubkey, &tampered, &signature).is_err(),
                "byte {i} flip must be caught"
            );
        }
    }

    #[test]
    fn rejects_wrong_pubkey() {
        let pubkey = [7u8; 32];
        let signature = [9u8; 64];
        let message = b"msg".to_vec();
        let data = ed25519_ix_data(&pubkey, &message, &signature);
        assert!(check_ed25519_data(&data, &[8u8; 32], &message, &signature).is_err());
    }

    #[test]
    fn rejects_wrong_signature() {
        let pubkey = [7u8; 32];
        let signature = [9u8; 64];
        let message = b"msg".to_vec();
        let data = ed25519_ix_data(&pubkey, &message, &signature);
        assert!(check_ed25519_data(&data, &pubkey, &message, &[10u8; 64]).is_err());
    }

    #[test]
    fn rejects_multiple_signatures() {
        let pubkey = [7u8; 32];
        let signature = [9u8; 64];
        let message = b"msg".to_vec();
        let mut data = ed25519_ix_data(&pubkey, &message, &signature);
        data[0] = 2;
        assert!(check_ed25519_data(&data, &pubkey, &message, &signature).is_err());
    }

    #[test]
    fn rejects_cross_instruction_references() {
        let pubkey = [7u8; 32];
        let signature = [9u8; 64];
        let message = b"msg".to_vec();
        for offsets_field in [4usize, 8, 14] {
            let mut data = ed25519_ix_data(&pubkey, &message, &signature);
            data[offsets_field] = 0;
            data[offsets_field + 1] = 0;
            assert!(check_ed25519_data(&data, &pubkey, &message, &signature).is_err());
        }
    }

    #[test]
    fn rejects_truncated_data() {
        let pubkey = [7u8; 32];
        let signature = [9u8; 64];
        let message = b"msg".to_vec();
        let data = ed25519_ix_data(&pubkey, &message, &signature);
        for len in [0, 1, ED25519_DATA_START - 1, data.len() - 1] {
            assert!(check_ed25519_data(&data[..len], &pubkey, &message, &signature).is_err());
        }
    }

    #[test]
    fn rejects_offsets_into_header() {
        let pubkey = [7u8; 32];
        let signature = [9u8; 64];
        let message = b"msg".to_vec();
        let mut data = ed25519_ix_data(&pubkey, &message, &signature);
        // Point the pubkey inside the offsets table.
        data[6] = 0;
        data[7] = 0;
        assert!(check_ed25519_data(&data, &pubkey, &message, &signature).is_err());
    }
}
