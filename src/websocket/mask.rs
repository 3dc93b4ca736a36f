//! Payload masking (RFC 6455 section 5.3).

/// XOR `data` with the masking key, starting at key position 0.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    apply_mask_at(data, mask, 0);
}

/// XOR `data` with the masking key, where `data[0]` is byte `offset` of the
/// frame payload.
///
/// Used when a payload arrives in pieces: each piece is unmasked as it comes
/// in, continuing the key rotation where the previous piece stopped.
pub fn apply_mask_at(data: &mut [u8], mask: [u8; 4], offset: u64) {
    let shift = (offset % 4) as usize;
    let key = [
        mask[shift],
        mask[(shift + 1) % 4],
        mask[(shift + 2) % 4],
        mask[(shift + 3) % 4],
    ];
    let key_word = u32::from_ne_bytes(key);

    let mut words = data.chunks_exact_mut(4);
    for word in &mut words {
        let value = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ key_word;
        word.copy_from_slice(&value.to_ne_bytes());
    }
    for (byte, k) in words.into_remainder().iter_mut().zip(key) {
        *byte ^= k;
    }
}

/// Fresh random masking key for an outgoing client frame.
///
/// Falls back to a time-derived key if the OS source fails; masking exists to
/// defeat proxy cache poisoning, not for confidentiality.
#[must_use]
pub fn random_mask() -> [u8; 4] {
    let mut key = [0u8; 4];
    if getrandom::getrandom(&mut key).is_err() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0x5A5A_5A5A);
        key = nanos.to_le_bytes();
    }
    key
}
