use ark_std::rand::RngCore;

/// `len` random bytes, used for contexts and nonces
pub fn random_bytes<R: RngCore>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}
