//! ElGamal key exchange over a freshly generated prime field.
//!
//! Protects the per-transfer symmetric key. Every keypair draws its own
//! prime, so no domain parameters are shared across transfers: compromising
//! one transfer's keys reveals nothing about any other.
//!
//! Arithmetic runs over arbitrary-precision integers: square-and-multiply
//! modular exponentiation (`BigUint::modpow`) and an extended-Euclid
//! modular inverse. In session mode only the public triple `(p, g, y)`
//! ever reaches the server; the private exponent stays with the receiver.

use crate::error::{Error, Result};
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Default prime size in bits for fresh keypairs.
pub const DEFAULT_PRIME_BITS: u64 = 512;

/// Miller-Rabin witness rounds.
const MILLER_RABIN_ROUNDS: u32 = 20;

/// Candidates drawn before giving up on finding a prime.
const PRIME_SEARCH_LIMIT: u32 = 100_000;

/// Small generator candidates tried before random search.
const GENERATOR_CANDIDATES: [u32; 9] = [2, 3, 5, 7, 11, 13, 17, 19, 23];

/// Public half of an ElGamal keypair: `(p, g, y)` with `y = g^x mod p`.
#[derive(Clone, PartialEq, Eq)]
pub struct ElGamalPublicKey {
    /// Prime modulus.
    pub p: BigUint,
    /// Group generator.
    pub g: BigUint,
    /// Public value.
    pub y: BigUint,
}

impl ElGamalPublicKey {
    /// Big-endian byte components `(p, g, y)` for persistence.
    pub fn components(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (
            self.p.to_bytes_be(),
            self.g.to_bytes_be(),
            self.y.to_bytes_be(),
        )
    }

    /// Rebuild from big-endian byte components.
    pub fn from_components(p: &[u8], g: &[u8], y: &[u8]) -> Result<Self> {
        let p = BigUint::from_bytes_be(p);
        let g = BigUint::from_bytes_be(g);
        let y = BigUint::from_bytes_be(y);
        if p < BigUint::from(3u32) || g.is_zero() || y.is_zero() || g >= p || y >= p {
            return Err(Error::Validation("malformed public key components".into()));
        }
        Ok(Self { p, g, y })
    }
}

impl fmt::Debug for ElGamalPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElGamalPublicKey")
            .field("bits", &self.p.bits())
            .finish()
    }
}

/// Private half of an ElGamal keypair.
///
/// Holds the modulus and the secret exponent. In session mode this value
/// exists only on the receiver's side; it is never persisted server-side.
pub struct ElGamalPrivateKey {
    /// Prime modulus.
    pub p: BigUint,
    x: BigUint,
}

impl ElGamalPrivateKey {
    /// Rebuild from the modulus and a big-endian exponent.
    pub fn from_exponent_bytes(p: &[u8], exponent: &[u8]) -> Result<Self> {
        let p = BigUint::from_bytes_be(p);
        let x = BigUint::from_bytes_be(exponent);
        if p < BigUint::from(3u32) || x.is_zero() || x >= p {
            return Err(Error::Validation("malformed private exponent".into()));
        }
        Ok(Self { p, x })
    }

    /// Big-endian exponent bytes.
    ///
    /// # Security
    /// Handle with care - this exposes the secret exponent.
    pub fn exponent_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.x.to_bytes_be())
    }
}

impl fmt::Debug for ElGamalPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElGamalPrivateKey")
            .field("bits", &self.p.bits())
            .field("x", &"[REDACTED]")
            .finish()
    }
}

/// One encrypted block: `(c1, c2)` big-endian plus the plaintext chunk
/// length, so leading zero bytes survive the round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherBlock {
    /// `g^k mod p`, big-endian.
    pub c1: Vec<u8>,
    /// `m * y^k mod p`, big-endian.
    pub c2: Vec<u8>,
    /// Length of the plaintext chunk this block carries.
    pub plain_len: u32,
}

/// Chunked ElGamal ciphertext for an arbitrary-length message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCiphertext {
    /// Encrypted blocks in message order.
    pub blocks: Vec<CipherBlock>,
}

impl KeyCiphertext {
    /// Serialize for persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Encryption(format!("ciphertext serialization failed: {e}")))
    }

    /// Deserialize from a persisted blob.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| Error::Decryption(format!("ciphertext deserialization failed: {e}")))
    }
}

/// Generate a fresh keypair over a new `bits`-sized prime.
pub fn generate_keypair(
    rng: &mut (impl RngCore + CryptoRng),
    bits: u64,
) -> Result<(ElGamalPublicKey, ElGamalPrivateKey)> {
    if bits < 64 {
        return Err(Error::KeyGeneration("prime size below 64 bits".into()));
    }
    let p = generate_prime(rng, bits)?;
    let g = find_generator(rng, &p);

    let one = BigUint::one();
    // x in [1, p-1).
    let x = rng.gen_biguint_range(&one, &(&p - 1u32));
    let y = g.modpow(&x, &p);

    Ok((
        ElGamalPublicKey {
            p: p.clone(),
            g,
            y,
        },
        ElGamalPrivateKey { p, x },
    ))
}

/// Encrypt `message` to `key`, chunking it so every block integer is
/// strictly below the modulus.
pub fn encrypt(
    rng: &mut (impl RngCore + CryptoRng),
    key: &ElGamalPublicKey,
    message: &[u8],
) -> Result<KeyCiphertext> {
    if message.is_empty() {
        return Err(Error::Validation("empty message".into()));
    }
    let max_block = ((key.p.bits() - 1) / 8) as usize;
    if max_block == 0 {
        return Err(Error::Encoding("modulus too small for any block".into()));
    }

    let blocks = message
        .chunks(max_block)
        .map(|chunk| encrypt_block(rng, key, chunk))
        .collect::<Result<Vec<_>>>()?;
    Ok(KeyCiphertext { blocks })
}

fn encrypt_block(
    rng: &mut (impl RngCore + CryptoRng),
    key: &ElGamalPublicKey,
    chunk: &[u8],
) -> Result<CipherBlock> {
    let m = BigUint::from_bytes_be(chunk);
    if m >= key.p {
        return Err(Error::Encoding("block does not fit below modulus".into()));
    }

    // Fresh ephemeral exponent per block.
    let k = rng.gen_biguint_range(&BigUint::one(), &(&key.p - 1u32));
    let c1 = key.g.modpow(&k, &key.p);
    let c2 = (&m * key.y.modpow(&k, &key.p)) % &key.p;

    Ok(CipherBlock {
        c1: c1.to_bytes_be(),
        c2: c2.to_bytes_be(),
        plain_len: chunk.len() as u32,
    })
}

/// Decrypt a chunked ciphertext with the private exponent.
pub fn decrypt(key: &ElGamalPrivateKey, ciphertext: &KeyCiphertext) -> Result<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(Vec::new());
    for block in &ciphertext.blocks {
        let chunk = decrypt_block(key, block)?;
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

fn decrypt_block(key: &ElGamalPrivateKey, block: &CipherBlock) -> Result<Zeroizing<Vec<u8>>> {
    let c1 = BigUint::from_bytes_be(&block.c1);
    let c2 = BigUint::from_bytes_be(&block.c2);
    if c1.is_zero() || c1 >= key.p || c2 >= key.p {
        return Err(Error::Decryption("ciphertext outside field".into()));
    }

    // m = c2 * (c1^x)^-1 mod p
    let s = c1.modpow(&key.x, &key.p);
    let s_inv =
        mod_inverse(&s, &key.p).ok_or_else(|| Error::Decryption("no modular inverse".into()))?;
    let m = (&c2 * &s_inv) % &key.p;

    let bytes = m.to_bytes_be();
    let plain_len = block.plain_len as usize;
    if bytes.len() > plain_len {
        return Err(Error::Decryption("block exceeds declared length".into()));
    }
    // Left-pad to the declared chunk length: leading zeros of the original
    // chunk vanish in the integer representation.
    let mut chunk = Zeroizing::new(vec![0u8; plain_len]);
    chunk[plain_len - bytes.len()..].copy_from_slice(&bytes);
    Ok(chunk)
}

/// Modular inverse via the extended Euclidean algorithm.
fn mod_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    let a = BigInt::from(a.clone());
    let m = BigInt::from(modulus.clone());
    let e = a.extended_gcd(&m);
    if !e.gcd.is_one() {
        return None;
    }
    let mut x = e.x % &m;
    if x.is_negative() {
        x += &m;
    }
    x.to_biguint()
}

/// Draw random odd candidates with the top bit set until one passes
/// Miller-Rabin.
fn generate_prime(rng: &mut (impl RngCore + CryptoRng), bits: u64) -> Result<BigUint> {
    let one = BigUint::one();
    for _ in 0..PRIME_SEARCH_LIMIT {
        let mut candidate = rng.gen_biguint(bits);
        candidate |= &one << (bits - 1);
        candidate |= &one;
        if is_prime(rng, &candidate) {
            return Ok(candidate);
        }
    }
    Err(Error::KeyGeneration("prime search exhausted".into()))
}

/// Miller-Rabin probabilistic primality test.
fn is_prime(rng: &mut (impl RngCore + CryptoRng), n: &BigUint) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);
    if *n == two || *n == three {
        return true;
    }
    if *n < two || n.is_even() {
        return false;
    }

    // n - 1 = d * 2^r with d odd.
    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut r = 0u64;
    while d.is_even() {
        d >>= 1;
        r += 1;
    }

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..r {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Find a generator: smallest small candidate g with
/// `g^((p-1)/2) mod p != 1`, falling back to random candidates.
fn find_generator(rng: &mut (impl RngCore + CryptoRng), p: &BigUint) -> BigUint {
    let one = BigUint::one();
    let exp = (p - 1u32) >> 1;

    for candidate in GENERATOR_CANDIDATES {
        let g = BigUint::from(candidate);
        if g < *p && g.modpow(&exp, p) != one {
            return g;
        }
    }
    for _ in 0..100 {
        let g = rng.gen_biguint_range(&BigUint::from(2u32), p);
        if g.modpow(&exp, p) != one {
            return g;
        }
    }
    BigUint::from(2u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn test_miller_rabin_known_values() {
        let mut rng = test_rng(1);
        for prime in [2u32, 3, 5, 7, 13, 97, 7919, 104_729] {
            assert!(is_prime(&mut rng, &BigUint::from(prime)), "{prime}");
        }
        for composite in [1u32, 4, 9, 15, 91, 7917, 104_730] {
            assert!(!is_prime(&mut rng, &BigUint::from(composite)), "{composite}");
        }
        // Carmichael numbers must not fool the test.
        for carmichael in [561u32, 1105, 1729, 41041] {
            assert!(!is_prime(&mut rng, &BigUint::from(carmichael)), "{carmichael}");
        }
    }

    #[test]
    fn test_generated_prime_has_requested_size() {
        let mut rng = test_rng(2);
        let p = generate_prime(&mut rng, 128).expect("prime");
        assert_eq!(p.bits(), 128);
        assert!(p.is_odd());
    }

    #[test]
    fn test_mod_inverse() {
        let inv = mod_inverse(&BigUint::from(3u32), &BigUint::from(11u32)).expect("inverse");
        assert_eq!(inv, BigUint::from(4u32)); // 3 * 4 = 12 = 1 mod 11

        // No inverse when gcd != 1.
        assert!(mod_inverse(&BigUint::from(4u32), &BigUint::from(8u32)).is_none());
    }

    #[test]
    fn test_keypair_consistency() {
        let mut rng = test_rng(3);
        let (public, private) = generate_keypair(&mut rng, 128).expect("keypair");
        assert_eq!(public.p, private.p);
        assert_eq!(public.y, public.g.modpow(&private.x, &private.p));
    }

    #[test]
    fn test_fresh_primes_per_keypair() {
        let mut rng = test_rng(4);
        let (a, _) = generate_keypair(&mut rng, 128).expect("keypair");
        let (b, _) = generate_keypair(&mut rng, 128).expect("keypair");
        assert_ne!(a.p, b.p);
    }

    #[test]
    fn test_round_trip_single_block() {
        let mut rng = test_rng(5);
        let (public, private) = generate_keypair(&mut rng, 256).expect("keypair");

        let message = b"short secret";
        let sealed = encrypt(&mut rng, &public, message).expect("encrypt");
        assert_eq!(sealed.blocks.len(), 1);

        let opened = decrypt(&private, &sealed).expect("decrypt");
        assert_eq!(&*opened, message);
    }

    #[test]
    fn test_round_trip_chunked() {
        let mut rng = test_rng(6);
        // A 256-bit prime forces a 32-byte key into two blocks.
        let (public, private) = generate_keypair(&mut rng, 256).expect("keypair");

        let message: [u8; 32] = crate::crypto::random_bytes(&mut rng);
        let sealed = encrypt(&mut rng, &public, &message).expect("encrypt");
        assert!(sealed.blocks.len() > 1);

        let opened = decrypt(&private, &sealed).expect("decrypt");
        assert_eq!(&*opened, &message);
    }

    #[test]
    fn test_leading_zero_bytes_survive() {
        let mut rng = test_rng(7);
        let (public, private) = generate_keypair(&mut rng, 128).expect("keypair");

        let message = [0u8, 0, 0, 42, 0, 7];
        let sealed = encrypt(&mut rng, &public, &message).expect("encrypt");
        let opened = decrypt(&private, &sealed).expect("decrypt");
        assert_eq!(&*opened, &message);
    }

    #[test]
    fn test_all_zero_chunk_survives() {
        let mut rng = test_rng(8);
        let (public, private) = generate_keypair(&mut rng, 128).expect("keypair");

        let message = [0u8; 10];
        let sealed = encrypt(&mut rng, &public, &message).expect("encrypt");
        let opened = decrypt(&private, &sealed).expect("decrypt");
        assert_eq!(&*opened, &message);
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut rng = test_rng(9);
        let (public, _) = generate_keypair(&mut rng, 128).expect("keypair");

        // A block as long as the full modulus does not fit below it here.
        let chunk = public.p.to_bytes_be();
        let result = encrypt_block(&mut rng, &public, &chunk);
        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut rng = test_rng(10);
        let (public, _) = generate_keypair(&mut rng, 128).expect("keypair");
        assert!(encrypt(&mut rng, &public, &[]).is_err());
    }

    #[test]
    fn test_wrong_exponent_fails_or_garbles() {
        let mut rng = test_rng(11);
        let (public, _private) = generate_keypair(&mut rng, 256).expect("keypair");

        let message = b"the right answer";
        let sealed = encrypt(&mut rng, &public, message).expect("encrypt");

        let wrong_x = rng.gen_biguint_range(&BigUint::one(), &(&public.p - 1u32));
        let wrong = ElGamalPrivateKey {
            p: public.p.clone(),
            x: wrong_x,
        };
        match decrypt(&wrong, &sealed) {
            Ok(opened) => assert_ne!(&*opened, message),
            Err(_) => {} // recovered integer longer than the declared chunk
        }
    }

    #[test]
    fn test_component_round_trip() {
        let mut rng = test_rng(12);
        let (public, private) = generate_keypair(&mut rng, 128).expect("keypair");

        let (p, g, y) = public.components();
        let restored = ElGamalPublicKey::from_components(&p, &g, &y).expect("public");
        assert_eq!(restored, public);

        let restored =
            ElGamalPrivateKey::from_exponent_bytes(&p, &private.exponent_bytes()).expect("private");
        assert_eq!(restored.x, private.x);
    }

    #[test]
    fn test_malformed_components_rejected() {
        assert!(ElGamalPublicKey::from_components(&[], &[2], &[3]).is_err());
        assert!(ElGamalPublicKey::from_components(&[0x0b], &[], &[3]).is_err());
        // y >= p
        assert!(ElGamalPublicKey::from_components(&[0x0b], &[0x02], &[0x0c]).is_err());
        assert!(ElGamalPrivateKey::from_exponent_bytes(&[0x0b], &[]).is_err());
    }

    #[test]
    fn test_ciphertext_blob_round_trip() {
        let mut rng = test_rng(13);
        let (public, _) = generate_keypair(&mut rng, 128).expect("keypair");
        let sealed = encrypt(&mut rng, &public, b"blob me").expect("encrypt");

        let blob = sealed.to_bytes().expect("to_bytes");
        assert_eq!(KeyCiphertext::from_bytes(&blob).expect("from_bytes"), sealed);
        assert!(KeyCiphertext::from_bytes(&[0xde, 0xad]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_round_trip(seed in any::<u64>(), message in proptest::collection::vec(any::<u8>(), 1..96)) {
            let mut rng = test_rng(seed);
            let (public, private) = generate_keypair(&mut rng, 128).expect("keypair");
            let sealed = encrypt(&mut rng, &public, &message).expect("encrypt");
            let opened = decrypt(&private, &sealed).expect("decrypt");
            prop_assert_eq!(&*opened, &message[..]);
        }
    }
}
