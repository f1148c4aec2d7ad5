//! One-time code generation and Argon2id hashing.
//!
//! Codes are short, so the hash profile is tuned separately from a password
//! profile: enough memory cost to make offline guessing of a leaked table
//! expensive, while keeping a verification request well under a second.
use anyhow::{Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::{Rng, RngCore, rngs::OsRng};

pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const DEFAULT_HASH_MEMORY_KIB: u32 = 19_456;
pub const DEFAULT_HASH_ITERATIONS: u32 = 2;
pub const DEFAULT_HASH_PARALLELISM: u32 = 1;

/// Generate a numeric code of `length` digits from the OS CSPRNG.
#[must_use]
pub fn generate(length: usize) -> String {
    let mut rng = OsRng;
    generate_with_rng(&mut rng, length)
}

fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R, length: usize) -> String {
    // gen_range samples uniformly, so no modulo bias on 0-9.
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// True when `code` is exactly `length` ASCII digits.
#[must_use]
pub fn is_well_formed(code: &str, length: usize) -> bool {
    code.len() == length && code.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashParams {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl HashParams {
    /// Default profile: 19 MiB memory, 2 iterations, single lane.
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory_kib: DEFAULT_HASH_MEMORY_KIB,
            iterations: DEFAULT_HASH_ITERATIONS,
            parallelism: DEFAULT_HASH_PARALLELISM,
        }
    }

    #[must_use]
    pub fn with_memory_kib(mut self, memory_kib: u32) -> Self {
        self.memory_kib = memory_kib;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    #[must_use]
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }
}

impl Default for HashParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of hashing a code: PHC string plus the salt it embeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashedCode {
    pub code_hash: String,
    pub salt: String,
}

#[derive(Clone, Debug)]
pub struct CodeHasher {
    params: HashParams,
}

impl CodeHasher {
    /// Build a hasher, rejecting parameters Argon2 would refuse.
    /// # Errors
    /// Returns an error if the parameters are out of range.
    pub fn new(params: HashParams) -> Result<Self> {
        let hasher = Self { params };
        hasher.argon2()?;
        Ok(hasher)
    }

    #[must_use]
    pub fn params(&self) -> HashParams {
        self.params
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            None,
        )
        .map_err(|e| anyhow!("invalid Argon2 parameters: {e}"))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash `code` under a fresh random salt.
    /// # Errors
    /// Returns an error if Argon2 fails.
    pub fn hash(&self, code: &str) -> Result<HashedCode> {
        let salt = SaltString::generate(&mut OsRng);
        let code_hash = self
            .argon2()?
            .hash_password(code.as_bytes(), &salt)
            .map_err(|e| anyhow!("failed to hash code: {e}"))?
            .to_string();

        Ok(HashedCode {
            code_hash,
            salt: salt.as_str().to_string(),
        })
    }

    /// Compare `candidate` against a stored PHC hash.
    /// # Errors
    /// Returns an error if the stored hash cannot be parsed.
    pub fn verify(&self, candidate: &str, code_hash: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(code_hash).map_err(|e| anyhow!("invalid stored code hash: {e}"))?;

        match self.argon2()?.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(anyhow!("code verification failed: {e}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn cheap_hasher() -> CodeHasher {
        CodeHasher::new(HashParams::new().with_memory_kib(8).with_iterations(1)).unwrap()
    }

    #[test]
    fn generate_has_requested_length_and_digits() {
        for length in [4, 6, 8] {
            let code = generate(length);
            assert!(is_well_formed(&code, length), "bad code {code}");
        }
    }

    #[test]
    fn generate_keeps_leading_zeros() {
        let mut rng = StdRng::seed_from_u64(7);
        let codes: Vec<String> = (0..2_000).map(|_| generate_with_rng(&mut rng, 6)).collect();
        assert!(codes.iter().all(|code| code.len() == 6));
        assert!(codes.iter().any(|code| code.starts_with('0')));
    }

    #[test]
    fn generate_covers_every_digit() {
        let mut rng = StdRng::seed_from_u64(42);
        let code = generate_with_rng(&mut rng, 500);
        for digit in '0'..='9' {
            assert!(code.contains(digit), "digit {digit} never drawn");
        }
    }

    #[test]
    fn is_well_formed_rejects_non_digits() {
        assert!(is_well_formed("012345", 6));
        assert!(!is_well_formed("01234", 6));
        assert!(!is_well_formed("0123456", 6));
        assert!(!is_well_formed("01234a", 6));
        assert!(!is_well_formed("١٢٣٤٥٦", 6));
    }

    #[test]
    fn default_params_profile() {
        let params = HashParams::default();
        assert_eq!(params.memory_kib(), 19_456);
        assert_eq!(params.iterations(), 2);
        assert_eq!(params.parallelism(), 1);
    }

    #[test]
    fn new_rejects_invalid_params() {
        assert!(CodeHasher::new(HashParams::new().with_iterations(0)).is_err());
    }

    #[test]
    fn hash_and_verify() {
        let hasher = cheap_hasher();
        let hashed = hasher.hash("123456").unwrap();
        assert!(hashed.code_hash.starts_with("$argon2id$"));
        assert!(hashed.code_hash.contains(&hashed.salt));
        assert!(hasher.verify("123456", &hashed.code_hash).unwrap());
        assert!(!hasher.verify("654321", &hashed.code_hash).unwrap());
    }

    #[test]
    fn same_code_gets_distinct_salts() {
        let hasher = cheap_hasher();
        let first = hasher.hash("000000").unwrap();
        let second = hasher.hash("000000").unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.code_hash, second.code_hash);
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        let hasher = cheap_hasher();
        assert!(hasher.verify("123456", "not-a-phc-string").is_err());
    }
}
