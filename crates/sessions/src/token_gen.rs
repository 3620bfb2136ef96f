//! Token generation.
//!
//! Generation itself is a pure draw from the 36-symbol, 8-length space; the
//! collision retry against the live token directory happens in the store.

use rand::Rng;

use cr_domain::token::{Token, TOKEN_ALPHABET, TOKEN_LEN};

pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> Token;
}

/// Uniform draw from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> Token {
        let mut rng = rand::thread_rng();
        let mut indices = [0usize; TOKEN_LEN];
        for slot in &mut indices {
            *slot = rng.gen_range(0..TOKEN_ALPHABET.len());
        }
        Token::from_indices(indices)
    }
}
