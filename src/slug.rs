//! Short random names for segment mask payloads

use crate::error::{GmhError, Result};
use uuid::Uuid;

/// Default slug length
pub const DEFAULT_SLUG_LENGTH: usize = 5;

/// Default slug alphabet
pub const DEFAULT_SLUG_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

/// Source of candidate slugs. Uniqueness is checked by the caller.
pub trait SlugGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Draws fixed-length strings uniformly from an alphabet
#[derive(Debug, Clone)]
pub struct RandomSlugGenerator {
    length: usize,
    alphabet: Vec<char>,
}

impl RandomSlugGenerator {
    pub fn new(length: usize, alphabet: &str) -> Result<Self> {
        let alphabet: Vec<char> = alphabet.chars().collect();
        if alphabet.is_empty() || alphabet.len() > 256 {
            return Err(GmhError::Validation(format!(
                "slug alphabet must have between 1 and 256 characters, got {}",
                alphabet.len()
            )));
        }
        Ok(Self { length, alphabet })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn alphabet(&self) -> &[char] {
        &self.alphabet
    }
}

impl Default for RandomSlugGenerator {
    fn default() -> Self {
        Self {
            length: DEFAULT_SLUG_LENGTH,
            alphabet: DEFAULT_SLUG_ALPHABET.chars().collect(),
        }
    }
}

impl SlugGenerator for RandomSlugGenerator {
    fn generate(&self) -> String {
        let count = self.alphabet.len();
        // rejection threshold keeps the draw uniform for any alphabet size
        let limit = 256 - 256 % count;
        let mut slug = String::with_capacity(self.length);
        let mut produced = 0;

        while produced < self.length {
            let bytes = *Uuid::new_v4().as_bytes();
            // bytes 6 and 8 carry the version and variant bits
            for (position, byte) in bytes.iter().enumerate() {
                if position == 6 || position == 8 || (*byte as usize) >= limit {
                    continue;
                }
                slug.push(self.alphabet[*byte as usize % count]);
                produced += 1;
                if produced == self.length {
                    break;
                }
            }
        }

        slug
    }
}
