//! Random password generation

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMBERS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+[]{};:,.<>?/~";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("At least one character class must be enabled")]
    NoCharacterClasses,

    #[error("Length {length} is too short for {required} required character classes")]
    TooShort { length: usize, required: usize },
}

/// Which characters a generated password draws from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub length: usize,
    pub symbols: bool,
    pub numbers: bool,
    pub uppercase: bool,
    pub lowercase: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: 16,
            symbols: true,
            numbers: true,
            uppercase: true,
            lowercase: true,
        }
    }
}

impl PasswordPolicy {
    fn classes(&self) -> Vec<&'static [u8]> {
        [
            (self.lowercase, LOWERCASE),
            (self.uppercase, UPPERCASE),
            (self.numbers, NUMBERS),
            (self.symbols, SYMBOLS),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, class)| class)
        .collect()
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        let required = self.classes().len();
        if required == 0 {
            return Err(PolicyError::NoCharacterClasses);
        }
        if self.length < required {
            return Err(PolicyError::TooShort {
                length: self.length,
                required,
            });
        }
        Ok(())
    }
}

/// Generate a password from the thread-local RNG
pub fn generate(policy: &PasswordPolicy) -> Result<String, PolicyError> {
    generate_with(policy, &mut rand::thread_rng())
}

/// Generate a password containing at least one character of every enabled class
pub fn generate_with<R: Rng + ?Sized>(policy: &PasswordPolicy, rng: &mut R) -> Result<String, PolicyError> {
    policy.validate()?;

    let classes = policy.classes();
    let pool: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .filter_map(|class| class.choose(rng).copied())
        .collect();
    while chars.len() < policy.length {
        if let Some(&c) = pool.choose(rng) {
            chars.push(c);
        }
    }
    chars.shuffle(rng);

    Ok(chars.into_iter().map(char::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_policy() {
        let password = generate(&PasswordPolicy::default()).unwrap();
        assert_eq!(password.len(), 16);
        assert!(password.bytes().any(|c| LOWERCASE.contains(&c)));
        assert!(password.bytes().any(|c| UPPERCASE.contains(&c)));
        assert!(password.bytes().any(|c| NUMBERS.contains(&c)));
        assert!(password.bytes().any(|c| SYMBOLS.contains(&c)));
    }

    #[test]
    fn test_restricted_classes() {
        let policy = PasswordPolicy {
            length: 40,
            symbols: false,
            uppercase: false,
            ..Default::default()
        };
        let password = generate(&policy).unwrap();
        assert_eq!(password.len(), 40);
        assert!(password.bytes().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_invalid_policies() {
        let none = PasswordPolicy {
            symbols: false,
            numbers: false,
            uppercase: false,
            lowercase: false,
            ..Default::default()
        };
        assert_eq!(generate(&none), Err(PolicyError::NoCharacterClasses));

        let short = PasswordPolicy {
            length: 3,
            ..Default::default()
        };
        assert_eq!(
            generate(&short),
            Err(PolicyError::TooShort { length: 3, required: 4 })
        );
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let policy = PasswordPolicy::default();
        let a = generate_with(&policy, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = generate_with(&policy, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: PasswordPolicy = serde_json::from_str(r#"{"length": 24, "symbols": false}"#).unwrap();
        assert_eq!(policy.length, 24);
        assert!(!policy.symbols);
        assert!(policy.numbers);
    }
}
