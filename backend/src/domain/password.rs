//! Password hashing and strength policy.
//!
//! Hashes use the `pbkdf2_sha256$<iterations>$<salt>$<base64 digest>` layout
//! so accounts migrated from Django-style stores keep working. The policy
//! mirrors the usual validator chain: minimum length, common password list,
//! not entirely numeric, and not too similar to the user's own attributes.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use constant_time_eq::constant_time_eq;
use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::Sha256;

const ALGORITHM: &str = "pbkdf2_sha256";
const SALT_LENGTH: usize = 22;
const DIGEST_LENGTH: usize = 32;

/// Iteration count used when none is configured.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Encodes and verifies password hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    pub const fn new(iterations: u32) -> Self {
        Self {
            iterations: if iterations == 0 { 1 } else { iterations },
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Hash `password` with a fresh random salt.
    ///
    /// # Examples
    /// ```
    /// use scaffold::domain::PasswordHasher;
    ///
    /// let hasher = PasswordHasher::new(10);
    /// let encoded = hasher.hash("correct horse");
    /// assert!(encoded.starts_with("pbkdf2_sha256$10$"));
    /// assert!(hasher.verify("correct horse", &encoded));
    /// ```
    pub fn hash(&self, password: &str) -> String {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LENGTH)
            .map(char::from)
            .collect();
        self.hash_with_salt(password, &salt)
    }

    fn hash_with_salt(&self, password: &str, salt: &str) -> String {
        let digest = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), self.iterations);
        format!(
            "{ALGORITHM}${}${salt}${}",
            self.iterations,
            STANDARD.encode(digest)
        )
    }

    /// Check `password` against an encoded hash. Unusable or malformed
    /// hashes never verify.
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        let mut parts = encoded.splitn(4, '$');
        let (Some(algorithm), Some(iterations), Some(salt), Some(expected)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        if algorithm != ALGORITHM {
            return false;
        }
        let Ok(iterations) = iterations.parse::<u32>() else {
            return false;
        };
        let Ok(expected) = STANDARD.decode(expected) else {
            return false;
        };
        let actual = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), iterations.max(1));
        constant_time_eq(&actual, &expected)
    }
}

fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; DIGEST_LENGTH] {
    let mut digest = [0_u8; DIGEST_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut digest);
    digest
}

/// Reasons a password is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordViolation {
    #[error("password must contain at least {min} characters")]
    TooShort { min: usize },
    #[error("password is too common")]
    Common,
    #[error("password is entirely numeric")]
    EntirelyNumeric,
    #[error("password is too similar to the {attribute}")]
    TooSimilar { attribute: &'static str },
}

/// User attributes a password must not resemble.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordContext<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

impl<'a> PasswordContext<'a> {
    fn attributes(&self) -> [(&'static str, &'a str); 4] {
        [
            ("username", self.username),
            ("first name", self.first_name),
            ("last name", self.last_name),
            ("email address", self.email),
        ]
    }
}

const COMMON_PASSWORDS: &[&str] = &[
    "123456", "123456789", "12345678", "password", "qwerty", "qwerty123", "1q2w3e4r",
    "12345", "1234567", "111111", "1234567890", "123123", "abc123", "password1",
    "iloveyou", "000000", "1qaz2wsx", "qwertyuiop", "123321", "654321", "666666",
    "121212", "dragon", "monkey", "football", "baseball", "letmein", "sunshine",
    "princess", "welcome", "welcome1", "admin", "admin123", "login", "master",
    "shadow", "superman", "michael", "jennifer", "trustno1", "starwars", "passw0rd",
    "password123", "qazwsx", "zaq12wsx", "freedom", "whatever", "hello123",
    "charlie", "donald", "batman", "access", "mustang", "hunter2", "solo",
    "ashley", "bailey", "loveme", "flower", "asdfghjkl", "asdfgh", "zxcvbnm",
    "changeme", "secret", "p@ssw0rd", "default", "guest", "test1234",
];

/// Strength rules applied before accepting a new password.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PasswordPolicy {
    min_length: usize,
    max_similarity: f64,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_similarity: 0.7,
        }
    }
}

impl PasswordPolicy {
    pub fn new(min_length: usize, max_similarity: f64) -> Self {
        Self {
            min_length,
            max_similarity,
        }
    }

    pub fn is_valid(&self, password: &str, context: &PasswordContext<'_>) -> bool {
        self.violations(password, context).is_empty()
    }

    /// Every rule the password breaks, in evaluation order.
    pub fn violations(
        &self,
        password: &str,
        context: &PasswordContext<'_>,
    ) -> Vec<PasswordViolation> {
        let mut violations = Vec::new();
        if let Some(attribute) = self.similar_attribute(password, context) {
            violations.push(PasswordViolation::TooSimilar { attribute });
        }
        if password.chars().count() < self.min_length {
            violations.push(PasswordViolation::TooShort {
                min: self.min_length,
            });
        }
        let lowered = password.trim().to_lowercase();
        if COMMON_PASSWORDS.contains(&lowered.as_str()) {
            violations.push(PasswordViolation::Common);
        }
        if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
            violations.push(PasswordViolation::EntirelyNumeric);
        }
        violations
    }

    fn similar_attribute(
        &self,
        password: &str,
        context: &PasswordContext<'_>,
    ) -> Option<&'static str> {
        let password = password.to_lowercase();
        let password_len = password.chars().count();
        for (attribute, value) in context.attributes() {
            if value.is_empty() {
                continue;
            }
            let value = value.to_lowercase();
            let parts = std::iter::once(value.as_str())
                .chain(value.split(|c: char| !(c.is_alphanumeric() || c == '_')));
            for part in parts.filter(|part| !part.is_empty()) {
                let part_len = part.chars().count();
                // Very short attributes cannot meaningfully match long passwords.
                let bound = self.max_similarity / 2.0 * password_len as f64;
                if password_len >= 10 * part_len && (part_len as f64) < bound {
                    continue;
                }
                if quick_ratio(&password, part) >= self.max_similarity {
                    return Some(attribute);
                }
            }
        }
        None
    }
}

/// Upper bound on the similarity of two strings: twice the size of the
/// character multiset intersection over the total length.
fn quick_ratio(left: &str, right: &str) -> f64 {
    let total = left.chars().count() + right.chars().count();
    if total == 0 {
        return 1.0;
    }
    let mut available: HashMap<char, usize> = HashMap::new();
    for c in right.chars() {
        *available.entry(c).or_default() += 1;
    }
    let mut matches = 0_usize;
    for c in left.chars() {
        if let Some(count) = available.get_mut(&c) {
            if *count > 0 {
                *count -= 1;
                matches += 1;
            }
        }
    }
    2.0 * matches as f64 / total as f64
}
