//! PKCE verification (§4.7, §8 "PKCE correctness"): for `S256`, the token
//! endpoint accepts `code_verifier` v iff
//! `base64url(SHA-256(v)) == code_challenge`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use metamcp_store::CodeChallengeMethod;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[must_use]
pub fn verify(method: CodeChallengeMethod, verifier: &str, challenge: &str) -> bool {
    match method {
        CodeChallengeMethod::Plain => constant_time_eq(verifier, challenge),
        CodeChallengeMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            let computed = URL_SAFE_NO_PAD.encode(digest);
            constant_time_eq(&computed, challenge)
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s256_accepts_the_matching_verifier() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        assert!(verify(CodeChallengeMethod::S256, verifier, &challenge));
    }

    #[test]
    fn s256_rejects_a_mismatched_verifier() {
        assert!(!verify(CodeChallengeMethod::S256, "wrong-verifier", "somechallenge"));
    }

    #[test]
    fn plain_compares_verifier_and_challenge_directly() {
        assert!(verify(CodeChallengeMethod::Plain, "abc123", "abc123"));
        assert!(!verify(CodeChallengeMethod::Plain, "abc123", "abc124"));
    }
}
