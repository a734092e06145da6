//! kubeadm bootstrap tokens
//!
//! Format: `[a-z0-9]{6}.[a-z0-9]{16}`, the first part being the public token
//! ID and the second the secret.

use rand::Rng;

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;

/// Generate a random bootstrap token
pub fn generate_bootstrap_token() -> String {
    let mut rng = rand::thread_rng();
    let mut part = |len: usize| -> String {
        (0..len)
            .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
            .collect()
    };
    let id = part(TOKEN_ID_LEN);
    let secret = part(TOKEN_SECRET_LEN);
    format!("{}.{}", id, secret)
}

pub fn is_valid_bootstrap_token(token: &str) -> bool {
    let valid_part = |s: &str, len: usize| {
        s.len() == len && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    };
    match token.split_once('.') {
        Some((id, secret)) => valid_part(id, TOKEN_ID_LEN) && valid_part(secret, TOKEN_SECRET_LEN),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_valid_and_distinct() {
        let a = generate_bootstrap_token();
        let b = generate_bootstrap_token();
        assert!(is_valid_bootstrap_token(&a), "{}", a);
        assert!(is_valid_bootstrap_token(&b), "{}", b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_validation() {
        assert!(is_valid_bootstrap_token("abcdef.0123456789abcdef"));
        assert!(!is_valid_bootstrap_token("ABCDEF.0123456789abcdef"));
        assert!(!is_valid_bootstrap_token("abcdef0123456789abcdef"));
        assert!(!is_valid_bootstrap_token("abcde.0123456789abcdef"));
        assert!(!is_valid_bootstrap_token("abcdef.0123456789abcde"));
        assert!(!is_valid_bootstrap_token("abcdef.0123456789abcdef.x"));
        assert!(!is_valid_bootstrap_token(""));
    }
}
