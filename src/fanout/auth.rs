// =============================================================================
// Fan-out tier resolution
// =============================================================================
//
// A connecting client presents a token (or none) and is assigned one of the
// three access tiers. Comparison is constant-time, mirroring `api::auth`'s
// `constant_time_eq` — token values differ in sensitivity the same way an
// admin token does, even though these gate market-data visibility rather
// than write access.
// =============================================================================

use crate::types::AccessTier;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Resolve a presented token against the configured private/VIP tokens.
/// No token, or a token matching neither, falls through to Public — the
/// fan-out contract never rejects a connection outright, it just narrows
/// what the connection sees.
pub fn resolve_tier(token: Option<&str>, private_token: &str, vip_token: &str) -> AccessTier {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return AccessTier::Public;
    };
    if !private_token.is_empty() && constant_time_eq(token.as_bytes(), private_token.as_bytes()) {
        return AccessTier::Private;
    }
    if !vip_token.is_empty() && constant_time_eq(token.as_bytes(), vip_token.as_bytes()) {
        return AccessTier::Vip;
    }
    AccessTier::Public
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_private_token_grants_private_tier() {
        assert_eq!(resolve_tier(Some("secret-p"), "secret-p", "secret-v"), AccessTier::Private);
    }

    #[test]
    fn matching_vip_token_grants_vip_tier() {
        assert_eq!(resolve_tier(Some("secret-v"), "secret-p", "secret-v"), AccessTier::Vip);
    }

    #[test]
    fn missing_or_unknown_token_falls_back_to_public() {
        assert_eq!(resolve_tier(None, "secret-p", "secret-v"), AccessTier::Public);
        assert_eq!(resolve_tier(Some("wrong"), "secret-p", "secret-v"), AccessTier::Public);
        assert_eq!(resolve_tier(Some(""), "secret-p", "secret-v"), AccessTier::Public);
    }

    #[test]
    fn unconfigured_tier_tokens_never_match() {
        assert_eq!(resolve_tier(Some("anything"), "", ""), AccessTier::Public);
    }
}
