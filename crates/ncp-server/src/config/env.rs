// crates/ncp-server/src/config/env.rs
// Environment variable helpers

/// Parse a boolean env var. Accepts 1/0, true/false, yes/no, on/off.
/// Returns None when unset or unrecognized.
pub fn parse_bool_env(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Whether debug logging was requested via NCP_DEBUG.
pub fn debug_enabled() -> bool {
    parse_bool_env("NCP_DEBUG").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_spellings() {
        // Env mutation is process-global; use one uniquely named var per case.
        unsafe {
            std::env::set_var("NCP_TEST_BOOL_A", "yes");
            std::env::set_var("NCP_TEST_BOOL_B", "0");
            std::env::set_var("NCP_TEST_BOOL_C", "maybe");
        }
        assert_eq!(parse_bool_env("NCP_TEST_BOOL_A"), Some(true));
        assert_eq!(parse_bool_env("NCP_TEST_BOOL_B"), Some(false));
        assert_eq!(parse_bool_env("NCP_TEST_BOOL_C"), None);
        assert_eq!(parse_bool_env("NCP_TEST_BOOL_UNSET"), None);
    }
}
