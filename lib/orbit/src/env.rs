use std::env;

/// Installation root of the node.
pub const INSTALL_DIR: &str = "GALILEO_INSTALL_DIR";
/// Directory holding the node and network configuration files.
pub const CONF_DIR: &str = "GALILEO_CONF";
/// Root directory for block storage.
pub const STORAGE_ROOT: &str = "GALILEO_STORAGE_ROOT";

/// Returns the value of the environment variable, or the default when it is
/// unset or empty.
#[inline]
pub fn var_or(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(ref value) if !value.is_empty() => value.clone(),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_or_default() {
        assert_eq!(var_or("GALILEO_TEST_UNSET_VAR", "fallback"), "fallback");
    }

    #[test]
    fn test_var_or_set() {
        env::set_var("GALILEO_TEST_SET_VAR", "value");
        assert_eq!(var_or("GALILEO_TEST_SET_VAR", "fallback"), "value");
        env::remove_var("GALILEO_TEST_SET_VAR");
    }
}
