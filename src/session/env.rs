//! Environment merge policy.

use std::collections::HashMap;

/// Inherit the daemon's environment and append the caller's additions
/// (caller entries override). Keys are deduplicated case-insensitively —
/// last occurrence wins — which matters on platforms that encode the
/// environment as a wide, null-delimited block for a pseudo-console handle.
pub fn merge_env(additions: &[(String, String)]) -> Vec<(String, String)> {
    let mut merged: HashMap<String, (String, String)> = HashMap::new();

    for (k, v) in std::env::vars() {
        merged.insert(k.to_lowercase(), (k, v));
    }
    for (k, v) in additions {
        merged.insert(k.to_lowercase(), (k.clone(), v.clone()));
    }

    if cfg!(windows) && !merged.contains_key("systemroot") {
        merged.insert(
            "systemroot".to_string(),
            ("SYSTEMROOT".to_string(), r"C:\Windows".to_string()),
        );
    }

    merged.into_values().collect()
}
