//! Masking of sensitive values before persistence

use serde_json::Value;

/// Key fragments that mark a field as sensitive
const SENSITIVE_FRAGMENTS: [&str; 5] = ["password", "secret", "key", "token", "credential"];

/// Recursively mask sensitive string values in a JSON document.
///
/// A value is masked when its key contains any sensitive fragment
/// (case-insensitive). Masking keeps the first and last character and
/// replaces the middle with asterisks; values of three characters or fewer
/// are fully masked.
pub fn mask_sensitive_values(doc: &mut Value) {
    if let Value::Object(map) = doc {
        for (key, value) in map.iter_mut() {
            if is_sensitive_key(key) {
                if let Value::String(s) = value {
                    *s = mask(s);
                }
            } else {
                mask_sensitive_values(value);
            }
        }
    } else if let Value::Array(items) = doc {
        for item in items {
            mask_sensitive_values(item);
        }
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| lower.contains(f))
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 3 {
        return "*".repeat(chars.len());
    }
    let mut masked = String::with_capacity(chars.len());
    masked.push(chars[0]);
    masked.extend(std::iter::repeat('*').take(chars.len() - 2));
    masked.push(chars[chars.len() - 1]);
    masked
}
