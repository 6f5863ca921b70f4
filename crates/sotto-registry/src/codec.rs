//! Tiny helpers for reading typed values out of store hashes. Absent or
//! malformed numeric fields read as their additive identity rather than
//! failing the whole record.

use std::collections::HashMap;

pub fn get_str(map: &HashMap<String, String>, field: &str) -> String {
    map.get(field).cloned().unwrap_or_default()
}

pub fn get_opt(map: &HashMap<String, String>, field: &str) -> Option<String> {
    map.get(field).filter(|v| !v.is_empty()).cloned()
}

pub fn get_i64(map: &HashMap<String, String>, field: &str) -> i64 {
    map.get(field).and_then(|v| v.parse().ok()).unwrap_or(0)
}

pub fn get_bool(map: &HashMap<String, String>, field: &str) -> bool {
    map.get(field).map(|v| v == "true").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_numbers_read_as_zero() {
        let mut map = HashMap::new();
        map.insert("n".to_string(), "not-a-number".to_string());
        assert_eq!(get_i64(&map, "n"), 0);
        assert_eq!(get_i64(&map, "absent"), 0);
    }

    #[test]
    fn empty_strings_are_not_options() {
        let mut map = HashMap::new();
        map.insert("x".to_string(), String::new());
        assert_eq!(get_opt(&map, "x"), None);
    }
}
