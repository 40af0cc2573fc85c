//! Task option parsing.
//!
//! Submissions carry a flat `key=value;key2=value2` string. Commas are accepted
//! as separators too, since older submitters still send them.

use std::collections::BTreeMap;

/// Parsed task options. Keys are trimmed; later duplicates win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    values: BTreeMap<String, String>,
}

impl TaskOptions {
    pub fn parse(options: &str) -> Self {
        Self::parse_bytes(options.as_bytes())
    }

    /// Parse raw option bytes. Fields whose key or value is not valid UTF-8 are
    /// dropped rather than failing the caller.
    pub fn parse_bytes(raw: &[u8]) -> Self {
        let mut values = BTreeMap::new();
        for field in raw.split(|b| *b == b';' || *b == b',') {
            let Some(eq) = field.iter().position(|b| *b == b'=') else {
                continue;
            };
            let (Ok(key), Ok(value)) = (
                std::str::from_utf8(&field[..eq]),
                std::str::from_utf8(&field[eq + 1..]),
            ) else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            values.insert(key.to_string(), value.trim().to_string());
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Non-empty `password` option.
    pub fn password(&self) -> Option<&str> {
        self.get("password").filter(|p| !p.is_empty())
    }

    /// Side file the task asked to execute (`file=`), if any.
    pub fn file(&self) -> Option<&str> {
        self.get("file").filter(|f| !f.is_empty())
    }
}

/// Extract the archive/document password from a raw options string.
pub fn resolve_password(options: &str) -> Option<String> {
    TaskOptions::parse(options).password().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_present() {
        assert_eq!(resolve_password("password=secret123"), Some("secret123".into()));
        assert_eq!(
            resolve_password("procdump=1;password=infected;free=yes"),
            Some("infected".into())
        );
    }

    #[test]
    fn test_password_absent_or_empty() {
        assert_eq!(resolve_password(""), None);
        assert_eq!(resolve_password("procdump=1;free=yes"), None);
        assert_eq!(resolve_password("password="), None);
    }

    #[test]
    fn test_comma_separator_accepted() {
        assert_eq!(resolve_password("free=yes,password=abc"), Some("abc".into()));
    }

    #[test]
    fn test_value_may_contain_equals() {
        assert_eq!(resolve_password("password=a=b"), Some("a=b".into()));
    }

    #[test]
    fn test_non_utf8_password_is_no_password() {
        let raw = b"free=yes;password=\xff\xfe";
        assert_eq!(TaskOptions::parse_bytes(raw).password(), None);
        assert_eq!(TaskOptions::parse_bytes(raw).get("free"), Some("yes"));
    }

    #[test]
    fn test_fields_without_equals_ignored() {
        let opts = TaskOptions::parse("nohuman;file=payload.exe; ;=x");
        assert_eq!(opts.file(), Some("payload.exe"));
        assert!(!opts.contains("nohuman"));
        assert!(!opts.contains(""));
    }
}
