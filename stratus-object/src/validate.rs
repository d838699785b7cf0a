//! Name validation for buckets and objects.

use stratus_core::{Result, StratusError};

const MAX_OBJECT_NAME_BYTES: usize = 1024;

/// Bucket names: 3–63 characters of lowercase alphanumerics, `.`, `-`,
/// `_`; must start and end alphanumeric; no consecutive dots.
pub fn bucket_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() < 3 || bytes.len() > 63 {
        return Err(invalid(format!(
            "bucket name '{name}' must be between 3 and 63 characters"
        )));
    }
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return Err(invalid(format!(
            "bucket name '{name}' must start and end with a letter or digit"
        )));
    }
    if name.contains("..") {
        return Err(invalid(format!("bucket name '{name}' must not contain consecutive dots")));
    }
    for b in bytes {
        match b {
            b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' => {}
            _ => {
                return Err(invalid(format!(
                    "bucket name '{name}' may only contain lowercase letters, digits, '.', '-' and '_'"
                )));
            }
        }
    }
    Ok(())
}

/// Object names: up to 1024 UTF-8 bytes, no NUL, no control characters
/// except TAB, no CR/LF, no leading or trailing whitespace, no `//`.
pub fn object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("object name must not be empty"));
    }
    if name.len() > MAX_OBJECT_NAME_BYTES {
        return Err(invalid(format!(
            "object name exceeds {MAX_OBJECT_NAME_BYTES} bytes ({} given)",
            name.len()
        )));
    }
    if name.starts_with(char::is_whitespace) || name.ends_with(char::is_whitespace) {
        return Err(invalid("object name must not start or end with whitespace"));
    }
    if name.contains("//") {
        return Err(invalid("object name must not contain '//'"));
    }
    for c in name.chars() {
        if c == '\r' || c == '\n' || c == '\0' || (c < '\u{20}' && c != '\t') {
            return Err(invalid(format!(
                "object name contains forbidden control character U+{:04X}",
                c as u32
            )));
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> StratusError {
    StratusError::invalid_argument(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names() {
        assert!(bucket_name("demo").is_ok());
        assert!(bucket_name("my-bucket_01.backup").is_ok());
        assert!(bucket_name("ab").is_err());
        assert!(bucket_name(&"a".repeat(64)).is_err());
        assert!(bucket_name("-leading").is_err());
        assert!(bucket_name("trailing-").is_err());
        assert!(bucket_name("double..dot").is_err());
        assert!(bucket_name("UpperCase").is_err());
        assert!(bucket_name("with space").is_err());
    }

    #[test]
    fn object_name_boundaries() {
        assert!(object_name("hello.txt").is_ok());
        assert!(object_name("logs/2026/08/01.log").is_ok());
        assert!(object_name("tabs\tallowed").is_ok());
        // Exactly at the limit passes; one past fails.
        assert!(object_name(&"a".repeat(1024)).is_ok());
        assert!(object_name(&"a".repeat(1025)).is_err());
    }

    #[test]
    fn object_name_forbidden_bytes() {
        assert!(object_name("nul\0byte").is_err());
        assert!(object_name("line\nfeed").is_err());
        assert!(object_name("carriage\rreturn").is_err());
        assert!(object_name("bell\u{7}").is_err());
        assert!(object_name(" leading-space").is_err());
        assert!(object_name("trailing-space ").is_err());
        assert!(object_name("double//slash").is_err());
        assert!(object_name("").is_err());
    }
}
