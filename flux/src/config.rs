//! Parser for the `KEY = VALUE;` configuration file format documented in spec.md §6. The rest of
//! the system treats the config file as an external collaborator that "provides a key→string
//! mapping" — this is that mapping, made concrete so the binaries are actually runnable.

use hashbrown::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub struct ConfigError {
    message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// A loaded `KEY = VALUE;` file. Comment lines (`#...`) and blank lines are ignored; every other
/// non-empty line must contain exactly one `=`, and the value is stripped of a trailing `;` and
/// surrounding whitespace.
#[derive(Debug)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|err| ConfigError {
            message: format!("failed to read config file {}: {}", path.as_ref().display(), err),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut values = HashMap::new();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let eq_pos = line.find('=').ok_or_else(|| ConfigError {
                message: format!("line {}: missing '=' in `{}`", line_no + 1, raw_line),
            })?;

            let key = line[..eq_pos].trim().to_string();
            let mut value = line[eq_pos + 1..].trim();

            if let Some(stripped) = value.strip_suffix(';') {
                value = stripped.trim();
            }

            if key.is_empty() {
                return Err(ConfigError {
                    message: format!("line {}: empty key in `{}`", line_no + 1, raw_line),
                });
            }

            values.insert(key, value.to_string());
        }

        Ok(Config { values })
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.values.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key).map(|v| v.as_str()) {
            Some("1") | Some("true") | Some("TRUE") | Some("True") => true,
            Some("0") | Some("false") | Some("FALSE") | Some("False") => false,
            _ => default,
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    pub fn get_u16(&self, key: &str, default: u16) -> u16 {
        self.values
            .get(key)
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_and_strips_trailing_semicolon() {
        let config = Config::parse(
            "# a comment\n\
             MANAGER_SERVER_PORT = 61531;\n\
             \n\
             ENABLE_SPAM_PREVENTION = true;\n",
        )
        .unwrap();

        assert_eq!(config.get_u16("MANAGER_SERVER_PORT", 0), 61531);
        assert!(config.get_bool("ENABLE_SPAM_PREVENTION", false));
    }

    #[test]
    fn missing_key_falls_back_to_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.get_i64("NETWORK_THREADS_COUNT", -1), -1);
    }

    #[test]
    fn rejects_line_without_equals() {
        let err = Config::parse("not_a_kv_pair").unwrap_err();
        assert!(err.to_string().contains("missing '='"));
    }
}
