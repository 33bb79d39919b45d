//! Parse a project `.env` file into a key/value map; applied in lib with the
//! no-overwrite rule.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn dotenv_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// Minimal parser: `KEY=VALUE` lines, `#` comments, trimmed keys and values,
/// surrounding double quotes stripped (with `\"` unescaped). No multiline values.
fn parse(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
            Some(inner) => inner.replace("\\\"", "\""),
            None => value.to_string(),
        };
        out.insert(key.to_string(), value);
    }
    out
}

/// Loads `.env` from `override_dir` or the current directory. Missing file
/// returns an empty map.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    match dotenv_path(override_dir) {
        Some(path) => Ok(parse(&std::fs::read_to_string(path)?)),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let m = parse("# note\n\nWORKFLOW_ROOT=./workflows\n");
        assert_eq!(m.get("WORKFLOW_ROOT"), Some(&"./workflows".to_string()));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn parse_strips_double_quotes() {
        let m = parse(r#"BIND_ADDR="127.0.0.1:9000""#);
        assert_eq!(m.get("BIND_ADDR"), Some(&"127.0.0.1:9000".to_string()));
    }

    #[test]
    fn parse_keeps_escaped_quote() {
        let m = parse(r#"GREETING="say \"hi\"""#);
        assert_eq!(m.get("GREETING"), Some(&"say \"hi\"".to_string()));
    }

    #[test]
    fn missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_map(Some(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn reads_file_from_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "A=1\nB=2\n").unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(m.get("A"), Some(&"1".to_string()));
        assert_eq!(m.get("B"), Some(&"2".to_string()));
    }
}
