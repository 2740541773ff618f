//! `/proc/<pid>/status` key/value block.
//!
//! Values are kept as trimmed strings; callers pick the interpretation
//! through the typed accessors on [`StatusValue`].

use std::collections::HashMap;
use std::fmt;

use procscope_core::{ProcscopeError, ProcscopeResult};
use serde::Serialize;

/// One raw value from the status block, e.g. `"0022"` or `"1024 kB"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusValue(pub String);

/// Real, effective, saved and filesystem ids from the `Uid:`/`Gid:` lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Creds {
    pub real: u32,
    pub effective: u32,
    pub saved: u32,
    pub fs: u32,
}

fn invalid(kind: &str, value: &str) -> ProcscopeError {
    ProcscopeError::decode("status", format!("{value:?} is not a valid {kind}"))
}

impl StatusValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse as octal (`Umask:`).
    pub fn as_octal(&self) -> ProcscopeResult<i64> {
        i64::from_str_radix(&self.0, 8).map_err(|_| invalid("octal number", &self.0))
    }

    /// Parse as decimal (`PPid:`, `Threads:`).
    pub fn as_decimal(&self) -> ProcscopeResult<i64> {
        self.0.parse().map_err(|_| invalid("decimal number", &self.0))
    }

    /// Parse as hexadecimal without a `0x` prefix (`SigBlk:`, `CapEff:`).
    pub fn as_hex(&self) -> ProcscopeResult<u64> {
        u64::from_str_radix(&self.0, 16).map_err(|_| invalid("hexadecimal number", &self.0))
    }

    /// Parse as whitespace-separated decimals (`Groups:`). Empty is `[]`.
    pub fn as_array(&self) -> ProcscopeResult<Vec<i64>> {
        self.0
            .split_ascii_whitespace()
            .map(|v| v.parse().map_err(|_| invalid("integer array", &self.0)))
            .collect()
    }

    /// Parse the four-id credential tuple.
    pub fn as_creds(&self) -> ProcscopeResult<Creds> {
        let ids: Vec<&str> = self.0.split_ascii_whitespace().collect();
        if ids.len() != 4 {
            return Err(invalid("credential tuple", &self.0));
        }
        let id = |s: &str| s.parse::<u32>().map_err(|_| invalid("credential tuple", &self.0));
        Ok(Creds {
            real: id(ids[0])?,
            effective: id(ids[1])?,
            saved: id(ids[2])?,
            fs: id(ids[3])?,
        })
    }

    /// Parse a size in bytes; a `kB` unit multiplies by 1024.
    pub fn as_size(&self) -> ProcscopeResult<u64> {
        let parts: Vec<&str> = self.0.split_ascii_whitespace().collect();
        let (number, multiplier) = match parts.as_slice() {
            [n] => (*n, 1),
            [n, "kB"] => (*n, 1024),
            [n, "B"] => (*n, 1),
            _ => return Err(invalid("size", &self.0)),
        };
        let n: u64 = number.parse().map_err(|_| invalid("size", &self.0))?;
        n.checked_mul(multiplier)
            .ok_or_else(|| invalid("size", &self.0))
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split the status block into a key/value map. Lines without a key are skipped.
pub fn parse_status(text: &str) -> HashMap<String, StatusValue> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), StatusValue(value.trim().to_string())))
        })
        .collect()
}

/// Find a single key without building the whole map.
pub fn find_status_value(text: &str, name: &str) -> ProcscopeResult<StatusValue> {
    text.lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key == name).then(|| StatusValue(value.trim().to_string()))
        })
        .ok_or_else(|| ProcscopeError::unset(name))
}
