//! Parser for the `KERN_PROCARGS2` argument/environment blob.
//!
//! Layout:
//! `[argc: u32] [exec_path\0] [\0 padding] [argv[0]\0] ... [argv[argc-1]\0] [KEY=VALUE\0] ... [\0]`

use std::collections::HashMap;

use procscope_core::{ProcscopeError, ProcscopeResult};

/// argc is untrusted data from the kernel buffer; cap it to avoid pathological allocations.
pub const MAX_ARGC: usize = 4096;

/// Decoded `KERN_PROCARGS2` contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcArgs {
    /// Executable path the kernel recorded at exec time.
    pub exec_path: String,
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ProcArgs {
    pub fn parse(buf: &[u8]) -> ProcscopeResult<Self> {
        if buf.len() < 4 {
            return Err(ProcscopeError::decode(
                "procargs",
                format!("buffer of {} bytes has no argc", buf.len()),
            ));
        }

        let argc = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let argc = argc.min(MAX_ARGC);

        let mut strings = Strings { buf, pos: 4 };
        let exec_path = strings.next_string();

        // Skip the terminator's alignment padding
        while strings.pos < buf.len() && buf[strings.pos] == 0 {
            strings.pos += 1;
        }

        let mut argv = Vec::with_capacity(argc);
        for _ in 0..argc {
            if strings.at_end() {
                break;
            }
            argv.push(strings.next_string());
        }

        let mut env = HashMap::new();
        loop {
            let entry = strings.next_string();
            if entry.is_empty() {
                break;
            }
            match entry.split_once('=') {
                Some((key, value)) => env.insert(key.to_string(), value.to_string()),
                None => env.insert(entry, String::new()),
            };
        }

        Ok(ProcArgs {
            exec_path,
            argv,
            env,
        })
    }
}

struct Strings<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Strings<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Next NUL-terminated string; empty once the buffer is exhausted.
    fn next_string(&mut self) -> String {
        if self.at_end() {
            return String::new();
        }
        let rest = &self.buf[self.pos..];
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        self.pos += len + 1;
        String::from_utf8_lossy(&rest[..len]).into_owned()
    }
}
