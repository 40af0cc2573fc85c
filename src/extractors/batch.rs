//! In-process deobfuscation of Windows batch scripts.
//!
//! Emulates the parts of `cmd.exe` line parsing that droppers lean on:
//! `%VAR%` expansion (with substring and replace modifiers), `set`
//! assignments that feed later lines, and caret escapes.

use super::ToolInvocation;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Environment seen by a script before its first `set`.
const DEFAULT_ENVIRONMENT: &[(&str, &str)] = &[
    ("ALLUSERSPROFILE", r"C:\ProgramData"),
    ("APPDATA", r"C:\Users\puncher\AppData\Roaming"),
    ("COMMONPROGRAMFILES", r"C:\Program Files\Common Files"),
    ("COMSPEC", r"C:\WINDOWS\system32\cmd.exe"),
    ("HOMEDRIVE", "C:"),
    ("LOCALAPPDATA", r"C:\Users\puncher\AppData\Local"),
    ("OS", "Windows_NT"),
    ("PATHEXT", ".COM;.EXE;.BAT;.CMD;.VBS;.VBE;.JS;.JSE;.WSF;.WSH;.MSC"),
    ("PROGRAMDATA", r"C:\ProgramData"),
    ("PROGRAMFILES", r"C:\Program Files"),
    ("PUBLIC", r"C:\Users\Public"),
    ("SYSTEMDRIVE", "C:"),
    ("SYSTEMROOT", r"C:\WINDOWS"),
    ("TEMP", r"C:\Users\puncher\AppData\Local\Temp"),
    ("TMP", r"C:\Users\puncher\AppData\Local\Temp"),
    ("USERNAME", "puncher"),
    ("USERPROFILE", r"C:\Users\puncher"),
    ("WINDIR", r"C:\WINDOWS"),
];

/// Line-by-line batch interpreter state.
#[derive(Debug, Clone)]
pub struct BatchDeobfuscator {
    variables: HashMap<String, String>,
}

impl Default for BatchDeobfuscator {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchDeobfuscator {
    pub fn new() -> Self {
        let variables = DEFAULT_ENVIRONMENT
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { variables }
    }

    /// Deobfuscate a whole script. Every line keeps its own terminator, so
    /// a script with nothing to expand comes back byte-identical.
    pub fn deobfuscate(&mut self, script: &str) -> String {
        let mut out = String::with_capacity(script.len());
        for raw in script.split_inclusive('\n') {
            let (line, terminator) = match raw.strip_suffix("\r\n") {
                Some(line) => (line, "\r\n"),
                None => match raw.strip_suffix('\n') {
                    Some(line) => (line, "\n"),
                    None => (raw, ""),
                },
            };
            out.push_str(&self.normalize_line(line));
            out.push_str(terminator);
        }
        out
    }

    /// Expand, unescape and interpret one logical line.
    pub fn normalize_line(&mut self, line: &str) -> String {
        let expanded = self.expand_variables(line);
        let unescaped = remove_carets(&expanded);
        self.interpret_set(&unescaped);
        unescaped
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(&name.to_ascii_uppercase()).map(String::as_str)
    }

    fn expand_variables(&self, line: &str) -> String {
        let chars: Vec<char> = line.chars().collect();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;

        while i < chars.len() {
            if chars[i] != '%' {
                out.push(chars[i]);
                i += 1;
                continue;
            }

            match chars.get(i + 1) {
                Some('%') => {
                    out.push('%');
                    i += 2;
                    continue;
                }
                // Positional arguments (%0..%9, %~dp0, %*) are left for the reader
                Some(c) if c.is_ascii_digit() || *c == '~' || *c == '*' => {
                    out.push('%');
                    i += 1;
                    continue;
                }
                _ => {}
            }

            let Some(rel) = chars[i + 1..].iter().position(|c| *c == '%') else {
                out.extend(&chars[i..]);
                break;
            };
            let token: String = chars[i + 1..i + 1 + rel].iter().collect();
            if token.is_empty() || token.contains(char::is_whitespace) {
                out.push('%');
                i += 1;
                continue;
            }

            // Undefined variables expand to nothing, as in a script context
            if let Some(value) = self.resolve(&token) {
                out.push_str(&value);
            }
            i += rel + 2;
        }
        out
    }

    fn resolve(&self, token: &str) -> Option<String> {
        let (name, modifier) = match token.split_once(':') {
            Some((name, modifier)) => (name, Some(modifier)),
            None => (token, None),
        };
        let value = self.variable(name)?;

        let Some(modifier) = modifier else {
            return Some(value.to_string());
        };
        if let Some(range) = modifier.strip_prefix('~') {
            return Some(substring(value, range).unwrap_or_else(|| value.to_string()));
        }
        if let Some((old, new)) = modifier.split_once('=') {
            return Some(replace(value, old, new));
        }
        Some(value.to_string())
    }

    fn interpret_set(&mut self, line: &str) {
        let statement = line.trim_start().trim_start_matches('@').trim_start();
        let Some(head) = statement.get(..4) else {
            return;
        };
        if !head.eq_ignore_ascii_case("set ") && !head.eq_ignore_ascii_case("set\t") {
            return;
        }
        let rest = statement[4..].trim_start();

        // Arithmetic and prompts need runtime input
        let lower = rest.to_ascii_lowercase();
        if lower.starts_with("/a") || lower.starts_with("/p") {
            return;
        }

        let assignment = match rest.strip_prefix('"') {
            Some(quoted) => match quoted.rfind('"') {
                Some(end) => &quoted[..end],
                None => quoted,
            },
            None => rest,
        };
        let Some((name, value)) = assignment.split_once('=') else {
            return;
        };
        let name = name.trim_start();
        if name.is_empty() {
            return;
        }

        let key = name.to_ascii_uppercase();
        if value.is_empty() {
            self.variables.remove(&key);
        } else {
            debug!("batch: {} = {}", key, value);
            self.variables.insert(key, value.to_string());
        }
    }
}

/// `%VAR:~start,length%` semantics, including negative offsets.
fn substring(value: &str, range: &str) -> Option<String> {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len() as i64;

    let (start, length) = match range.split_once(',') {
        Some((s, l)) => (s.trim().parse::<i64>().ok()?, Some(l.trim().parse::<i64>().ok()?)),
        None => (range.trim().parse::<i64>().ok()?, None),
    };

    // Offsets come straight from the sample; keep every step saturating
    let start = if start < 0 { len.saturating_add(start).max(0) } else { start.min(len) };
    let end = match length {
        None => len,
        Some(l) if l < 0 => len.saturating_add(l).max(start),
        Some(l) => start.saturating_add(l).min(len),
    };
    Some(chars[start as usize..end as usize].iter().collect())
}

/// `%VAR:old=new%`, case-insensitive. A leading `*` on `old` also drops
/// everything before the first match.
fn replace(value: &str, old: &str, new: &str) -> String {
    let (old, prefix) = match old.strip_prefix('*') {
        Some(stripped) => (stripped, true),
        None => (old, false),
    };
    if old.is_empty() {
        return value.to_string();
    }

    let lower_value = value.to_ascii_lowercase();
    let lower_old = old.to_ascii_lowercase();

    if prefix {
        return match lower_value.find(&lower_old) {
            Some(pos) => format!("{}{}", new, &value[pos + old.len()..]),
            None => value.to_string(),
        };
    }

    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for (pos, _) in lower_value.match_indices(&lower_old) {
        out.push_str(&value[last..pos]);
        out.push_str(new);
        last = pos + old.len();
    }
    out.push_str(&value[last..]);
    out
}

/// Drop caret escapes outside double quotes; `^^` yields a literal caret.
fn remove_carets(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            '^' if !in_quotes => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Tool-chain entry point: write `<basename>_decoded` when deobfuscation
/// changed anything.
pub fn run(invocation: &ToolInvocation<'_>) -> Result<Vec<PathBuf>> {
    let raw = std::fs::read(invocation.path)
        .with_context(|| format!("Failed to read {}", invocation.path.display()))?;
    let script = String::from_utf8_lossy(&raw);
    let decoded = BatchDeobfuscator::new().deobfuscate(&script);

    if crate::file_io::sha256_bytes(decoded.as_bytes()) == crate::file_io::sha256_bytes(&raw) {
        debug!("Batch script {} is unchanged after deobfuscation", invocation.path.display());
        return Ok(Vec::new());
    }

    let basename = invocation
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".to_string());
    let output = invocation.scratch.join(format!("{basename}_decoded"));
    std::fs::write(&output, decoded.as_bytes())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(vec![output])
}
