//! Lexical scan of handler source.
//!
//! This is a tripwire, not a security boundary: the deny-list is matched line
//! by line over the full text (comments included), so it can both over- and
//! under-match. Isolation of the handler itself lives in `sandbox`.

use crate::core::error::PluginGateError;
use crate::core::output;
use regex::Regex;
use std::sync::LazyLock;

pub const EDITABLE_BEGIN_MARKER: &str = "# >>> BEGIN EDITABLE REGION >>>";
pub const EDITABLE_END_MARKER: &str = "# <<< END EDITABLE REGION <<<";

/// One deny-list entry: a label for reports, the regex, and what it guards.
#[derive(Debug)]
pub struct ForbiddenPattern {
    pub label: &'static str,
    pub category: &'static str,
    regex: Regex,
}

const DENY_LIST: &[(&str, &str, &str)] = &[
    // process spawning
    ("subprocess", r"\bsubprocess\b", "process spawning"),
    ("os.system", r"\bos\.(?:system|popen|exec\w*|spawn\w*)\b", "process spawning"),
    ("Popen", r"\bPopen\b", "process spawning"),
    ("child_process", r"\bchild_process\b", "process spawning"),
    ("process::Command", r"\bprocess::Command\b", "process spawning"),
    ("exec", r"\bexec\b", "process spawning"),
    ("eval", r"\beval\b", "process spawning"),
    ("nohup", r"\bnohup\b", "process spawning"),
    ("xargs", r"\bxargs\b", "process spawning"),
    // shell invocation
    ("sh -c", r"\b(?:ba|da|z|k|c|tc|fi)?sh\s+-c\b", "shell invocation"),
    ("system()", r"\bsystem\s*\(", "shell invocation"),
    ("sudo", r"\bsudo\b", "shell invocation"),
    // raw sockets
    ("socket", r"\bsocket\b", "raw socket"),
    ("/dev/tcp", r"/dev/(?:tcp|udp)/", "raw socket"),
    ("netcat", r"\b(?:nc|ncat|netcat|socat|telnet)\b", "raw socket"),
    // HTTP / URL clients
    ("curl", r"\bcurl\b", "http client"),
    ("wget", r"\bwget\b", "http client"),
    ("urllib", r"\burllib\d?\b", "http client"),
    ("http.client", r"\bhttp\.client\b", "http client"),
    (
        "requests",
        r"\bimport\s+requests\b|\brequests\.(?:get|post|put|patch|delete|head|request|Session)\b",
        "http client",
    ),
    ("httpx", r"\b(?:httpx|aiohttp|reqwest|hyper)\b", "http client"),
    ("url", r"\b(?:https?|ftp)://", "http client"),
    // remote access / version control
    ("ssh", r"\b(?:ssh|scp|sftp|rsync)\b", "remote access"),
    ("git", r"\bgit\b", "version control"),
];

static FORBIDDEN_PATTERNS: LazyLock<Vec<ForbiddenPattern>> = LazyLock::new(|| {
    DENY_LIST
        .iter()
        .map(|&(label, pattern, category)| ForbiddenPattern {
            label,
            category,
            regex: Regex::new(pattern).expect("valid deny-list regex"),
        })
        .collect()
});

pub fn forbidden_patterns() -> &'static [ForbiddenPattern] {
    &FORBIDDEN_PATTERNS
}

/// Report every (line, pattern) hit in `source`.
pub fn scan_forbidden_patterns(file: &str, source: &str) -> Vec<PluginGateError> {
    let mut hits = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        for pattern in forbidden_patterns() {
            if pattern.regex.is_match(line) {
                hits.push(PluginGateError::ForbiddenPattern {
                    file: file.to_string(),
                    line: idx + 1,
                    pattern: pattern.label.to_string(),
                    category: pattern.category.to_string(),
                    excerpt: output::compact_line(line, 80),
                });
            }
        }
    }
    hits
}

/// Report each editable-region marker that does not appear on a line of its own.
pub fn check_region_markers(file: &str, source: &str) -> Vec<PluginGateError> {
    [EDITABLE_BEGIN_MARKER, EDITABLE_END_MARKER]
        .into_iter()
        .filter(|marker| !source.lines().any(|l| l.trim() == *marker))
        .map(|marker| PluginGateError::EditableRegion {
            file: file.to_string(),
            marker: marker.to_string(),
        })
        .collect()
}

/// Text strictly between the begin and end markers, if both are present in
/// order.
pub fn editable_region(source: &str) -> Option<String> {
    let mut inside = false;
    let mut region: Vec<&str> = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim();
        if !inside && trimmed == EDITABLE_BEGIN_MARKER {
            inside = true;
        } else if inside && trimmed == EDITABLE_END_MARKER {
            let mut text = region.join("\n");
            if !region.is_empty() {
                text.push('\n');
            }
            return Some(text);
        } else if inside {
            region.push(line);
        }
    }
    None
}

/// Replace the editable region of `source` with `region`. Returns `None` when
/// `source` has no well-formed region.
pub fn replace_editable_region(source: &str, region: &str) -> Option<String> {
    let begin = source.find(EDITABLE_BEGIN_MARKER)?;
    let body_start = begin + source[begin..].find('\n')? + 1;
    let end_rel = source[body_start..].find(EDITABLE_END_MARKER)?;
    let end_line_start = source[..body_start + end_rel]
        .rfind('\n')
        .map(|i| i + 1)
        .unwrap_or(0)
        .max(body_start);

    let mut out = String::with_capacity(source.len() + region.len());
    out.push_str(&source[..body_start]);
    out.push_str(region);
    out.push_str(&source[end_line_start..]);
    Some(out)
}
