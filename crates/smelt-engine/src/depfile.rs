//! Makefile-style dependency records written by `cc -MD -MP -MF`.
//!
//! ```make
//! objects/src/Track.cpp.o: ../../src/Track.cpp ../../src/Track.h \
//!   ../../unix/Arduino.h
//! ../../src/Track.h:
//! ../../unix/Arduino.h:
//! ```
//!
//! Escapes: `\ ` is a literal space, `\\` a literal backslash, `\#` a literal
//! hash, `$$` a literal dollar. A backslash before a newline continues the
//! logical line. `#` starts a comment.

use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// One `targets: prerequisites` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub targets: Vec<PathBuf>,
    pub prerequisites: Vec<PathBuf>,
}

#[derive(Default)]
struct RecordBuilder {
    targets: Vec<PathBuf>,
    prerequisites: Vec<PathBuf>,
    token: String,
    after_colon: bool,
    start_line: usize,
}

impl RecordBuilder {
    fn flush_token(&mut self) {
        if self.token.is_empty() {
            return;
        }
        let path = PathBuf::from(std::mem::take(&mut self.token));
        if self.after_colon {
            self.prerequisites.push(path);
        } else {
            self.targets.push(path);
        }
    }

    fn is_blank(&self) -> bool {
        self.targets.is_empty() && self.token.is_empty() && !self.after_colon
    }
}

/// Parse the records of a dependency file.
///
/// # Errors
/// Returns `DependencyFileParse` if a logical line has no `:` separator, has
/// nothing before it, or contains a second `:`.
pub fn parse_dependency_records(
    content: &str,
    path: &Path,
) -> Result<Vec<DependencyRecord>, EngineError> {
    let fail = |line: usize, message: &str| EngineError::DependencyFileParse {
        path: path.display().to_string(),
        line,
        message: message.to_owned(),
    };

    let mut records = Vec::new();
    let mut line = 1usize;
    let mut current = RecordBuilder {
        start_line: line,
        ..RecordBuilder::default()
    };
    let mut chars = content.chars().peekable();

    loop {
        let ch = chars.next();
        match ch {
            Some('\\') => match chars.peek().copied() {
                Some('\n') => {
                    chars.next();
                    line = line.saturating_add(1);
                    current.flush_token();
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    line = line.saturating_add(1);
                    current.flush_token();
                }
                Some(escaped @ (' ' | '\\' | '#')) => {
                    chars.next();
                    current.token.push(escaped);
                }
                _ => current.token.push('\\'),
            },
            Some('$') => {
                if chars.peek() == Some(&'$') {
                    chars.next();
                }
                current.token.push('$');
            }
            Some('#') => {
                while chars.peek().is_some_and(|c| *c != '\n') {
                    chars.next();
                }
            }
            Some(':') => {
                current.flush_token();
                if current.after_colon {
                    return Err(fail(line, "unexpected second ':' in record"));
                }
                if current.targets.is_empty() {
                    return Err(fail(line, "missing target before ':'"));
                }
                current.after_colon = true;
            }
            Some(' ' | '\t' | '\r') => current.flush_token(),
            Some('\n') | None => {
                current.flush_token();
                if !current.is_blank() {
                    if !current.after_colon {
                        return Err(fail(current.start_line, "missing ':' after target list"));
                    }
                    records.push(DependencyRecord {
                        targets: std::mem::take(&mut current.targets),
                        prerequisites: std::mem::take(&mut current.prerequisites),
                    });
                }
                if ch.is_none() {
                    break;
                }
                line = line.saturating_add(1);
                current = RecordBuilder {
                    start_line: line,
                    ..RecordBuilder::default()
                };
            }
            Some(other) => current.token.push(other),
        }
    }

    Ok(records)
}

/// All prerequisites of all records, deduplicated in first-seen order.
pub fn prerequisites(records: &[DependencyRecord]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for prerequisite in records.iter().flat_map(|r| r.prerequisites.iter()) {
        if !out.contains(prerequisite) {
            out.push(prerequisite.clone());
        }
    }
    out
}

/// Read `path` and return its prerequisites, or `None` when the file is absent.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_prerequisites(path: &Path) -> Result<Option<Vec<PathBuf>>, EngineError> {
    let Some(content) = smelt_util::fs::read_to_string_if_exists(path)? else {
        return Ok(None);
    };
    let records = parse_dependency_records(&content, path)?;
    Ok(Some(prerequisites(&records)))
}
