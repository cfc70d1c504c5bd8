//! Signal id codec.
//!
//! Each coverage probe spliced into instrumented SQL carries a compact id
//! string as the payload of `pg_notify('pgcov', <id>)`. The id packs a
//! file path, a byte offset, a length, and an optional branch tag so the
//! listener can map a `NOTIFY` straight back to a [`crate::model::CoveragePoint`]
//! without a catalog lookup.
//!
//! The grammar is `file:startPos:length` or `file:startPos:length:branch`.
//! The file path may itself contain `:` (Windows paths), so parsing works
//! right-to-left: the trailing run of colon-separated fields is peeled
//! off for as long as each candidate parses as a non-negative integer, up
//! to three fields (`branch`, `length`, `startPos`), and whatever remains
//! — rejoined on `:` — is the file path. When the trailing four fields
//! are all numeric, the branch-carrying reading wins over one where the
//! file happens to end in a number; this is a deliberate tie-break, not
//! an oversight.

use std::fmt;

/// A decoded signal id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalId {
    pub file: String,
    pub start_pos: u32,
    pub length: u32,
    pub branch: Option<u32>,
}

/// Errors produced while parsing a signal id that came back over `NOTIFY`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalCodecError {
    #[error("signal id `{0}` has too few `:`-separated fields")]
    MissingFields(String),
    #[error("signal id `{0}` contains a non-numeric field `{1}`")]
    InvalidNumber(String, String),
    #[error("signal id `{0}` contains a negative field `{1}`")]
    Negative(String, String),
}

/// Format a [`SignalId`] as the wire string spliced into `pg_notify`.
pub fn format(file: &str, start_pos: u32, length: u32, branch: Option<u32>) -> String {
    match branch {
        Some(b) => format!("{file}:{start_pos}:{length}:{b}"),
        None => format!("{file}:{start_pos}:{length}"),
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format(&self.file, self.start_pos, self.length, self.branch))
    }
}

/// `Some(n)` if `field` is a valid non-negative decimal field, `None` if
/// it plainly isn't numeric (so the caller can try a shorter reading
/// instead), or `Err` if it looks like a deliberately-malformed number
/// (a negative sign on digits).
fn numeric_field(id: &str, field: &str) -> Result<Option<u32>, SignalCodecError> {
    if field.is_empty() {
        return Ok(None);
    }
    if let Some(stripped) = field.strip_prefix('-') {
        if !stripped.is_empty() && stripped.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SignalCodecError::Negative(id.to_string(), field.to_string()));
        }
        return Ok(None);
    }
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    field
        .parse::<u32>()
        .map(Some)
        .map_err(|_| SignalCodecError::InvalidNumber(id.to_string(), field.to_string()))
}

/// Parse a signal id received as a `NOTIFY` payload.
pub fn parse(id: &str) -> Result<SignalId, SignalCodecError> {
    let fields: Vec<&str> = id.rsplitn(4, ':').collect();
    if fields.len() < 3 {
        return Err(SignalCodecError::MissingFields(id.to_string()));
    }

    // `fields` is right-to-left: fields[0] is the last `:`-separated
    // component. Try the branch-carrying (4-field) reading first; fall
    // back to the 3-field reading if the third-from-last component isn't
    // numeric or there's no file left over.
    if fields.len() == 4 {
        if let (Some(branch), Some(length), Some(start_pos)) = (
            numeric_field(id, fields[0])?,
            numeric_field(id, fields[1])?,
            numeric_field(id, fields[2])?,
        ) {
            if !fields[3].is_empty() {
                return Ok(SignalId {
                    file: fields[3].to_string(),
                    start_pos,
                    length,
                    branch: Some(branch),
                });
            }
        }
    }

    // 3-field reading. When `rsplitn` already produced 4 fields (because
    // the file path contains a `:`), fields[2] and fields[3] both belong
    // to the file and need rejoining.
    let rejoined;
    let (last, second_last, file) = if fields.len() == 4 {
        rejoined = format!("{}:{}", fields[3], fields[2]);
        (fields[0], fields[1], rejoined.as_str())
    } else {
        (fields[0], fields[1], fields[2])
    };

    if file.is_empty() {
        return Err(SignalCodecError::MissingFields(id.to_string()));
    }
    let length = numeric_field(id, last)?.ok_or_else(|| SignalCodecError::InvalidNumber(id.to_string(), last.to_string()))?;
    let start_pos = numeric_field(id, second_last)?
        .ok_or_else(|| SignalCodecError::InvalidNumber(id.to_string(), second_last.to_string()))?;

    Ok(SignalId {
        file: file.to_string(),
        start_pos,
        length,
        branch: None,
    })
}
