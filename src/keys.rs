//! Key-injection requests: parsing, limits, and the key-name grammar.
//!
//! Validation is all-or-nothing: a request is fully checked before any step
//! reaches tmux, so an invalid request has zero side effects. Execution is
//! ordered but not transactional -- tmux `send-keys` has no rollback -- so a
//! mid-sequence failure leaves earlier steps applied.

use serde::{Deserialize, Serialize};

/// Maximum number of keys/steps in a single request.
pub const MAX_STEPS: usize = 100;
/// Maximum length of a key name (e.g. "C-c", "Enter").
pub const MAX_KEY_NAME_LEN: usize = 32;
/// Maximum length of a single text step.
pub const MAX_TEXT_STEP_LEN: usize = 4096;
/// Maximum total text length across all steps.
pub const MAX_TOTAL_TEXT_LEN: usize = 16384;
/// Maximum request body size for the keys endpoint.
pub const MAX_REQUEST_BYTES: usize = 32 * 1024;

/// A single step in a key sequence. `type` is "key" or "text"; unknown types
/// are rejected during validation so the error can name the offending step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStep {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// Request body for `POST /api/sessions/{id}/keys`.
///
/// `keys` is syntactic sugar for a sequence of key-typed steps; `sequence`
/// takes precedence when both are present. Unknown top-level fields are
/// rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysRequest {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub sequence: Vec<KeyStep>,
}

/// A validated step, ready for execution against tmux.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Passed to `send-keys` as a key name.
    Key(String),
    /// Passed to `send-keys -l` so tmux takes it literally.
    Text(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeysError {
    #[error("no keys or sequence provided")]
    Empty,
    #[error("too many steps: {0} (max {MAX_STEPS})")]
    TooManySteps(usize),
    #[error("invalid key name at step {0}: {1:?}")]
    InvalidKeyName(usize, String),
    #[error("text too long at step {0}: {1} bytes (max {MAX_TEXT_STEP_LEN})")]
    TextTooLong(usize, usize),
    #[error("total text length exceeds limit: {0} bytes (max {MAX_TOTAL_TEXT_LEN})")]
    TotalTextTooLong(usize),
    #[error("invalid step type at step {0}: {1:?}")]
    InvalidStepType(usize, String),
}

/// Fixed allow-list of special key names tmux understands.
const SPECIAL_KEYS: &[&str] = &[
    "Enter", "Tab", "BTab", "Space", "BSpace", "Escape", "DC", "IC", "Up", "Down", "Left",
    "Right", "Home", "End", "PPage", "NPage", "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8",
    "F9", "F10", "F11", "F12",
];

/// Checks a key name against the grammar: known control chords (`C-a`..`C-z`
/// plus `C-\ C-] C-^ C-_ C-@ C-[`), meta chords (`M-a`..`M-z`), the special
/// keys, any single printable ASCII character, or -- as a permissive
/// fallback for combinations like `C-M-x` or `S-F1` -- any string over
/// alphanumerics and `-_[]\^@`.
pub fn is_valid_key_name(key: &str) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_NAME_LEN {
        return false;
    }

    if let Some(rest) = key.strip_prefix("C-") {
        let bytes = rest.as_bytes();
        if bytes.len() == 1
            && (bytes[0].is_ascii_lowercase() || matches!(bytes[0], b'\\' | b']' | b'^' | b'_' | b'@' | b'['))
        {
            return true;
        }
    }
    if let Some(rest) = key.strip_prefix("M-") {
        let bytes = rest.as_bytes();
        if bytes.len() == 1 && bytes[0].is_ascii_lowercase() {
            return true;
        }
    }
    if SPECIAL_KEYS.contains(&key) {
        return true;
    }

    // Single printable ASCII character (direct key input).
    let bytes = key.as_bytes();
    if bytes.len() == 1 && (0x20..=0x7e).contains(&bytes[0]) {
        return true;
    }

    // Fallback pattern: alphanumerics plus a constrained set of punctuation.
    // Shell metacharacters never pass.
    key.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'[' | b']' | b'\\' | b'^' | b'@'))
}

/// Validate a request and produce the ordered execution plan.
///
/// All limits are checked before the first step is returned; callers only
/// execute plans this function has blessed.
pub fn plan(req: &KeysRequest) -> Result<Vec<Step>, KeysError> {
    let raw: Vec<KeyStep> = if !req.sequence.is_empty() {
        req.sequence.clone()
    } else if !req.keys.is_empty() {
        req.keys
            .iter()
            .map(|k| KeyStep {
                kind: "key".to_string(),
                value: k.clone(),
            })
            .collect()
    } else {
        return Err(KeysError::Empty);
    };

    if raw.len() > MAX_STEPS {
        return Err(KeysError::TooManySteps(raw.len()));
    }

    let mut total_text = 0usize;
    let mut steps = Vec::with_capacity(raw.len());
    for (i, step) in raw.iter().enumerate() {
        match step.kind.as_str() {
            "key" => {
                if !is_valid_key_name(&step.value) {
                    return Err(KeysError::InvalidKeyName(i, step.value.clone()));
                }
                steps.push(Step::Key(step.value.clone()));
            }
            "text" => {
                if step.value.len() > MAX_TEXT_STEP_LEN {
                    return Err(KeysError::TextTooLong(i, step.value.len()));
                }
                total_text += step.value.len();
                if total_text > MAX_TOTAL_TEXT_LEN {
                    return Err(KeysError::TotalTextTooLong(total_text));
                }
                // Empty text steps are valid but have nothing to send.
                if !step.value.is_empty() {
                    steps.push(Step::Text(step.value.clone()));
                }
            }
            other => return Err(KeysError::InvalidStepType(i, other.to_string())),
        }
    }
    Ok(steps)
}
