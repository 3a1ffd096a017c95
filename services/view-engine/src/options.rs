//! Subscription option strings
//!
//! Options travel to the bus as one comma-separated string of flags and
//! `key=value` pairs, e.g.
//!
//! ```text
//! oof,delta,conflation=250ms,top_n=20,skip_n=40,select=[-/,+/symbol,+/bid]
//! ```
//!
//! Recognised keys are parsed into typed fields; anything else is kept
//! verbatim so it still reaches the transport.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Errors from parsing an option string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    #[error("unbalanced brackets in option string")]
    UnbalancedBrackets,

    #[error("empty option key")]
    EmptyKey,
}

/// Typed subscription options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Deliver out-of-focus notifications when a record leaves the result set.
    pub oof: bool,
    /// Ask for delta publishes carrying only changed fields.
    pub delta: bool,
    /// Conflation window requested from the bus.
    pub conflation: Option<Duration>,
    /// Maximum number of snapshot records.
    pub top_n: Option<usize>,
    /// Snapshot records to skip before `top_n` applies.
    pub skip_n: Option<usize>,
    /// Fields to project; `None` means all fields.
    pub select: Option<Vec<String>>,
    /// Unrecognised options, in original order.
    pub extra: Vec<(String, Option<String>)>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_oof(mut self) -> Self {
        self.oof = true;
        self
    }

    pub fn with_delta(mut self) -> Self {
        self.delta = true;
        self
    }

    pub fn with_conflation(mut self, window: Duration) -> Self {
        self.conflation = Some(window);
        self
    }

    pub fn with_top_n(mut self, n: usize) -> Self {
        self.top_n = Some(n);
        self
    }

    pub fn with_skip_n(mut self, n: usize) -> Self {
        self.skip_n = Some(n);
        self
    }

    /// Project the given columns: `select=[-/,+/col1,+/col2]`.
    pub fn with_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Whether a field survives the `select` projection.
    pub fn selects(&self, field: &str) -> bool {
        match &self.select {
            Some(cols) => cols.iter().any(|c| c == field),
            None => true,
        }
    }
}

impl fmt::Display for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.oof {
            parts.push("oof".to_string());
        }
        if self.delta {
            parts.push("delta".to_string());
        }
        if let Some(window) = self.conflation {
            parts.push(format!("conflation={}ms", window.as_millis()));
        }
        if let Some(n) = self.top_n {
            parts.push(format!("top_n={}", n));
        }
        if let Some(n) = self.skip_n {
            parts.push(format!("skip_n={}", n));
        }
        for (key, value) in &self.extra {
            match value {
                Some(v) => parts.push(format!("{}={}", key, v)),
                None => parts.push(key.clone()),
            }
        }
        if let Some(cols) = &self.select {
            let mut select = String::from("select=[-/");
            for col in cols {
                select.push_str(",+/");
                select.push_str(col);
            }
            select.push(']');
            parts.push(select);
        }
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for SubscriptionOptions {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = SubscriptionOptions::default();

        for item in split_top_level(s)? {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (key, value) = match item.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (item, None),
            };
            if key.is_empty() {
                return Err(OptionsError::EmptyKey);
            }

            match (key, value) {
                ("oof", None) => options.oof = true,
                ("delta", None) => options.delta = true,
                ("conflation", Some(v)) => options.conflation = Some(parse_duration(key, v)?),
                ("top_n", Some(v)) => options.top_n = Some(parse_count(key, v)?),
                ("skip_n", Some(v)) => options.skip_n = Some(parse_count(key, v)?),
                ("select", Some(v)) => options.select = Some(parse_select(v)?),
                (k, v) => options.extra.push((k.to_string(), v.map(str::to_string))),
            }
        }

        Ok(options)
    }
}

/// Split on commas that are not inside `[...]`.
fn split_top_level(s: &str) -> Result<Vec<&str>, OptionsError> {
    let mut parts = Vec::new();
    let mut depth: usize = 0;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1).ok_or(OptionsError::UnbalancedBrackets)?;
            }
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(OptionsError::UnbalancedBrackets);
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn parse_count(key: &str, value: &str) -> Result<usize, OptionsError> {
    value.parse().map_err(|_| OptionsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Durations accept `ms`, `s` and `m` suffixes; a bare number is milliseconds.
fn parse_duration(key: &str, value: &str) -> Result<Duration, OptionsError> {
    let invalid = || OptionsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    let (digits, unit_ms) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000)
    } else {
        (value, 1)
    };

    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    n.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

/// `[-/,+/a,+/b]` → `["a", "b"]`. Only the include-list form is supported.
fn parse_select(value: &str) -> Result<Vec<String>, OptionsError> {
    let invalid = || OptionsError::InvalidValue {
        key: "select".to_string(),
        value: value.to_string(),
    };

    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(invalid)?;

    let mut columns = Vec::new();
    for entry in inner.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if entry == "-/" {
            continue;
        }
        match entry.strip_prefix("+/") {
            Some(col) if !col.is_empty() => columns.push(col.to_string()),
            _ => return Err(invalid()),
        }
    }
    Ok(columns)
}
