//! Broker-safe resource names derived from logical queue and topic names.

/// Suffix the broker requires on every FIFO queue name
pub const FIFO_SUFFIX: &str = ".fifo";

/// Maximum length of a FIFO name before the suffix is appended
pub const MAX_FIFO_NAME_LENGTH: usize = 70;

/// Maximum length of a standard name
pub const MAX_NAME_LENGTH: usize = 75;

/// Derive a broker-safe name from a logical name.
///
/// Characters outside `[A-Za-z0-9_.-]` are removed, the result is truncated to
/// the broker limit, and FIFO names end in `.fifo` exactly once.
///
/// # Examples
///
/// ```rust
/// use courier_runtime::naming::safe_name;
///
/// assert_eq!(safe_name("order events", false), "orderevents");
/// assert_eq!(safe_name("orders", true), "orders.fifo");
/// assert_eq!(safe_name("orders.fifo", true), "orders.fifo");
/// ```
pub fn safe_name(logical_name: &str, is_fifo: bool) -> String {
    let cleaned: String = logical_name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    if is_fifo {
        let base = cleaned.strip_suffix(FIFO_SUFFIX).unwrap_or(&cleaned);
        let mut name = truncate(base, MAX_FIFO_NAME_LENGTH);
        name.push_str(FIFO_SUFFIX);
        name
    } else {
        truncate(&cleaned, MAX_NAME_LENGTH)
    }
}

// Input is ASCII after filtering, so byte and char positions agree.
fn truncate(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}

/// Namer carrying the deployment-wide resource prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceNamer {
    prefix: Option<String>,
}

impl ResourceNamer {
    /// Create namer with an optional environment prefix
    pub fn new(prefix: Option<String>) -> Self {
        let prefix = prefix.filter(|p| !p.trim().is_empty());
        Self { prefix }
    }

    /// Get configured prefix
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Broker name for a logical resource name
    pub fn safe_name(&self, logical_name: &str, is_fifo: bool) -> String {
        match &self.prefix {
            Some(prefix) => safe_name(&format!("{}{}", prefix, logical_name), is_fifo),
            None => safe_name(logical_name, is_fifo),
        }
    }
}

#[cfg(test)]
#[path = "naming_tests.rs"]
mod tests;
