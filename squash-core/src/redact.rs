//! Message scrubbing applied before an occurrence is persisted.

use std::path::Path;

pub const REDACTED: &str = "[REDACTED]";

/// Remove filtered strings and the user's home directory from a message.
///
/// Each filter string is replaced both verbatim and in its quoted debug form,
/// since path-carrying errors often render their argument with `{:?}`.
pub fn redact_message(message: &str, filter_strings: &[String], home: Option<&Path>) -> String {
    let mut message = message.to_string();

    for filter in filter_strings.iter().filter(|f| !f.is_empty()) {
        message = message.replace(&format!("{:?}", filter), REDACTED);
        message = message.replace(filter.as_str(), REDACTED);
    }

    if let Some(home) = home.and_then(Path::to_str).filter(|h| h.len() > 1) {
        message = message.replace(&format!("{:?}", home), "~");
        message = message.replace(home, "~");
    }

    message
}
