//! Interpretation of API acknowledgements.

use tracing::warn;

use crate::xml;

/// Returns `false` iff the acknowledgement carries a top-level error status.
///
/// A response without a recognizable status element is logged as a warning
/// and counted as success; the batch it acknowledges is gone either way.
pub fn parse_ack(response: &str) -> bool {
    match xml::first_tag(response, "response").and_then(|tag| xml::attr_value(tag, "status")) {
        Some("error") => false,
        Some(_) => true,
        None => {
            warn!("acknowledgement carries no recognizable status");
            true
        }
    }
}
