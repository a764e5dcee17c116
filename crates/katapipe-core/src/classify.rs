//! Engine response triage ahead of the pairing path.
//!
//! Every line read from the engine is classified before it is offered to the
//! Sorter: error responses evict all pending requests for their query,
//! ignorable responses are dropped silently, warnings are reported but still
//! paired, and everything else goes to [`Sorter::push_response`].

use crate::record::{truthy, Record, Response};
use crate::sorter::Sorter;

/// Flags marking a response the pipeline has no use for.
const IGNORABLE_FLAGS: [&str; 3] = ["action", "noResults", "isDuringSearch"];

pub fn is_error_response(response: &Response) -> bool {
    response.get("error").is_some()
}

pub fn is_warning_response(response: &Response) -> bool {
    response.get("warning").is_some()
}

/// A response is ignorable when it carries one of the ignorable flags, or
/// when no pending request corresponds to it (late arrivals after an error
/// eviction, duplicate deliveries).
pub fn is_ignorable_response(response: &Response, sorter: &Sorter) -> bool {
    let flagged = IGNORABLE_FLAGS
        .iter()
        .any(|key| response.get(key).is_some_and(truthy));
    flagged || sorter.get_request_for(response).is_none()
}

/// Handles the error / ignorable / warning classes. Returns `true` when the
/// response has been consumed and must not reach the pairing path.
pub fn handle_invalid_response(response: &Response, sorter: &mut Sorter) -> bool {
    if is_error_response(response) {
        give_up_requests_for_error(response, sorter);
        return true;
    }
    if is_ignorable_response(response, sorter) {
        return true;
    }
    if is_warning_response(response) {
        sorter.report(&format!("Got warning: {}", render(response)));
    }
    false
}

/// Evicts every pending request of the failed query and reports the failure
/// with the first evicted request for context.
fn give_up_requests_for_error(response: &Response, sorter: &mut Sorter) {
    let Some(id) = response.id().cloned() else {
        sorter.report(&format!("Error (no 'id'): {}", render(response)));
        return;
    };
    let requests = sorter.pop_requests_by_id(&id);
    let context = requests
        .first()
        .map(|req| serde_json::to_string(req).unwrap_or_default())
        .unwrap_or_else(|| "(no corresponding request)".to_string());
    sorter.report(&format!("Got error: {} for {}", render(response), context));
}

fn render(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_default()
}
