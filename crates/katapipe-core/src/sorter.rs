//! Request/response pools, correspondence and admission backpressure.

use serde_json::Value;

use crate::joiner::Joiner;
use crate::record::{Fields, Pair, Record, Request, Response};

/// Equality predicate deciding whether a request answers a response.
/// Injected so tests can substitute their own; the pipeline uses
/// [`crate::record::same_by`] on `(id, turnNumber)`.
pub type CorrespondFn = Box<dyn Fn(&Fields, &Fields) -> bool + Send>;

/// Side channel for unmatched/warning messages. Per-record problems are
/// reported here and never raised to callers.
pub type ReportFn = Box<dyn FnMut(&str) + Send>;

#[derive(Debug, Clone, Copy)]
pub struct SorterConfig {
    /// Extract pairs in request-arrival order instead of response-arrival
    /// order.
    pub sort: bool,
    /// Admission ceiling for pending requests; `None` is unlimited.
    pub max_requests: Option<usize>,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            sort: true,
            max_requests: Some(1000),
        }
    }
}

/// Snapshot of pipeline occupancy, used for progress reporting.
///
/// `pushed` is the lifetime total: every admitted request is in exactly one
/// of the four states at any moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    /// Requests whose response has not arrived yet.
    pub waiting: usize,
    /// Responses pooled ahead of their turn (sorted mode holds them back).
    pub pooled: usize,
    /// Matched pairs buffered in the Joiner.
    pub to_join: usize,
    /// Pairs that have left the Joiner.
    pub popped: usize,
    /// Sum of the above.
    pub pushed: usize,
}

pub struct Sorter {
    sort: bool,
    max_requests: Option<usize>,
    corresponding: CorrespondFn,
    error_reporter: ReportFn,
    req_pool: Vec<Request>,
    res_pool: Vec<Response>,
    joiner: Joiner,
}

impl Sorter {
    pub fn new(
        config: SorterConfig,
        corresponding: CorrespondFn,
        error_reporter: ReportFn,
        joiner: Joiner,
    ) -> Self {
        Self {
            sort: config.sort,
            max_requests: config.max_requests,
            corresponding,
            error_reporter,
            req_pool: Vec::new(),
            res_pool: Vec::new(),
            joiner,
        }
    }

    pub fn has_requests(&self) -> bool {
        !self.req_pool.is_empty()
    }

    /// True while the pending-request count is below the admission ceiling.
    pub fn has_room(&self) -> bool {
        self.max_requests
            .map_or(true, |max| self.req_pool.len() < max)
    }

    pub fn count(&self) -> Counts {
        let requests = self.req_pool.len();
        let pooled = self.res_pool.len();
        let waiting = requests.saturating_sub(pooled);
        let (to_join, popped) = self.joiner.count();
        Counts {
            waiting,
            pooled,
            to_join,
            popped,
            pushed: waiting + pooled + to_join + popped,
        }
    }

    /// Appends requests in order. No pair extraction happens here; callers
    /// gate admission with [`Sorter::has_room`].
    pub fn push_requests(&mut self, requests: Vec<Request>) {
        self.req_pool.extend(requests);
    }

    /// Appends a response and returns every pair that became extractable.
    pub fn push_response(&mut self, response: Response) -> Vec<Pair> {
        self.res_pool.push(response);
        self.pop_matched_pairs()
    }

    /// Hands matched pairs over to the Joiner, returning whatever it emits.
    pub fn push_pairs_to_joiner(&mut self, pairs: Vec<Pair>) -> Vec<Fields> {
        self.joiner.push_pairs(pairs)
    }

    /// First pending request answering `response`, without removal.
    pub fn get_request_for(&self, response: &Response) -> Option<&Request> {
        self.req_pool
            .iter()
            .find(|req| (self.corresponding)(&req.fields, &response.fields))
    }

    /// Removes and returns every pending request with the given id,
    /// preserving insertion order. Used when the engine reports an error for
    /// a whole query.
    pub fn pop_requests_by_id(&mut self, id: &Value) -> Vec<Request> {
        let (popped, kept): (Vec<Request>, Vec<Request>) = std::mem::take(&mut self.req_pool)
            .into_iter()
            .partition(|req| req.id() == Some(id));
        self.req_pool = kept;
        popped
    }

    /// Reports a message on the injected side channel.
    pub fn report(&mut self, message: &str) {
        (self.error_reporter)(message);
    }

    /// Serialises the pending request pool as newline-delimited JSON.
    pub fn dump_requests(&self) -> serde_json::Result<String> {
        let mut dumped = String::new();
        for req in &self.req_pool {
            dumped.push_str(&serde_json::to_string(req)?);
            dumped.push('\n');
        }
        Ok(dumped)
    }

    /// Replaces the pending request pool with a previously dumped one.
    pub fn undump_requests(&mut self, dumped: &str) -> serde_json::Result<()> {
        let mut pool = Vec::new();
        for line in dumped.lines().filter(|l| !l.trim().is_empty()) {
            pool.push(serde_json::from_str::<Request>(line)?);
        }
        self.req_pool = pool;
        Ok(())
    }

    // available request-response pairs

    fn pop_matched_pairs(&mut self) -> Vec<Pair> {
        let candidates = if self.sort {
            self.sorted_candidates()
        } else {
            self.arrival_candidates()
        };

        let mut req_slots: Vec<Option<Request>> = std::mem::take(&mut self.req_pool)
            .into_iter()
            .map(Some)
            .collect();
        let mut res_slots: Vec<Option<Response>> = std::mem::take(&mut self.res_pool)
            .into_iter()
            .map(Some)
            .collect();

        let mut pairs = Vec::with_capacity(candidates.len());
        for (req_idx, res_idx) in candidates {
            let request = req_idx.and_then(|i| req_slots[i].take());
            let Some(response) = res_slots[res_idx].take() else {
                continue;
            };
            match request {
                Some(request) => pairs.push(Pair::new(request, response)),
                // A response without a current request slipped past
                // classification; report and drop it.
                None => {
                    let text = serde_json::to_string(&response).unwrap_or_default();
                    (self.error_reporter)(&format!("Unmatched: request=none response={text}"));
                }
            }
        }

        self.req_pool = req_slots.into_iter().flatten().collect();
        self.res_pool = res_slots.into_iter().flatten().collect();
        pairs
    }

    /// Pair every pooled response with the first matching request. Responses
    /// with no current request become invalid candidates.
    fn arrival_candidates(&self) -> Vec<(Option<usize>, usize)> {
        let mut claimed = vec![false; self.req_pool.len()];
        self.res_pool
            .iter()
            .enumerate()
            .map(|(res_idx, res)| {
                let req_idx = (0..self.req_pool.len()).find(|&i| {
                    !claimed[i] && (self.corresponding)(&self.req_pool[i].fields, &res.fields)
                });
                if let Some(i) = req_idx {
                    claimed[i] = true;
                }
                (req_idx, res_idx)
            })
            .collect()
    }

    /// Walk the request pool in order, stopping at the first request whose
    /// response has not arrived. Yields one contiguous prefix per push.
    fn sorted_candidates(&self) -> Vec<(Option<usize>, usize)> {
        let mut claimed = vec![false; self.res_pool.len()];
        let mut candidates = Vec::new();
        for (req_idx, req) in self.req_pool.iter().enumerate() {
            let res_idx = (0..self.res_pool.len()).find(|&i| {
                !claimed[i] && (self.corresponding)(&self.res_pool[i].fields, &req.fields)
            });
            match res_idx {
                Some(i) => {
                    claimed[i] = true;
                    candidates.push((Some(req_idx), i));
                }
                // Corresponding response not received yet.
                None => break,
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::same_by;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn request(id: &str, turn: i64) -> Request {
        let Value::Object(fields) = json!({"id": id, "turnNumber": turn}) else {
            unreachable!()
        };
        Request::new(fields)
    }

    fn response(id: &str, turn: i64) -> Response {
        let Value::Object(fields) = json!({"id": id, "turnNumber": turn}) else {
            unreachable!()
        };
        Response::new(fields)
    }

    fn sorter(sort: bool, max_requests: Option<usize>) -> (Sorter, Arc<Mutex<Vec<String>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let sorter = Sorter::new(
            SorterConfig { sort, max_requests },
            Box::new(same_by(&["id", "turnNumber"])),
            Box::new(move |msg| sink.lock().unwrap().push(msg.to_string())),
            Joiner::passthrough(),
        );
        (sorter, reports)
    }

    fn pair_turns(pairs: &[Pair]) -> Vec<i64> {
        pairs
            .iter()
            .filter_map(|p| p.response.turn_number())
            .collect()
    }

    #[test]
    fn sorted_mode_emits_contiguous_prefix_in_request_order() {
        let (mut sorter, _) = sorter(true, None);
        sorter.push_requests(vec![request("a", 0), request("a", 1), request("a", 2)]);

        assert!(sorter.push_response(response("a", 1)).is_empty());
        assert!(sorter.push_response(response("a", 2)).is_empty());

        // Turn 0 unblocks the whole prefix.
        let pairs = sorter.push_response(response("a", 0));
        assert_eq!(pair_turns(&pairs), vec![0, 1, 2]);
        assert!(!sorter.has_requests());
    }

    #[test]
    fn arrival_mode_emits_in_response_order() {
        let (mut sorter, _) = sorter(false, None);
        sorter.push_requests(vec![request("a", 0), request("a", 1), request("a", 2)]);

        assert_eq!(pair_turns(&sorter.push_response(response("a", 1))), vec![1]);
        assert_eq!(pair_turns(&sorter.push_response(response("a", 0))), vec![0]);
        assert_eq!(pair_turns(&sorter.push_response(response("a", 2))), vec![2]);
    }

    #[test]
    fn arrival_mode_reports_unmatched_responses() {
        let (mut sorter, reports) = sorter(false, None);
        sorter.push_requests(vec![request("a", 0)]);

        let pairs = sorter.push_response(response("zzz", 9));
        assert!(pairs.is_empty());
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("Unmatched:"), "{}", reports[0]);
    }

    #[test]
    fn first_matching_request_wins() {
        let (mut sorter, _) = sorter(false, None);
        // Two requests under the same key; the earlier one must pair first.
        let mut first = request("a", 0);
        first.set("marker", json!("first"));
        let mut second = request("a", 0);
        second.set("marker", json!("second"));
        sorter.push_requests(vec![first, second]);

        let pairs = sorter.push_response(response("a", 0));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].request.get("marker"), Some(&json!("first")));
        assert!(sorter.has_requests());
    }

    #[test]
    fn pop_requests_by_id_evicts_all_turns_in_order() {
        let (mut sorter, _) = sorter(true, None);
        sorter.push_requests(vec![
            request("a", 0),
            request("b", 0),
            request("a", 1),
            request("a", 2),
        ]);

        let popped = sorter.pop_requests_by_id(&json!("a"));
        assert_eq!(pair_turns_of_requests(&popped), vec![0, 1, 2]);
        assert!(sorter.has_requests());
        assert_eq!(sorter.count().waiting, 1);

        // Subsequent traffic for other ids is unaffected.
        let pairs = sorter.push_response(response("b", 0));
        assert_eq!(pair_turns(&pairs), vec![0]);
    }

    fn pair_turns_of_requests(requests: &[Request]) -> Vec<i64> {
        requests.iter().filter_map(|r| r.turn_number()).collect()
    }

    #[test]
    fn admission_ceiling_bounds_room() {
        let (mut sorter, _) = sorter(true, Some(2));
        assert!(sorter.has_room());
        sorter.push_requests(vec![request("a", 0), request("a", 1)]);
        assert!(!sorter.has_room());

        let popped = sorter.push_response(response("a", 0));
        assert_eq!(popped.len(), 1);
        assert!(sorter.has_room());
    }

    #[test]
    fn unlimited_room_when_no_ceiling() {
        let (mut sorter, _) = sorter(true, None);
        sorter.push_requests((0..5000i64).map(|t| request("a", t)).collect());
        assert!(sorter.has_room());
    }

    #[test]
    fn counts_track_lifecycle() {
        let (mut sorter, _) = sorter(true, None);
        sorter.push_requests(vec![request("a", 0), request("a", 1)]);
        assert_eq!(sorter.count().waiting, 2);

        // Out-of-order response pools without matching.
        sorter.push_response(response("a", 1));
        let counts = sorter.count();
        assert_eq!((counts.waiting, counts.pooled), (1, 1));
        assert_eq!(counts.pushed, 2);

        let pairs = sorter.push_response(response("a", 0));
        sorter.push_pairs_to_joiner(pairs);
        let counts = sorter.count();
        assert_eq!((counts.waiting, counts.pooled, counts.to_join), (0, 0, 0));
        assert_eq!(counts.popped, 2);
        assert_eq!(counts.pushed, 2);
    }

    #[test]
    fn get_request_for_finds_without_removal() {
        let (mut sorter, _) = sorter(true, None);
        sorter.push_requests(vec![request("a", 0)]);
        assert!(sorter.get_request_for(&response("a", 0)).is_some());
        assert!(sorter.get_request_for(&response("a", 1)).is_none());
        assert!(sorter.has_requests());
    }

    #[test]
    fn dump_round_trips_the_request_pool() {
        let (mut sorter, _) = sorter(true, None);
        sorter.push_requests(vec![request("a", 0), request("b", 3)]);

        let dumped = sorter.dump_requests().unwrap();
        assert_eq!(dumped.lines().count(), 2);

        let (mut restored, _) = self::sorter(true, None);
        restored.undump_requests(&dumped).unwrap();
        assert_eq!(restored.dump_requests().unwrap(), dumped);
        assert_eq!(restored.count().waiting, 2);
    }

    #[test]
    fn undump_replaces_the_pool() {
        let (mut sorter, _) = sorter(true, None);
        sorter.push_requests(vec![request("old", 0)]);
        sorter.undump_requests("{\"id\":\"new\",\"turnNumber\":7}\n").unwrap();
        assert!(sorter.get_request_for(&response("new", 7)).is_some());
        assert!(sorter.get_request_for(&response("old", 0)).is_none());
    }

    #[test]
    fn undump_rejects_malformed_lines() {
        let (mut sorter, _) = sorter(true, None);
        assert!(sorter.undump_requests("not json\n").is_err());
    }
}
