//! Successor stitching and join synthesis for the Joiner.

use serde_json::{json, Value};

use katapipe_core::{Fields, Pair, Record};

/// Copies lookahead data from the next turn's response onto its
/// predecessor: the successor's rootInfo, plus metric gains signed by who
/// played the move in between.
pub fn stitch_successive(prev: &mut Pair, curr: &Pair) {
    if let Some(root) = curr.response.get("rootInfo") {
        prev.response.set("nextRootInfo", root.clone());
    }
    let sign = prev
        .response
        .get("nextMoveSign")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    set_gain(prev, curr, "nextWinrateGain", "winrate", sign);
    set_gain(prev, curr, "nextScoreGain", "scoreLead", sign);
    set_gain(prev, curr, "nextMoyoGain", "moyoLead", sign);
    set_gain(prev, curr, "nextUnsettlednessGain", "unsettledness", 1.0);
}

/// Gain of a top-level metric between a pair and its successor. Only set
/// when both responses carry the metric (excess mode flattens it there).
fn set_gain(prev: &mut Pair, curr: &Pair, gain_key: &str, key: &str, sign: f64) {
    let (Some(before), Some(after)) = (
        prev.response.get(key).and_then(Value::as_f64),
        curr.response.get(key).and_then(Value::as_f64),
    ) else {
        return;
    };
    prev.response.set(gain_key, json!((after - before) * sign));
}

/// One joined response per user query: the query minus `turnNumber`, plus
/// every response of that query in delivery order.
pub fn join_pairs(pairs: Vec<Pair>) -> Fields {
    let mut joined = Fields::new();
    let Some(first) = pairs.first() else {
        return joined;
    };
    joined.insert(
        "id".to_string(),
        first.request.id().cloned().unwrap_or(Value::Null),
    );
    let mut query = first.request.fields.clone();
    query.remove("turnNumber");
    joined.insert("query".to_string(), Value::Object(query));
    joined.insert(
        "responses".to_string(),
        Value::Array(
            pairs
                .into_iter()
                .map(|pair| Value::Object(pair.response.into_fields()))
                .collect(),
        ),
    );
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use katapipe_core::{Request, Response};

    fn object(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn pair(request: Value, response: Value) -> Pair {
        Pair::new(
            Request::new(object(request)),
            Response::new(object(response)),
        )
    }

    fn approx(value: Option<&Value>, expected: f64) {
        let got = value.and_then(Value::as_f64).unwrap();
        assert!((got - expected).abs() < 1e-9, "got {got}, expected {expected}");
    }

    #[test]
    fn gains_are_signed_by_the_mover() {
        let mut prev = pair(
            json!({"id": "q", "turnNumber": 0}),
            json!({"id": "q", "turnNumber": 0, "nextMoveSign": -1,
                   "winrate": 0.4, "scoreLead": 2.0, "unsettledness": 30.0}),
        );
        let curr = pair(
            json!({"id": "q", "turnNumber": 1}),
            json!({"id": "q", "turnNumber": 1, "winrate": 0.7, "scoreLead": 1.0,
                   "unsettledness": 25.0, "rootInfo": {"winrate": 0.7}}),
        );
        stitch_successive(&mut prev, &curr);
        // White moved, so a winrate increase is a loss for the mover.
        approx(prev.response.get("nextWinrateGain"), -0.3);
        approx(prev.response.get("nextScoreGain"), 1.0);
        // Unsettledness gain is unsigned.
        approx(prev.response.get("nextUnsettlednessGain"), -5.0);
        assert_eq!(
            prev.response.get("nextRootInfo"),
            Some(&json!({"winrate": 0.7}))
        );
    }

    #[test]
    fn gains_skipped_when_metric_missing() {
        let mut prev = pair(
            json!({"id": "q", "turnNumber": 0}),
            json!({"id": "q", "turnNumber": 0, "nextMoveSign": 1}),
        );
        let curr = pair(
            json!({"id": "q", "turnNumber": 1}),
            json!({"id": "q", "turnNumber": 1, "winrate": 0.7}),
        );
        stitch_successive(&mut prev, &curr);
        assert!(prev.response.get("nextWinrateGain").is_none());
    }

    #[test]
    fn join_builds_query_and_response_list() {
        let pairs = vec![
            pair(
                json!({"id": "q", "turnNumber": 0, "analyzeTurns": [0, 1], "komi": 6.5}),
                json!({"id": "q", "turnNumber": 0}),
            ),
            pair(
                json!({"id": "q", "turnNumber": 1, "analyzeTurns": [0, 1], "komi": 6.5}),
                json!({"id": "q", "turnNumber": 1}),
            ),
        ];
        let joined = join_pairs(pairs);
        assert_eq!(joined.get("id"), Some(&json!("q")));
        let query = joined.get("query").unwrap();
        assert!(query.get("turnNumber").is_none());
        assert_eq!(query.get("komi"), Some(&json!(6.5)));
        let responses = joined.get("responses").unwrap().as_array().unwrap();
        assert_eq!(responses.len(), 2);
    }

    #[test]
    fn join_of_nothing_is_empty() {
        assert!(join_pairs(Vec::new()).is_empty());
    }
}
