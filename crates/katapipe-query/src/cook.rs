//! Query cooking — user query lines into engine queries and per-turn
//! requests.

use std::fs;
use std::io::Read;

use flate2::read::GzDecoder;
use serde_json::{json, Value};

use katapipe_core::{merge_fields, truthy, Fields, Request};

use crate::id::IdGenerator;
use crate::sgf;

/// Shorthand fields accepted in user queries and their engine spellings.
const FIELD_ALIASES: [(&str, &str); 5] = [
    ("from", "analyzeTurnsFrom"),
    ("to", "analyzeTurnsTo"),
    ("every", "analyzeTurnsEvery"),
    ("last", "analyzeLastTurn"),
    ("visits", "maxVisits"),
];

/// KataGo rules names, each with its accepted synonyms.
const RULES_TABLE: &[&[&str]] = &[
    &["tromp-taylor"],
    &["chinese", "cn"],
    &["chinese-ogs"],
    &["chinese-kgs"],
    &["japanese", "jp"],
    &["korean", "kr"],
    &["stone-scoring"],
    &["aga"],
    &["bga"],
    &["new-zealand", "nz"],
    &["aga-button"],
];

const REQUIRED_KEYS: [&str; 5] = ["id", "moves", "rules", "boardXSize", "boardYSize"];

#[derive(Debug, Clone, Copy, Default)]
pub struct CookerConfig {
    /// Requests carry the extra SGF fields (`sgfProp`, raw `sgf`) so
    /// enrichment can fold them into responses.
    pub include_extra: bool,
    /// Queries without `analyzeTurns` analyze only the final position.
    pub only_last: bool,
    /// Reject `sgfFile` in queries.
    pub disable_sgf_file: bool,
}

/// Cooks one user query into an engine-bound query plus the per-turn
/// requests the sorter tracks.
pub struct QueryCooker {
    config: CookerConfig,
    defaults: Fields,
    overrides: Fields,
    ids: IdGenerator,
}

#[derive(Debug, Default)]
pub struct CookedLine {
    /// Engine-bound query objects, one output line each.
    pub engine_queries: Vec<Fields>,
    /// Per-turn requests for the sorter pool.
    pub requests: Vec<Request>,
}

impl QueryCooker {
    pub fn new(config: CookerConfig, defaults: Fields, overrides: Fields) -> Self {
        Self {
            config,
            defaults,
            overrides,
            ids: IdGenerator::new(),
        }
    }

    /// Swaps the active override set; used when an override list replays
    /// every input line under several settings.
    pub fn set_overrides(&mut self, overrides: Fields) {
        self.overrides = overrides;
    }

    pub fn cook_line(&mut self, line: &str, report: &mut dyn FnMut(&str)) -> CookedLine {
        let query = query_from_line(line.trim(), report);
        self.cook_query(query, report)
    }

    pub fn cook_query(&mut self, original: Fields, report: &mut dyn FnMut(&str)) -> CookedLine {
        let query = merge_fields(&[&self.defaults, &original, &self.overrides]);

        // rules/komi overrides win again after SGF parsing fills them in.
        let mut override_after_sgf = Fields::new();
        for key in ["rules", "komi"] {
            if let Some(value) = self.overrides.get(key) {
                override_after_sgf.insert(key.to_string(), value.clone());
            }
        }

        let (engine_query, extra, skip) =
            self.cook_engine_query(query.clone(), &override_after_sgf, report);
        if let Some(problem) = skip.or_else(|| check_error_in_query(&engine_query)) {
            report(&format!(
                "{} in {} (from {})",
                problem,
                render(&engine_query),
                render(&query)
            ));
            return CookedLine::default();
        }

        let additional = if self.config.include_extra {
            extra
        } else {
            Fields::new()
        };
        let requests = expand_query_turns(&merge_fields(&[&query, &engine_query, &additional]));
        CookedLine {
            engine_queries: vec![engine_query],
            requests,
        }
    }

    /// The engine-side view of the query. Returns the cooked query, the
    /// extra fields (SGF passthrough) and a skip reason when the query must
    /// be dropped.
    fn cook_engine_query(
        &mut self,
        mut query: Fields,
        override_after_sgf: &Fields,
        report: &mut dyn FnMut(&str),
    ) -> (Fields, Fields, Option<String>) {
        self.add_id(&mut query);
        let mut skip = self.cook_sgf_file(&mut query, report);
        let extra = match cook_sgf(&mut query) {
            Ok(extra) => extra,
            Err(reason) => {
                skip = skip.or(Some(reason));
                Fields::new()
            }
        };
        for (key, value) in override_after_sgf {
            query.insert(key.clone(), value.clone());
        }

        if !has_valid_moves(&query) {
            return (query, extra, skip);
        }

        cook_alias(&mut query);
        cook_analyze_turns_every(&mut query);
        // The joiner needs analyzeTurns on every request.
        fix_analyze_turns(&mut query, self.config.only_last);
        upcase_moves(&mut query);
        if query.remove("reportDuringSearchEvery").is_some() {
            report("\"reportDuringSearchEvery\" is unsupported.");
        }
        cook_include_unsettledness(&mut query);
        fix_rules(&mut query);
        guess_rules_etc(&mut query);
        (query, extra, skip)
    }

    fn add_id(&mut self, query: &mut Fields) {
        if !query.contains_key("id") {
            query.insert("id".to_string(), Value::String(self.ids.next_id()));
        }
    }

    fn cook_sgf_file(&self, query: &mut Fields, report: &mut dyn FnMut(&str)) -> Option<String> {
        let value = query.remove("sgfFile")?;
        let Some(path) = value.as_str() else {
            return Some(format!("Invalid sgfFile value: {value}"));
        };
        if self.config.disable_sgf_file {
            report(&format!(
                "sgfFile is disabled by the option --disable-sgf-file: {path}"
            ));
            return None;
        }
        match read_sgf_file(path) {
            Ok(text) => {
                query.insert("sgf".to_string(), Value::String(text));
                None
            }
            Err(reason) => Some(reason),
        }
    }
}

fn read_sgf_file(path: &str) -> Result<String, String> {
    let raw = fs::read(path).map_err(|_| format!("Failed to open SGF file: {path}"))?;
    let bytes = if path.ends_with("gz") {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|_| format!("Failed to read SGF file: {path}"))?;
        decoded
    } else {
        raw
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parses `sgf` out of the query, overriding the query's own geometry and
/// moves. Returns the extra passthrough fields.
fn cook_sgf(query: &mut Fields) -> Result<Fields, String> {
    let Some(value) = query.remove("sgf") else {
        return Ok(Fields::new());
    };
    let Some(text) = value.as_str() else {
        return Err(format!("Failed to parse SGF text: {value}"));
    };
    let game = sgf::parse(text).map_err(|_| format!("Failed to parse SGF text: {text}"))?;

    let moves: Vec<Value> = game
        .moves
        .iter()
        .map(|(player, mv)| json!([player, mv]))
        .collect();
    query.insert("moves".to_string(), Value::Array(moves));
    query.insert("boardXSize".to_string(), json!(game.board_x_size));
    query.insert("boardYSize".to_string(), json!(game.board_y_size));
    query.insert("initialPlayer".to_string(), json!(game.initial_player));
    if !game.initial_stones.is_empty() {
        let stones: Vec<Value> = game
            .initial_stones
            .iter()
            .map(|(player, mv)| json!([player, mv]))
            .collect();
        query.insert("initialStones".to_string(), Value::Array(stones));
    }
    if let Some(komi) = game.komi {
        query.insert("komi".to_string(), json!(komi));
    }
    if let Some(rules) = game.rules {
        query.insert("rules".to_string(), Value::String(rules));
    }

    let mut props = Fields::new();
    for (ident, values) in &game.root_properties {
        props.insert(ident.clone(), json!(values));
    }
    let mut extra = Fields::new();
    extra.insert("sgfProp".to_string(), Value::Object(props));
    extra.insert("sgf".to_string(), Value::String(text.to_string()));
    Ok(extra)
}

fn cook_alias(query: &mut Fields) {
    for (alias, original) in FIELD_ALIASES {
        if let Some(value) = query.remove(alias) {
            query.insert(original.to_string(), value);
        }
    }
}

fn cook_analyze_turns_every(query: &mut Fields) {
    let every = query.remove("analyzeTurnsEvery").as_ref().and_then(Value::as_i64);
    let from = query.remove("analyzeTurnsFrom").as_ref().and_then(Value::as_i64);
    let to = query.remove("analyzeTurnsTo").as_ref().and_then(Value::as_i64);
    let engaged = [every, from, to].iter().any(|v| v.is_some_and(|n| n != 0));
    if !engaged {
        return;
    }
    let n = moves_len(query) as i64;
    let start = from.unwrap_or(0);
    let stop = to.unwrap_or(n);
    let step = every.unwrap_or(1);
    let turns = stepped_range(start, stop + 1, step);
    query.insert("analyzeTurns".to_string(), json!(turns));
}

/// Half-open integer range with a signed step. A negative step counts down;
/// a step that cannot reach the stop yields nothing, so a degenerate
/// from/to/every combination requests no turns here (and falls back to the
/// default turn set later).
fn stepped_range(start: i64, stop: i64, step: i64) -> Vec<i64> {
    let mut turns = Vec::new();
    let mut turn = start;
    if step > 0 {
        while turn < stop {
            turns.push(turn);
            turn += step;
        }
    } else if step < 0 {
        while turn > stop {
            turns.push(turn);
            turn += step;
        }
    }
    turns
}

fn fix_analyze_turns(query: &mut Fields, only_last: bool) {
    let n = moves_len(query) as i64;
    let given: Vec<i64> = query
        .get("analyzeTurns")
        .and_then(Value::as_array)
        .map(|turns| turns.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    let wants_last = query
        .remove("analyzeLastTurn")
        .is_some_and(|v| truthy(&v));

    let turns: Vec<i64> = if wants_last {
        append_if_missing(given, n)
    } else if !given.is_empty() {
        given
    } else if only_last {
        vec![n]
    } else {
        (0..=n).collect()
    };
    let turns: Vec<i64> = turns.into_iter().filter(|t| (0..=n).contains(t)).collect();
    query.insert("analyzeTurns".to_string(), json!(turns));
}

fn append_if_missing(mut turns: Vec<i64>, turn: i64) -> Vec<i64> {
    if !turns.contains(&turn) {
        turns.push(turn);
    }
    turns
}

fn upcase_moves(query: &mut Fields) {
    if let Some(Value::Array(moves)) = query.get_mut("moves") {
        for entry in moves.iter_mut() {
            if let Value::Array(parts) = entry {
                for part in parts.iter_mut() {
                    if let Value::String(s) = part {
                        *s = s.to_uppercase();
                    }
                }
            }
        }
    }
}

/// Unsettledness is computed wrapper-side from ownership, so the engine
/// only sees `includeOwnership`.
fn cook_include_unsettledness(query: &mut Fields) {
    let wanted = query
        .remove("includeUnsettledness")
        .is_some_and(|v| truthy(&v));
    if wanted {
        query.insert("includeOwnership".to_string(), Value::Bool(true));
    }
}

fn fix_rules(query: &mut Fields) {
    let Some(rules) = query.get("rules").and_then(Value::as_str) else {
        return;
    };
    let lower = rules.to_lowercase();
    match RULES_TABLE.iter().find(|row| row.contains(&lower.as_str())) {
        Some(row) => {
            query.insert("rules".to_string(), json!(row[0]));
        }
        // Unknown name: drop it and let the guess fill it back in.
        None => {
            query.remove("rules");
        }
    }
}

fn guess_rules_etc(query: &mut Fields) {
    let komi = query.get("komi").and_then(Value::as_f64);
    let x_size = query.get("boardXSize").and_then(Value::as_i64);
    let y_size = query.get("boardYSize").and_then(Value::as_i64);
    if query.get("rules").is_none() {
        let rules = if komi.is_none() || komi == Some(7.5) {
            "chinese"
        } else {
            "japanese"
        };
        query.insert("rules".to_string(), json!(rules));
    }
    if x_size.is_none() {
        query.insert("boardXSize".to_string(), json!(nonzero(y_size).unwrap_or(19)));
    }
    if y_size.is_none() {
        query.insert("boardYSize".to_string(), json!(nonzero(x_size).unwrap_or(19)));
    }
}

/// A zero board size counts as unset when borrowing the sibling dimension.
fn nonzero(size: Option<i64>) -> Option<i64> {
    size.filter(|n| *n != 0)
}

fn has_valid_moves(query: &Fields) -> bool {
    query
        .get("moves")
        .and_then(Value::as_array)
        .is_some_and(|moves| !moves.is_empty())
}

fn check_error_in_query(query: &Fields) -> Option<String> {
    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| query.get(*key).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Some(format!("Missing keys {missing:?}"));
    }
    if !has_valid_moves(query) {
        return Some("Invalid moves field".to_string());
    }
    None
}

fn moves_len(query: &Fields) -> usize {
    query
        .get("moves")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// One request per analyzeTurns element, each the full query plus
/// `turnNumber`.
fn expand_query_turns(query: &Fields) -> Vec<Request> {
    let turns: Vec<i64> = query
        .get("analyzeTurns")
        .and_then(Value::as_array)
        .map(|turns| turns.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    turns
        .into_iter()
        .map(|turn| {
            let mut fields = query.clone();
            fields.insert("turnNumber".to_string(), json!(turn));
            Request::new(fields)
        })
        .collect()
}

/// A stdin line is JSON, an inline SGF record, or a path to an SGF file.
pub fn query_from_line(line: &str, report: &mut dyn FnMut(&str)) -> Fields {
    if line.starts_with('{') {
        return parse_json_lenient(line, report);
    }
    let key = if line.starts_with("(;") { "sgf" } else { "sgfFile" };
    let mut query = Fields::new();
    query.insert(key.to_string(), Value::String(line.to_string()));
    query
}

/// Malformed JSON is reported and replaced with an empty query.
pub fn parse_json_lenient(text: &str, report: &mut dyn FnMut(&str)) -> Fields {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        _ => {
            report(&format!("Invalid JSON '{text}' is replaced with '{{}}'"));
            Fields::new()
        }
    }
}

fn render(fields: &Fields) -> String {
    serde_json::to_string(fields).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use katapipe_core::Record;
    use std::io::Write;

    fn object(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn cooker() -> QueryCooker {
        QueryCooker::new(CookerConfig::default(), Fields::new(), Fields::new())
    }

    fn cook(cooker: &mut QueryCooker, line: &str) -> (CookedLine, Vec<String>) {
        let mut reports = Vec::new();
        let cooked = cooker.cook_line(line, &mut |msg| reports.push(msg.to_string()));
        (cooked, reports)
    }

    #[test]
    fn json_query_expands_one_request_per_turn() {
        let mut cooker = cooker();
        let line = r#"{"moves": [["B","Q16"],["W","D4"]], "analyzeTurns": [0, 2]}"#;
        let (cooked, reports) = cook(&mut cooker, line);
        assert!(reports.is_empty(), "{reports:?}");
        assert_eq!(cooked.engine_queries.len(), 1);
        assert_eq!(cooked.requests.len(), 2);

        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![0, 2]);
        for req in &cooked.requests {
            assert_eq!(req.analyze_turns(), vec![0, 2]);
            assert!(req.id().is_some());
        }
        // The engine query itself has no turnNumber.
        assert!(!cooked.engine_queries[0].contains_key("turnNumber"));
    }

    #[test]
    fn missing_analyze_turns_analyzes_every_position() {
        let mut cooker = cooker();
        let (cooked, _) = cook(&mut cooker, r#"{"moves": [["B","Q16"],["W","D4"]]}"#);
        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![0, 1, 2]);
    }

    #[test]
    fn only_last_analyzes_final_position() {
        let mut cooker = QueryCooker::new(
            CookerConfig {
                only_last: true,
                ..CookerConfig::default()
            },
            Fields::new(),
            Fields::new(),
        );
        let (cooked, _) = cook(&mut cooker, r#"{"moves": [["B","Q16"],["W","D4"]]}"#);
        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![2]);
    }

    #[test]
    fn every_from_to_synthesize_turns() {
        let mut cooker = cooker();
        let line = r#"{"moves": [["B","Q16"],["W","D4"],["B","C16"],["W","R4"]], "every": 2}"#;
        let (cooked, _) = cook(&mut cooker, line);
        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![0, 2, 4]);

        let line = r#"{"moves": [["B","Q16"],["W","D4"],["B","C16"],["W","R4"]], "from": 1, "to": 3}"#;
        let (cooked, _) = cook(&mut cooker, line);
        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![1, 2, 3]);
    }

    #[test]
    fn negative_every_counts_down_from_from() {
        let mut cooker = cooker();
        let line = r#"{"moves": [["B","Q16"],["W","D4"],["B","C16"],["W","R4"]], "from": 4, "to": 0, "every": -2}"#;
        let (cooked, _) = cook(&mut cooker, line);
        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![4, 2]);
    }

    #[test]
    fn degenerate_negative_every_falls_back_to_every_position() {
        // Counting down from 0 reaches nothing, so the synthesized turn list
        // is empty and the default turn set takes over.
        let mut cooker = cooker();
        let line = r#"{"moves": [["B","Q16"],["W","D4"]], "every": -1}"#;
        let (cooked, _) = cook(&mut cooker, line);
        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![0, 1, 2]);
    }

    #[test]
    fn last_flag_appends_final_turn() {
        let mut cooker = cooker();
        let line = r#"{"moves": [["B","Q16"],["W","D4"]], "analyzeTurns": [0], "last": true}"#;
        let (cooked, _) = cook(&mut cooker, line);
        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![0, 2]);
    }

    #[test]
    fn out_of_range_turns_are_clamped() {
        let mut cooker = cooker();
        let line = r#"{"moves": [["B","Q16"]], "analyzeTurns": [-1, 0, 1, 99]}"#;
        let (cooked, _) = cook(&mut cooker, line);
        let turns: Vec<i64> = cooked.requests.iter().filter_map(|r| r.turn_number()).collect();
        assert_eq!(turns, vec![0, 1]);
    }

    #[test]
    fn visits_alias_becomes_max_visits() {
        let mut cooker = cooker();
        let line = r#"{"moves": [["B","Q16"]], "visits": 32}"#;
        let (cooked, _) = cook(&mut cooker, line);
        assert_eq!(cooked.engine_queries[0].get("maxVisits"), Some(&json!(32)));
        assert!(!cooked.engine_queries[0].contains_key("visits"));
    }

    #[test]
    fn moves_and_players_are_upcased() {
        let mut cooker = cooker();
        let (cooked, _) = cook(&mut cooker, r#"{"moves": [["b","q16"]]}"#);
        assert_eq!(
            cooked.engine_queries[0].get("moves"),
            Some(&json!([["B", "Q16"]]))
        );
    }

    #[test]
    fn unsettledness_implies_ownership_engine_side() {
        let mut cooker = QueryCooker::new(
            CookerConfig {
                include_extra: true,
                ..CookerConfig::default()
            },
            object(json!({"includeUnsettledness": true})),
            Fields::new(),
        );
        let (cooked, _) = cook(&mut cooker, r#"{"moves": [["B","Q16"]]}"#);
        let engine_query = &cooked.engine_queries[0];
        assert_eq!(engine_query.get("includeOwnership"), Some(&json!(true)));
        assert!(!engine_query.contains_key("includeUnsettledness"));
        // The request still remembers the original intent.
        assert_eq!(
            cooked.requests[0].get("includeUnsettledness"),
            Some(&json!(true))
        );
    }

    #[test]
    fn rules_synonyms_normalize_and_unknown_rules_are_guessed() {
        let mut cooker = cooker();
        let (cooked, _) = cook(&mut cooker, r#"{"moves": [["B","Q16"]], "rules": "JP"}"#);
        assert_eq!(cooked.engine_queries[0].get("rules"), Some(&json!("japanese")));

        let (cooked, _) = cook(
            &mut cooker,
            r#"{"moves": [["B","Q16"]], "rules": "martian", "komi": 6.5}"#,
        );
        assert_eq!(cooked.engine_queries[0].get("rules"), Some(&json!("japanese")));

        let (cooked, _) = cook(&mut cooker, r#"{"moves": [["B","Q16"]], "komi": 7.5}"#);
        assert_eq!(cooked.engine_queries[0].get("rules"), Some(&json!("chinese")));
    }

    #[test]
    fn board_sizes_default_and_mirror() {
        let mut cooker = cooker();
        let (cooked, _) = cook(&mut cooker, r#"{"moves": [["B","Q16"]], "boardYSize": 13}"#);
        let engine_query = &cooked.engine_queries[0];
        assert_eq!(engine_query.get("boardXSize"), Some(&json!(13)));
        assert_eq!(engine_query.get("boardYSize"), Some(&json!(13)));
    }

    #[test]
    fn zero_sibling_size_still_defaults_to_19() {
        let mut cooker = cooker();
        let (cooked, _) = cook(&mut cooker, r#"{"moves": [["B","Q16"]], "boardYSize": 0}"#);
        let engine_query = &cooked.engine_queries[0];
        assert_eq!(engine_query.get("boardXSize"), Some(&json!(19)));
        // The given size itself is passed through untouched.
        assert_eq!(engine_query.get("boardYSize"), Some(&json!(0)));
    }

    #[test]
    fn override_wins_over_query_and_sgf() {
        let mut cooker = QueryCooker::new(
            CookerConfig::default(),
            Fields::new(),
            object(json!({"komi": 0.5})),
        );
        let (cooked, _) = cook(&mut cooker, "(;SZ[19]KM[6.5];B[pd];W[dp])");
        assert_eq!(cooked.engine_queries[0].get("komi"), Some(&json!(0.5)));
    }

    #[test]
    fn inline_sgf_line_becomes_query() {
        let mut cooker = QueryCooker::new(
            CookerConfig {
                include_extra: true,
                ..CookerConfig::default()
            },
            Fields::new(),
            Fields::new(),
        );
        let (cooked, reports) = cook(&mut cooker, "(;SZ[9]KM[7];B[ee];W[cc])");
        assert!(reports.is_empty(), "{reports:?}");
        let engine_query = &cooked.engine_queries[0];
        assert_eq!(engine_query.get("boardXSize"), Some(&json!(9)));
        assert_eq!(engine_query.get("komi"), Some(&json!(7.0)));
        assert_eq!(engine_query.get("moves"), Some(&json!([["B", "E5"], ["W", "C7"]])));
        // Extra SGF fields ride on the requests only.
        assert!(cooked.requests[0].get("sgfProp").is_some());
        assert!(!engine_query.contains_key("sgfProp"));
    }

    #[test]
    fn sgf_file_line_is_read_from_disk() {
        let path = std::env::temp_dir().join("katapipe-cook-test.sgf");
        std::fs::write(&path, "(;SZ[19];B[pd])").unwrap();

        let mut cooker = cooker();
        let (cooked, reports) = cook(&mut cooker, path.to_str().unwrap());
        assert!(reports.is_empty(), "{reports:?}");
        assert_eq!(cooked.requests.len(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn gzipped_sgf_file_is_decompressed() {
        let path = std::env::temp_dir().join("katapipe-cook-test.sgf.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"(;SZ[19];B[pd])").unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let mut cooker = cooker();
        let (cooked, reports) = cook(&mut cooker, path.to_str().unwrap());
        assert!(reports.is_empty(), "{reports:?}");
        assert_eq!(cooked.requests.len(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_sgf_file_is_reported_and_skipped() {
        let mut cooker = cooker();
        let (cooked, reports) = cook(&mut cooker, "/no/such/file.sgf");
        assert!(cooked.engine_queries.is_empty());
        assert!(cooked.requests.is_empty());
        assert!(reports[0].contains("Failed to open SGF file"));
    }

    #[test]
    fn disabled_sgf_file_is_rejected() {
        let mut cooker = QueryCooker::new(
            CookerConfig {
                disable_sgf_file: true,
                ..CookerConfig::default()
            },
            Fields::new(),
            Fields::new(),
        );
        let (cooked, reports) = cook(&mut cooker, "/some/game.sgf");
        assert!(cooked.requests.is_empty());
        assert!(reports.iter().any(|r| r.contains("disabled")));
    }

    #[test]
    fn invalid_json_is_reported_and_yields_nothing() {
        let mut cooker = cooker();
        let (cooked, reports) = cook(&mut cooker, "{broken json");
        assert!(cooked.engine_queries.is_empty());
        assert!(reports[0].contains("Invalid JSON"));
    }

    #[test]
    fn empty_moves_is_an_invalid_query() {
        let mut cooker = cooker();
        let (cooked, reports) = cook(&mut cooker, r#"{"moves": []}"#);
        assert!(cooked.requests.is_empty());
        assert!(reports[0].contains("Missing keys") || reports[0].contains("Invalid moves"));
    }

    #[test]
    fn report_during_search_every_is_stripped() {
        let mut cooker = cooker();
        let line = r#"{"moves": [["B","Q16"]], "reportDuringSearchEvery": 1}"#;
        let (cooked, reports) = cook(&mut cooker, line);
        assert!(!cooked.engine_queries[0].contains_key("reportDuringSearchEvery"));
        assert!(reports[0].contains("unsupported"));
    }

    #[test]
    fn given_id_is_preserved() {
        let mut cooker = cooker();
        let (cooked, _) = cook(&mut cooker, r#"{"id": "mine", "moves": [["B","Q16"]]}"#);
        assert_eq!(cooked.engine_queries[0].get("id"), Some(&json!("mine")));
    }
}
