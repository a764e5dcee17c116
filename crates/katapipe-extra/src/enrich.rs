//! Response enrichment — metrics derived from ownership, board
//! reconstruction and next-move lookahead.

use serde_json::{json, Value};

use katapipe_core::{merge_fields, truthy, Fields, Pair, Record, Request, Response};

use crate::board::{gtp_coords, Board, Mark};

/// Wrapper metrics that get folded into `rootInfo` in excess mode.
const EXTENDED_ROOT_KEYS: [&str; 7] = [
    "blackUnsettledness",
    "whiteUnsettledness",
    "territoryUnsettledness",
    "unsettledness",
    "blackMoyo",
    "whiteMoyo",
    "moyoLead",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtraMode {
    /// Engine responses pass through untouched.
    Normal,
    /// Adds next-move data, the originating query and the board.
    Rich,
    /// Rich plus request fields, SGF properties and rootInfo flattened to
    /// the top level.
    #[default]
    Excess,
}

/// Per-pair enrichment applied between the Sorter and the Joiner.
#[derive(Debug, Clone, Copy)]
pub struct Enricher {
    pub extra: ExtraMode,
    pub unsettledness_by_entropy: bool,
    pub soft_moyo: bool,
}

impl Default for Enricher {
    fn default() -> Self {
        Self {
            extra: ExtraMode::Excess,
            unsettledness_by_entropy: false,
            soft_moyo: false,
        }
    }
}

impl Enricher {
    pub fn cook_pair(&self, pair: &mut Pair) {
        sort_move_infos(&mut pair.response);
        cook_board_in_info(&mut pair.response, &pair.request);
        self.cook_unsettledness(pair);
        self.add_extra_response(pair);
    }

    // unsettledness family

    /// Ownership-based metrics for the root position and for each moveInfo
    /// that carries its own ownership vector.
    fn cook_unsettledness(&self, pair: &mut Pair) {
        if !pair
            .request
            .get("includeUnsettledness")
            .is_some_and(truthy)
        {
            return;
        }
        let base = pair
            .response
            .get("board")
            .and_then(Board::from_json)
            .unwrap_or_else(|| board_from_query(&pair.request));
        self.apply_ownership_features(&mut pair.response.fields, &base);

        let player = current_player(&pair.response);
        if let Some(Value::Array(infos)) = pair.response.fields.get_mut("moveInfos") {
            for info in infos.iter_mut() {
                let Some(obj) = info.as_object_mut() else {
                    continue;
                };
                let info_board = match obj.get("board").and_then(Board::from_json) {
                    Some(board) => board,
                    None => {
                        let (Some(player), Some(mv)) =
                            (player.as_deref(), obj.get("move").and_then(Value::as_str))
                        else {
                            continue;
                        };
                        let mut board = base.clone();
                        board.play(player, mv);
                        board
                    }
                };
                self.apply_ownership_features(obj, &info_board);
            }
        }
    }

    fn apply_ownership_features(&self, target: &mut Fields, board: &Board) {
        let Some(ownership) = number_array(target.get("ownership")) else {
            return;
        };
        let points: Vec<(f64, Mark)> = ownership.iter().copied().zip(board.marks()).collect();

        let unsettled = |o: f64| {
            if self.unsettledness_by_entropy {
                unsettledness_by_entropy(o)
            } else {
                1.0 - o.abs()
            }
        };
        let black = sum_over(&points, Mark::Black, unsettled);
        let white = sum_over(&points, Mark::White, unsettled);
        let territory = sum_over(&points, Mark::Empty, unsettled);
        target.insert("blackUnsettledness".to_string(), json!(black));
        target.insert("whiteUnsettledness".to_string(), json!(white));
        target.insert("territoryUnsettledness".to_string(), json!(territory));
        target.insert("unsettledness".to_string(), json!(black + white));

        let black_moyo = sum_over(&points, Mark::Empty, |o| self.black_moyo(o));
        let white_moyo = sum_over(&points, Mark::Empty, |o| self.black_moyo(-o));
        target.insert("blackMoyo".to_string(), json!(black_moyo));
        target.insert("whiteMoyo".to_string(), json!(white_moyo));
        target.insert("moyoLead".to_string(), json!(black_moyo - white_moyo));

        let black_settled = sum_over(&points, Mark::Empty, settled_territory);
        let white_settled = sum_over(&points, Mark::Empty, |o| settled_territory(-o));
        target.insert("blackSettledTerritory".to_string(), json!(black_settled));
        target.insert("whiteSettledTerritory".to_string(), json!(white_settled));

        target.insert(
            "ownershipDistribution".to_string(),
            json!(ownership_distribution(&points)),
        );
    }

    fn black_moyo(&self, o: f64) -> f64 {
        if self.soft_moyo {
            // Compatible with lizgoban's endstate distance curve.
            if o > 0.0 {
                o * (1.0 - o.powi(2))
            } else {
                0.0
            }
        } else {
            let threshold = 1.0 / 3.0;
            if (0.0..=threshold).contains(&o) {
                o
            } else {
                0.0
            }
        }
    }

    // extra response

    fn add_extra_response(&self, pair: &mut Pair) {
        if self.extra == ExtraMode::Normal {
            return;
        }
        let rich = rich_response(&pair.request, &pair.response);
        let excess = if self.extra == ExtraMode::Excess {
            excessive_response(&pair.request, &mut pair.response)
        } else {
            Fields::new()
        };
        // Existing response fields always win; rich beats excess.
        pair.response.fields = merge_fields(&[&excess, &rich, &pair.response.fields]);
    }
}

fn sort_move_infos(response: &mut Response) {
    if let Some(Value::Array(infos)) = response.fields.get_mut("moveInfos") {
        infos.sort_by_key(|info| info.get("order").and_then(Value::as_i64).unwrap_or(i64::MAX));
    }
}

/// Adds a board to each moveInfo, but only when ownership was requested and
/// the response already carries a root board: per-move boards are a large
/// output-size overhead.
fn cook_board_in_info(response: &mut Response, request: &Request) {
    if !request.get("includeOwnership").is_some_and(truthy) {
        return;
    }
    let Some(base) = response.get("board").and_then(Board::from_json) else {
        return;
    };
    let Some(player) = current_player(response) else {
        return;
    };
    if let Some(Value::Array(infos)) = response.fields.get_mut("moveInfos") {
        for info in infos.iter_mut() {
            let Some(obj) = info.as_object_mut() else {
                continue;
            };
            let Some(mv) = obj.get("move").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let mut board = base.clone();
            board.play(&player, &mv);
            obj.insert("board".to_string(), board.to_json());
        }
    }
}

/// Position of the request's turn, replayed from the query's move list.
pub fn board_from_query(request: &Request) -> Board {
    let x_size = request
        .get("boardXSize")
        .and_then(Value::as_i64)
        .unwrap_or(19)
        .max(1) as usize;
    let y_size = request
        .get("boardYSize")
        .and_then(Value::as_i64)
        .unwrap_or(19)
        .max(1) as usize;
    let turn = request.turn_number().unwrap_or(0).max(0) as usize;
    let moves = moves_of(request);
    let played = moves.iter().take(turn).map(|(p, m)| (p.as_str(), m.as_str()));
    Board::from_moves(played, x_size, y_size)
}

fn moves_of(request: &Request) -> Vec<(String, String)> {
    request
        .get("moves")
        .and_then(Value::as_array)
        .map(|moves| {
            moves
                .iter()
                .filter_map(|entry| {
                    let parts = entry.as_array()?;
                    Some((
                        parts.first()?.as_str()?.to_string(),
                        parts.get(1)?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn current_player(response: &Response) -> Option<String> {
    response
        .get("rootInfo")?
        .get("currentPlayer")?
        .as_str()
        .map(str::to_string)
}

fn number_array(value: Option<&Value>) -> Option<Vec<f64>> {
    let values = value?.as_array()?;
    Some(values.iter().filter_map(Value::as_f64).collect())
}

fn sum_over(points: &[(f64, Mark)], mark: Mark, f: impl Fn(f64) -> f64) -> f64 {
    points
        .iter()
        .filter(|(_, m)| *m == mark)
        .map(|(o, _)| f(*o))
        .sum()
}

fn unsettledness_by_entropy(o: f64) -> f64 {
    let q = (o + 1.0) / 2.0;
    entropy_term(q) + entropy_term(1.0 - q)
}

fn entropy_term(p: f64) -> f64 {
    if p > 0.0 {
        -p * p.ln()
    } else {
        0.0
    }
}

fn settled_territory(o: f64) -> f64 {
    if o >= 0.0 {
        o.powf(3.0)
    } else {
        0.0
    }
}

/// 30 counters: 10 ownership buckets for each of black stones, white
/// stones and empty points.
fn ownership_distribution(points: &[(f64, Mark)]) -> Vec<i64> {
    let mut counts = [[0i64; 10]; 3];
    for (o, mark) in points {
        let slot = match mark {
            Mark::Black => 0,
            Mark::White => 1,
            Mark::Empty => 2,
        };
        counts[slot][distribution_bucket(*o)] += 1;
    }
    counts.concat()
}

fn distribution_bucket(o: f64) -> usize {
    let idx = ((o + 1.0) * 10.0 / 2.0).floor().max(0.0) as usize;
    idx.min(9)
}

// next move

/// What was actually played next in the game, with its prior and rank in
/// the engine's evaluation.
fn next_move_etc(request: &Request, response: &Response) -> Fields {
    let mut out = Fields::new();
    let moves = moves_of(request);
    let Some(turn) = response.turn_number() else {
        return out;
    };
    let Some((color, mv)) = usize::try_from(turn).ok().and_then(|t| moves.get(t)).cloned() else {
        return out;
    };
    let sign = match color.to_uppercase().as_str() {
        "B" => 1,
        "W" => -1,
        _ => 0,
    };
    out.insert("nextMove".to_string(), json!(mv));
    out.insert("nextMoveColor".to_string(), json!(color));
    out.insert("nextMoveSign".to_string(), json!(sign));

    let x_size = request.get("boardXSize").and_then(Value::as_i64).unwrap_or(19);
    let y_size = request.get("boardYSize").and_then(Value::as_i64).unwrap_or(19);
    let idx = policy_index(&mv, x_size, y_size);
    for (key, field) in [("nextMovePrior", "policy"), ("nextMoveHumanPrior", "humanPolicy")] {
        if let Some(policy) = response.get(field).and_then(Value::as_array) {
            let slot = if idx < 0 {
                policy.len().checked_sub(1)
            } else {
                Some(idx as usize)
            };
            if let Some(prior) = slot.and_then(|i| policy.get(i)) {
                out.insert(key.to_string(), prior.clone());
            }
        }
    }

    let hit = response
        .get("moveInfos")
        .and_then(Value::as_array)
        .and_then(|infos| {
            infos
                .iter()
                .find(|info| info.get("move").and_then(Value::as_str) == Some(mv.as_str()))
        });
    if let Some(hit) = hit {
        for (key, field) in [
            ("nextMoveRank", "order"),
            ("nextMovePrior", "prior"),
            ("nextMoveHumanPrior", "humanPrior"),
        ] {
            if let Some(value) = hit.get(field) {
                out.insert(key.to_string(), value.clone());
            }
        }
    }
    out
}

/// Index into the engine's policy vector: row-major from the top-left
/// corner, with the pass entry last.
pub fn policy_index(mv: &str, x_size: i64, y_size: i64) -> i64 {
    match gtp_coords(mv) {
        Some((x, y)) => x + (y_size - y - 1) * x_size,
        None => -1,
    }
}

fn rich_response(request: &Request, response: &Response) -> Fields {
    let mut rich = next_move_etc(request, response);
    rich.insert("query".to_string(), Value::Object(request.fields.clone()));
    rich.insert("board".to_string(), board_from_query(request).to_json());
    rich
}

/// Folds wrapper metrics into `rootInfo` and returns the fields flattened
/// to the top level: the request itself, joined SGF properties, the
/// original rootInfo and the override settings.
fn excessive_response(request: &Request, response: &mut Response) -> Fields {
    let original_root: Fields = response
        .get("rootInfo")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut extended = original_root.clone();
    for key in EXTENDED_ROOT_KEYS {
        if let Some(value) = response.get(key) {
            extended.insert(key.to_string(), value.clone());
        }
    }
    response.set("rootInfo", Value::Object(extended));

    let override_settings = request
        .get("overrideSettings")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    merge_fields(&[
        &request.fields,
        &cooked_sgf_prop(request),
        &original_root,
        &override_settings,
    ])
}

/// `sgfProp` lists joined into comma-separated strings.
fn cooked_sgf_prop(request: &Request) -> Fields {
    let Some(props) = request.get("sgfProp").and_then(Value::as_object) else {
        return Fields::new();
    };
    props
        .iter()
        .map(|(key, values)| {
            let joined = values
                .as_array()
                .map(|vals| {
                    vals.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            (key.clone(), Value::String(joined))
        })
        .collect()
}
