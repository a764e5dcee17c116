//! Buffering and emission ordering for matched pairs.
//!
//! The Joiner receives pairs from the Sorter and decides when they may leave
//! the pipeline. Its mode is derived from the hooks it is built with:
//!
//! * no hooks — arrival pass-through, every pair is emitted immediately;
//! * successor hook only — each pair is held back until the pair for the
//!   next turn of the same query has been seen (or can never arrive), so the
//!   hook can stitch lookahead data onto it;
//! * join hook — pairs accumulate until the last requested turn of a query
//!   arrives, then a single joined response is emitted for the whole query.

use crate::record::{Fields, Pair, Record};

/// Synthesizes one joined response from all pairs of a user query.
pub type JoinFn = Box<dyn FnMut(Vec<Pair>) -> Fields + Send>;

/// Stitches data from a pair onto its immediate predecessor (same id,
/// previous turn) before the successor enters the pool.
pub type StitchFn = Box<dyn FnMut(&mut Pair, &Pair) + Send>;

pub struct Joiner {
    join_pairs: Option<JoinFn>,
    cook_successive: Option<StitchFn>,
    pool: Vec<Pair>,
    pop_count: usize,
}

impl Joiner {
    pub fn new(join_pairs: Option<JoinFn>, cook_successive: Option<StitchFn>) -> Self {
        Self {
            join_pairs,
            cook_successive,
            pool: Vec::new(),
            pop_count: 0,
        }
    }

    /// A Joiner that emits every pair as it comes in.
    pub fn passthrough() -> Self {
        Self::new(None, None)
    }

    /// `(to_join, popped)`: pool occupancy and the lifetime count of pairs
    /// that have left the pool.
    pub fn count(&self) -> (usize, usize) {
        (self.pool.len(), self.pop_count)
    }

    /// Accepts matched pairs in order and returns whatever the current mode
    /// allows to be emitted, concatenated in order.
    pub fn push_pairs(&mut self, pairs: Vec<Pair>) -> Vec<Fields> {
        let mut out = Vec::new();
        for pair in pairs {
            out.extend(self.push_pair(pair));
        }
        out
    }

    fn push_pair(&mut self, pair: Pair) -> Vec<Fields> {
        self.stitch_with_previous(&pair);
        let joining = self.join_pairs.is_some();
        let retain_last = !joining && self.awaits_successor(&pair);
        self.pool.push(pair);
        if joining {
            self.pop_joined_responses()
        } else {
            self.pop_responses(retain_last)
        }
    }

    // pop

    fn pop_responses(&mut self, butlast: bool) -> Vec<Fields> {
        self.pop_pairs(butlast)
            .into_iter()
            .map(|pair| pair.response.into_fields())
            .collect()
    }

    fn pop_pairs(&mut self, butlast: bool) -> Vec<Pair> {
        let stop = if butlast {
            self.pool.len().saturating_sub(1)
        } else {
            self.pool.len()
        };
        let popped: Vec<Pair> = self.pool.drain(..stop).collect();
        self.pop_count += popped.len();
        popped
    }

    // successive pairs

    /// Applies the successor hook to (previous, incoming) when the incoming
    /// pair is the direct turn successor of the last pooled pair.
    fn stitch_with_previous(&mut self, curr: &Pair) {
        let Some(hook) = self.cook_successive.as_mut() else {
            return;
        };
        let Some(prev) = self.pool.last_mut() else {
            return;
        };
        let same_id = prev.response.id() == curr.response.id();
        let successive = match (prev.response.turn_number(), curr.response.turn_number()) {
            (Some(a), Some(b)) => a + 1 == b,
            _ => false,
        };
        if same_id && successive {
            hook(prev, curr);
        }
    }

    /// True when a later pair could still stitch onto this one: the next
    /// turn is among the turns its own query asked for.
    fn awaits_successor(&self, pair: &Pair) -> bool {
        if self.cook_successive.is_none() {
            return false;
        }
        let Some(turn) = pair.response.turn_number() else {
            return false;
        };
        pair.request.analyze_turns().contains(&(turn + 1))
    }

    // join

    fn pop_joined_responses(&mut self) -> Vec<Fields> {
        let finished = self.pool.last().is_some_and(|last| {
            match (last.request.analyze_turns().last(), last.response.turn_number()) {
                (Some(&final_turn), Some(turn)) => final_turn == turn,
                _ => false,
            }
        });
        if !finished {
            return Vec::new();
        }
        let pairs = self.pop_pairs(false);
        match self.join_pairs.as_mut() {
            Some(join) => vec![join(pairs)],
            None => Vec::new(),
        }
    }
}
