//! Minimal SGF reader.
//!
//! Only what an analysis query needs: root properties, board geometry and
//! the moves of the main branch (first child at every variation point).
//! Coordinates are converted to GTP, whose column letters skip `I`.

use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

const GTP_COLUMNS: &str = "ABCDEFGHJKLMNOPQRST";

#[derive(Debug, Error)]
pub enum SgfError {
    #[error("not an SGF game tree")]
    NotAGameTree,
    #[error("unterminated SGF property value")]
    UnterminatedValue,
    #[error("unbalanced SGF parentheses")]
    Unbalanced,
}

/// One node's properties, in file order.
pub type Node = Vec<(String, Vec<String>)>;

/// Root information and main-branch moves extracted from an SGF record.
#[derive(Debug, Clone)]
pub struct SgfGame {
    /// `[player, GTP move]` pairs, setup placements in later nodes included.
    pub moves: Vec<(String, String)>,
    pub board_x_size: i64,
    pub board_y_size: i64,
    pub initial_player: String,
    /// Root AB/AW placements as `[player, GTP move]` pairs.
    pub initial_stones: Vec<(String, String)>,
    pub komi: Option<f64>,
    pub rules: Option<String>,
    /// All root properties, for the `sgfProp` passthrough field.
    pub root_properties: Node,
}

pub fn parse(text: &str) -> Result<SgfGame, SgfError> {
    let nodes = main_branch(text.trim())?;
    let Some(root) = nodes.first() else {
        return Err(SgfError::NotAGameTree);
    };

    let (mut x_size, mut y_size) = (19, 19);
    let mut komi = None;
    let mut rules = None;
    let mut stated_player = None;
    for (ident, values) in root {
        match (ident.as_str(), values.first()) {
            ("SZ", Some(value)) => (x_size, y_size) = parse_size(value),
            ("KM", Some(value)) => komi = value.trim().parse::<f64>().ok(),
            ("RU", Some(value)) => rules = Some(value.clone()),
            ("PL", Some(value)) => stated_player = Some(value.trim().to_uppercase()),
            _ => {}
        }
    }

    let mut initial_stones = Vec::new();
    for (ident, values) in root {
        let player = match ident.as_str() {
            "AB" => "B",
            "AW" => "W",
            _ => continue,
        };
        for value in values {
            initial_stones.push((player.to_string(), sgf_to_gtp(value, x_size, y_size)));
        }
    }

    let mut moves = Vec::new();
    for (depth, node) in nodes.iter().enumerate() {
        for (ident, values) in node {
            match ident.as_str() {
                "B" | "W" => {
                    if let Some(value) = values.first() {
                        moves.push((ident.clone(), sgf_to_gtp(value, x_size, y_size)));
                    }
                }
                // Mid-game placements count as moves of that colour.
                "AB" | "AW" if depth > 0 => {
                    let player = if ident == "AB" { "B" } else { "W" };
                    for value in values {
                        moves.push((player.to_string(), sgf_to_gtp(value, x_size, y_size)));
                    }
                }
                _ => {}
            }
        }
    }

    let initial_player = stated_player.unwrap_or_else(|| {
        if !initial_stones.is_empty() {
            "W".to_string()
        } else {
            moves
                .first()
                .map(|(player, _)| player.clone())
                .unwrap_or_else(|| "B".to_string())
        }
    });

    Ok(SgfGame {
        moves,
        board_x_size: x_size,
        board_y_size: y_size,
        initial_player,
        initial_stones,
        komi,
        rules,
        root_properties: root.clone(),
    })
}

/// `SZ[19]` or rectangular `SZ[cols:rows]`.
fn parse_size(value: &str) -> (i64, i64) {
    match value.split_once(':') {
        Some((x, y)) => (
            x.trim().parse().unwrap_or(19),
            y.trim().parse().unwrap_or(19),
        ),
        None => {
            let n = value.trim().parse().unwrap_or(19);
            (n, n)
        }
    }
}

/// SGF point to GTP vertex. Anything unparsable is a pass.
pub fn sgf_to_gtp(value: &str, x_size: i64, y_size: i64) -> String {
    if value.is_empty() || (value == "tt" && x_size <= 19 && y_size <= 19) {
        return "pass".to_string();
    }
    let mut chars = value.chars();
    let (Some(col_char), Some(row_char)) = (chars.next(), chars.next()) else {
        return "pass".to_string();
    };
    let col = col_char as i64 - 'a' as i64;
    let row_from_top = row_char as i64 - 'a' as i64;
    if !(0..x_size).contains(&col) || !(0..y_size).contains(&row_from_top) {
        return "pass".to_string();
    }
    match GTP_COLUMNS.chars().nth(col as usize) {
        Some(letter) => format!("{}{}", letter, y_size - row_from_top),
        None => "pass".to_string(),
    }
}

// tree scanning

fn main_branch(text: &str) -> Result<Vec<Node>, SgfError> {
    let mut it = text.chars().peekable();
    skip_whitespace(&mut it);
    if it.next() != Some('(') {
        return Err(SgfError::NotAGameTree);
    }
    tree_nodes(&mut it)
}

/// Nodes of a game tree, following only the first subtree at each branch
/// point. Expects the opening parenthesis to be consumed already.
fn tree_nodes(it: &mut Peekable<Chars>) -> Result<Vec<Node>, SgfError> {
    let mut nodes = Vec::new();
    let mut branched = false;
    loop {
        skip_whitespace(it);
        match it.next() {
            Some(';') => nodes.push(node(it)?),
            Some('(') => {
                if branched {
                    skip_tree(it)?;
                } else {
                    branched = true;
                    nodes.extend(tree_nodes(it)?);
                }
            }
            Some(')') => return Ok(nodes),
            Some(_) => {}
            None => return Err(SgfError::Unbalanced),
        }
    }
}

fn node(it: &mut Peekable<Chars>) -> Result<Node, SgfError> {
    let mut properties = Vec::new();
    loop {
        skip_whitespace(it);
        match it.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                let ident = ident(it);
                let values = values(it)?;
                if !ident.is_empty() {
                    properties.push((ident, values));
                }
            }
            _ => return Ok(properties),
        }
    }
}

/// Property identifier; lowercase letters (old SGF dialects) are dropped.
fn ident(it: &mut Peekable<Chars>) -> String {
    let mut name = String::new();
    while let Some(&c) = it.peek() {
        if !c.is_ascii_alphabetic() {
            break;
        }
        if c.is_ascii_uppercase() {
            name.push(c);
        }
        it.next();
    }
    name
}

fn values(it: &mut Peekable<Chars>) -> Result<Vec<String>, SgfError> {
    let mut values = Vec::new();
    loop {
        skip_whitespace(it);
        if it.peek() != Some(&'[') {
            return Ok(values);
        }
        it.next();
        values.push(value(it)?);
    }
}

fn value(it: &mut Peekable<Chars>) -> Result<String, SgfError> {
    let mut text = String::new();
    while let Some(c) = it.next() {
        match c {
            ']' => return Ok(text),
            '\\' => {
                if let Some(escaped) = it.next() {
                    text.push(escaped);
                }
            }
            _ => text.push(c),
        }
    }
    Err(SgfError::UnterminatedValue)
}

/// Skips a whole subtree, bracketed values included. Expects the opening
/// parenthesis to be consumed already.
fn skip_tree(it: &mut Peekable<Chars>) -> Result<(), SgfError> {
    let mut depth = 1usize;
    while let Some(c) = it.next() {
        match c {
            '[' => {
                while let Some(v) = it.next() {
                    match v {
                        ']' => break,
                        '\\' => {
                            it.next();
                        }
                        _ => {}
                    }
                }
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            _ => {}
        }
    }
    Err(SgfError::Unbalanced)
}

fn skip_whitespace(it: &mut Peekable<Chars>) {
    while it.peek().is_some_and(|c| c.is_whitespace()) {
        it.next();
    }
}
