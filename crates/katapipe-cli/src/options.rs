//! Command-line surface and the settings derived from it.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use tracing::warn;

use katapipe_core::Fields;
use katapipe_extra::ExtraMode;
use katapipe_query::CookerConfig;

#[derive(Debug, Parser)]
#[command(name = "katapipe", version)]
#[command(about = "Convenience wrapper around the KataGo parallel analysis engine")]
pub struct Cli {
    /// Defaults for missing fields in queries (JSON object)
    #[arg(long, value_name = "JSON")]
    pub default: Option<String>,

    /// Override fields in every query (JSON object)
    #[arg(long = "override", value_name = "JSON")]
    pub override_json: Option<String>,

    /// Replay every input line once per entry (JSON array of objects)
    #[arg(long, value_name = "JSON")]
    pub override_list: Option<String>,

    /// Equivalent to komi in --default
    #[arg(long, value_name = "KOMI")]
    pub default_komi: Option<f64>,

    /// Equivalent to rules in --default
    #[arg(long, value_name = "RULES")]
    pub default_rules: Option<String>,

    /// Equivalent to komi in --override
    #[arg(long)]
    pub komi: Option<f64>,

    /// Equivalent to rules in --override
    #[arg(long)]
    pub rules: Option<String>,

    /// Equivalent to maxVisits in --override
    #[arg(long, value_name = "MAX_VISITS")]
    pub visits: Option<i64>,

    /// First turn to analyze (analyzeTurnsFrom in --override)
    #[arg(long = "from", value_name = "TURN")]
    pub from_turn: Option<i64>,

    /// Last turn to analyze (analyzeTurnsTo in --override)
    #[arg(long = "to", value_name = "TURN")]
    pub to_turn: Option<i64>,

    /// Analyze every Nth turn (analyzeTurnsEvery in --override)
    #[arg(long = "every", value_name = "N")]
    pub every_turn: Option<i64>,

    /// Always analyze the final position as well
    #[arg(long)]
    pub last: bool,

    /// Include the raw policy in responses
    #[arg(long)]
    pub include_policy: bool,

    /// Replay every query once per humanSLProfile rank (9d down to 20k)
    #[arg(long)]
    pub scan_humansl_ranks: bool,

    /// Output ordering
    #[arg(long, value_enum, default_value_t = Order::Sort)]
    pub order: Order,

    /// How much derived data responses carry
    #[arg(long, value_enum, default_value_t = Extra::Excess)]
    pub extra: Extra,

    /// Suspend reading input while this many requests are pending (0 = unlimited)
    #[arg(long, value_name = "N", default_value_t = 1000)]
    pub max_requests: usize,

    /// Do not read all input lines at once
    #[arg(long)]
    pub sequentially: bool,

    /// Analyze only the last turn when analyzeTurns is missing
    #[arg(long)]
    pub only_last: bool,

    /// Do not support sgfFile in queries
    #[arg(long)]
    pub disable_sgf_file: bool,

    /// Write engine queries to stdout and dump pending requests to PATH
    #[arg(long, value_name = "PATH")]
    pub suspend_to: Option<PathBuf>,

    /// Restore pending requests from PATH and read responses from stdin
    #[arg(long, value_name = "PATH")]
    pub resume_from: Option<PathBuf>,

    /// The engine command is a netcat-style socket peer
    #[arg(long)]
    pub netcat: bool,

    /// Do not print progress info to stderr
    #[arg(long)]
    pub silent: bool,

    /// Print debug info to stderr
    #[arg(long)]
    pub debug: bool,

    /// Experimental entropy-based unsettledness
    #[arg(long)]
    pub unsettledness_by_entropy: bool,

    /// Experimental soft moyo curve
    #[arg(long)]
    pub soft_moyo: bool,

    /// Engine command, e.g. ./katago analysis -config analysis.cfg -model model.bin.gz
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "ENGINE_COMMAND"
    )]
    pub engine_command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Order {
    /// Responses leave in engine arrival order
    Arrival,
    /// Responses leave in request admission order
    Sort,
    /// One joined response per user query
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Extra {
    Normal,
    Rich,
    Excess,
}

impl Extra {
    fn mode(self) -> ExtraMode {
        match self {
            Extra::Normal => ExtraMode::Normal,
            Extra::Rich => ExtraMode::Rich,
            Extra::Excess => ExtraMode::Excess,
        }
    }
}

/// Everything the driver needs, with the JSON-ish options parsed.
#[derive(Debug)]
pub struct Settings {
    pub order: Order,
    pub extra: ExtraMode,
    pub max_requests: Option<usize>,
    pub sequentially: bool,
    pub only_last: bool,
    pub disable_sgf_file: bool,
    pub suspend_to: Option<PathBuf>,
    pub resume_from: Option<PathBuf>,
    pub netcat: bool,
    pub silent: bool,
    pub unsettledness_by_entropy: bool,
    pub soft_moyo: bool,
    pub defaults: Fields,
    pub overrides: Fields,
    pub override_list: Vec<Fields>,
    pub engine_command: Vec<String>,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Self {
        let extra = cli.extra.mode();

        let mut defaults = Fields::new();
        if extra != ExtraMode::Normal {
            defaults.insert("includeUnsettledness".to_string(), Value::Bool(true));
        }
        for (key, value) in parse_object(cli.default.as_deref()) {
            defaults.insert(key, value);
        }
        if let Some(komi) = cli.default_komi {
            defaults.insert("komi".to_string(), json!(komi));
        }
        if let Some(rules) = cli.default_rules {
            defaults.insert("rules".to_string(), json!(rules));
        }

        let mut overrides = parse_object(cli.override_json.as_deref());
        if let Some(komi) = cli.komi {
            overrides.insert("komi".to_string(), json!(komi));
        }
        if let Some(rules) = cli.rules {
            overrides.insert("rules".to_string(), json!(rules));
        }
        if let Some(visits) = cli.visits {
            overrides.insert("visits".to_string(), json!(visits));
        }
        if let Some(from) = cli.from_turn {
            overrides.insert("from".to_string(), json!(from));
        }
        if let Some(to) = cli.to_turn {
            overrides.insert("to".to_string(), json!(to));
        }
        if let Some(every) = cli.every_turn {
            overrides.insert("every".to_string(), json!(every));
        }
        if cli.last {
            overrides.insert("last".to_string(), Value::Bool(true));
        }
        if cli.include_policy {
            overrides.insert("includePolicy".to_string(), Value::Bool(true));
        }

        let mut override_list = parse_object_list(cli.override_list.as_deref());
        if cli.scan_humansl_ranks {
            override_list.extend(humansl_rank_overrides());
        }
        if override_list.is_empty() {
            override_list.push(Fields::new());
        }

        Settings {
            order: cli.order,
            extra,
            max_requests: (cli.max_requests > 0).then_some(cli.max_requests),
            sequentially: cli.sequentially,
            only_last: cli.only_last,
            disable_sgf_file: cli.disable_sgf_file,
            suspend_to: cli.suspend_to,
            resume_from: cli.resume_from,
            netcat: cli.netcat,
            silent: cli.silent,
            unsettledness_by_entropy: cli.unsettledness_by_entropy,
            soft_moyo: cli.soft_moyo,
            defaults,
            overrides,
            override_list,
            engine_command: cli.engine_command,
        }
    }

    /// True when the pipeline drives a real engine process, as opposed to
    /// the suspend/resume half-runs.
    pub fn needs_engine(&self) -> bool {
        self.suspend_to.is_none() && self.resume_from.is_none()
    }

    pub fn cooker_config(&self) -> CookerConfig {
        CookerConfig {
            include_extra: self.extra != ExtraMode::Normal,
            only_last: self.only_last,
            disable_sgf_file: self.disable_sgf_file,
        }
    }
}

fn parse_object(text: Option<&str>) -> Fields {
    let Some(text) = text else {
        return Fields::new();
    };
    katapipe_query::parse_json_lenient(text, &mut |msg| warn!("{msg}"))
}

fn parse_object_list(text: Option<&str>) -> Vec<Fields> {
    let Some(text) = text else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(entries)) => entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::Object(map) => Some(map),
                other => {
                    warn!("Ignoring non-object override entry: {other}");
                    None
                }
            })
            .collect(),
        _ => {
            warn!("Invalid JSON '{text}' is replaced with '[]'");
            Vec::new()
        }
    }
}

/// One override per human-SL rank profile, strongest first.
fn humansl_rank_overrides() -> Vec<Fields> {
    let dan = (1..10).rev().map(|i| format!("{i}d"));
    let kyu = (1..=20).map(|i| format!("{i}k"));
    dan.chain(kyu)
        .map(|rank| {
            let Value::Object(map) = json!({
                "maxVisits": 1,
                "includePolicy": true,
                "overrideSettings": {"humanSLProfile": format!("rank_{rank}")},
            }) else {
                unreachable!()
            };
            map
        })
        .collect()
}
