//! Command-line surface of the `flowagg` binary
//!
//! Rule flags may be repeated and mixed; the resulting rule list follows the
//! order in which they appear on the command line, not the flag kind.

use crate::aggregator_core::rules::{FuncKind, Role, RuleConfig};
use crate::emitter::BackendType;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "flowagg")]
#[command(about = "Aggregate flow records by key with active, passive or global timeouts")]
pub struct Cli {
    /// Key field (records with equal key fields share an aggregate)
    #[arg(short = 'k', long = "key", value_name = "FIELD", value_delimiter = ',')]
    pub key: Vec<String>,

    /// Sum the field
    #[arg(short = 's', long = "sum", value_name = "FIELD", value_delimiter = ',')]
    pub sum: Vec<String>,

    /// Average the field
    #[arg(short = 'a', long = "avg", value_name = "FIELD", value_delimiter = ',')]
    pub avg: Vec<String>,

    /// Keep the minimum value
    #[arg(short = 'm', long = "min", value_name = "FIELD", value_delimiter = ',')]
    pub min: Vec<String>,

    /// Keep the maximum value
    #[arg(short = 'M', long = "max", value_name = "FIELD", value_delimiter = ',')]
    pub max: Vec<String>,

    /// Keep the first value
    #[arg(short = 'f', long = "first", value_name = "FIELD", value_delimiter = ',')]
    pub first: Vec<String>,

    /// Keep the last value
    #[arg(short = 'l', long = "last", value_name = "FIELD", value_delimiter = ',')]
    pub last: Vec<String>,

    /// Bitwise OR of the values
    #[arg(short = 'o', long = "or", value_name = "FIELD", value_delimiter = ',')]
    pub or: Vec<String>,

    /// Bitwise AND of the values
    #[arg(short = 'n', long = "and", value_name = "FIELD", value_delimiter = ',')]
    pub and: Vec<String>,

    /// Timeout: A:<secs>, P:<secs>, G:<secs>, M:<active>,<passive> or <secs>
    #[arg(short = 't', long = "time-window", value_name = "SPEC")]
    pub time_window: Option<String>,

    /// Input JSONL file (stdin if omitted)
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Output path (stdout for JSONL if omitted; required for SQLite)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Output backend
    #[arg(long, value_enum, default_value_t = BackendType::Jsonl)]
    pub backend: BackendType,

    /// Keep reading the input file as it grows
    #[arg(long)]
    pub follow: bool,
}

/// Flag id → role, in no particular order; ordering comes from arg indices
const RULE_FLAGS: [(&str, Role); 9] = [
    ("key", Role::Key),
    ("sum", Role::Value(FuncKind::Sum)),
    ("avg", Role::Value(FuncKind::Avg)),
    ("min", Role::Value(FuncKind::Min)),
    ("max", Role::Value(FuncKind::Max)),
    ("first", Role::Value(FuncKind::First)),
    ("last", Role::Value(FuncKind::Last)),
    ("or", Role::Value(FuncKind::BitOr)),
    ("and", Role::Value(FuncKind::BitAnd)),
];

impl Cli {
    /// Parse process arguments; exits with usage on error
    pub fn parse_ordered() -> (Cli, RuleConfig) {
        match Self::from_args(std::env::args_os()) {
            Ok(parsed) => parsed,
            Err(e) => e.exit(),
        }
    }

    pub fn from_args<I, T>(args: I) -> Result<(Cli, RuleConfig), clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let cli = Self::from_arg_matches(&matches)?;
        let rules = rules_from_matches(&matches, cli.time_window.as_deref());
        Ok((cli, rules))
    }
}

fn rules_from_matches(matches: &ArgMatches, time_window: Option<&str>) -> RuleConfig {
    let mut ordered: Vec<(usize, Role, &String)> = Vec::new();

    for (id, role) in RULE_FLAGS {
        let (Some(indices), Some(values)) = (matches.indices_of(id), matches.get_many::<String>(id))
        else {
            continue;
        };
        ordered.extend(indices.zip(values).map(|(index, value)| (index, role, value)));
    }
    ordered.sort_by_key(|(index, _, _)| *index);

    let mut config = RuleConfig::new();
    for (_, role, field) in ordered {
        config.add_rule(role, field);
    }
    if let Some(spec) = time_window {
        config.set_timeout(spec);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_core::rules::TimeoutKind;

    fn parse(args: &[&str]) -> (Cli, RuleConfig) {
        let mut argv = vec!["flowagg"];
        argv.extend_from_slice(args);
        Cli::from_args(argv).unwrap()
    }

    fn rule_names(config: &RuleConfig) -> Vec<(Role, &str)> {
        config
            .rules()
            .iter()
            .map(|r| (r.role, r.field_name.as_str()))
            .collect()
    }

    #[test]
    fn test_rule_order_follows_command_line() {
        let (_, rules) = parse(&["-s", "BYTES", "-k", "SRC_IP", "-M", "TCP_FLAGS", "-k", "DST_PORT"]);

        assert_eq!(
            rule_names(&rules),
            vec![
                (Role::Value(FuncKind::Sum), "BYTES"),
                (Role::Key, "SRC_IP"),
                (Role::Value(FuncKind::Max), "TCP_FLAGS"),
                (Role::Key, "DST_PORT"),
            ]
        );
    }

    #[test]
    fn test_comma_separated_fields() {
        let (_, rules) = parse(&["-k", "SRC_IP,DST_IP", "--or", "TCP_FLAGS", "--and", "TOS"]);

        assert_eq!(
            rule_names(&rules),
            vec![
                (Role::Key, "SRC_IP"),
                (Role::Key, "DST_IP"),
                (Role::Value(FuncKind::BitOr), "TCP_FLAGS"),
                (Role::Value(FuncKind::BitAnd), "TOS"),
            ]
        );
    }

    #[test]
    fn test_timeout_and_io_flags() {
        let (cli, rules) = parse(&[
            "-t", "M:30,5", "--input", "in.jsonl", "--backend", "sqlite", "--output", "out.db", "--follow",
        ]);

        assert_eq!(rules.timeout().kind, TimeoutKind::ActivePassive);
        assert_eq!(rules.timeout().active_secs, 30);
        assert_eq!(rules.timeout().passive_secs, 5);
        assert_eq!(cli.input, Some(PathBuf::from("in.jsonl")));
        assert_eq!(cli.output, Some(PathBuf::from("out.db")));
        assert_eq!(cli.backend, BackendType::Sqlite);
        assert!(cli.follow);
    }

    #[test]
    fn test_defaults() {
        let (cli, rules) = parse(&[]);

        assert!(rules.rules().is_empty());
        assert_eq!(rules.timeout().kind, TimeoutKind::Active);
        assert_eq!(rules.timeout().active_secs, 10);
        assert_eq!(cli.backend, BackendType::Jsonl);
        assert!(!cli.follow);
    }

    #[test]
    fn test_reserved_and_duplicate_fields_dropped() {
        let (_, rules) = parse(&["-k", "SRC_IP", "-s", "SRC_IP", "-l", "TIME_LAST"]);
        assert_eq!(rule_names(&rules), vec![(Role::Key, "SRC_IP")]);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Cli::from_args(["flowagg", "--backend", "kafka"]).is_err());
    }
}
