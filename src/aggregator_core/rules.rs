//! Aggregation rules and timeout policy
//!
//! Rules are declared as ordered `(role, field)` pairs. Declaration order is
//! the order of key bytes and of output fields.

use std::fmt;

/// Default active/passive timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum number of rules accepted
pub const MAX_RULES: usize = 32;

/// Timeout specs longer than this are rejected outright
const MAX_TIMEOUT_SPEC_LEN: usize = 21;

/// Fields managed by the aggregator itself
pub const TIME_FIRST: &str = "TIME_FIRST";
pub const TIME_LAST: &str = "TIME_LAST";
pub const COUNT: &str = "COUNT";

/// Aggregation function applied to a value field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncKind {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    BitOr,
    BitAnd,
}

impl FuncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuncKind::Sum => "sum",
            FuncKind::Avg => "avg",
            FuncKind::Min => "min",
            FuncKind::Max => "max",
            FuncKind::First => "first",
            FuncKind::Last => "last",
            FuncKind::BitOr => "or",
            FuncKind::BitAnd => "and",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Some(FuncKind::Sum),
            "avg" => Some(FuncKind::Avg),
            "min" => Some(FuncKind::Min),
            "max" => Some(FuncKind::Max),
            "first" => Some(FuncKind::First),
            "last" => Some(FuncKind::Last),
            "or" => Some(FuncKind::BitOr),
            "and" => Some(FuncKind::BitAnd),
            _ => None,
        }
    }
}

impl fmt::Display for FuncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a field in the aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Key,
    Value(FuncKind),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Key => f.write_str("key"),
            Role::Value(func) => write!(f, "{}", func),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRule {
    pub role: Role,
    pub field_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Active,
    Passive,
    Global,
    ActivePassive,
}

impl TimeoutKind {
    pub fn has_active(&self) -> bool {
        matches!(self, TimeoutKind::Active | TimeoutKind::ActivePassive)
    }

    pub fn has_passive(&self) -> bool {
        matches!(self, TimeoutKind::Passive | TimeoutKind::ActivePassive)
    }
}

/// Eviction policy. Global uses `active_secs` as its flush period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub kind: TimeoutKind,
    pub active_secs: u64,
    pub passive_secs: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            kind: TimeoutKind::Active,
            active_secs: DEFAULT_TIMEOUT_SECS,
            passive_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TimeoutPolicy {
    /// Parse `<A|P|G>:<secs>`, `M:<active>,<passive>` or a bare `<secs>`.
    ///
    /// Malformed specs fall back to the default policy and non-positive
    /// durations fall back to the default duration; both log a warning.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let mut policy = Self::default();

        if spec.is_empty() {
            log::warn!("⚠️  Empty timeout spec, using default (A:{})", DEFAULT_TIMEOUT_SECS);
            return policy;
        }
        if spec.len() > MAX_TIMEOUT_SPEC_LEN {
            log::warn!("⚠️  Timeout spec too long: {:?}, using default", spec);
            return policy;
        }

        let Some((kind_part, secs_part)) = spec.split_once(':') else {
            // Bare number sets the active timeout
            policy.active_secs = validated_secs(spec, "active");
            return policy;
        };

        let kind = match kind_part.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('A') => TimeoutKind::Active,
            Some('P') => TimeoutKind::Passive,
            Some('G') => TimeoutKind::Global,
            Some('M') => TimeoutKind::ActivePassive,
            _ => {
                log::warn!("⚠️  Unknown timeout type {:?}, using default", kind_part);
                return policy;
            }
        };
        policy.kind = kind;

        match kind {
            TimeoutKind::Active | TimeoutKind::Global => {
                policy.active_secs = validated_secs(secs_part, "active");
            }
            TimeoutKind::Passive => {
                policy.passive_secs = validated_secs(secs_part, "passive");
            }
            TimeoutKind::ActivePassive => {
                let Some((active, passive)) = secs_part.split_once(',') else {
                    log::warn!("⚠️  Mixed timeout needs M:<active>,<passive>, got {:?}; using default", spec);
                    return Self::default();
                };
                policy.active_secs = validated_secs(active, "active");
                policy.passive_secs = validated_secs(passive, "passive");
            }
        }

        policy
    }
}

impl fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TimeoutKind::Active => write!(f, "active {}s", self.active_secs),
            TimeoutKind::Passive => write!(f, "passive {}s", self.passive_secs),
            TimeoutKind::Global => write!(f, "global {}s", self.active_secs),
            TimeoutKind::ActivePassive => {
                write!(f, "active {}s + passive {}s", self.active_secs, self.passive_secs)
            }
        }
    }
}

fn validated_secs(raw: &str, which: &str) -> u64 {
    match raw.trim().parse::<i64>() {
        Ok(secs) if secs > 0 => secs as u64,
        _ => {
            log::warn!(
                "⚠️  Invalid {} timeout {:?}, using default {}s",
                which,
                raw.trim(),
                DEFAULT_TIMEOUT_SECS
            );
            DEFAULT_TIMEOUT_SECS
        }
    }
}

/// Validated rule list plus timeout policy
#[derive(Debug, Clone, Default)]
pub struct RuleConfig {
    rules: Vec<AggregationRule>,
    timeout: TimeoutPolicy,
}

impl RuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Returns false (with a warning) if the rule was rejected.
    pub fn add_rule(&mut self, role: Role, field_name: &str) -> bool {
        let field_name = field_name.trim();

        if field_name.is_empty() {
            log::warn!("⚠️  Ignoring {} rule with empty field name", role);
            return false;
        }
        if [TIME_FIRST, TIME_LAST, COUNT].contains(&field_name) {
            log::warn!("⚠️  {} is managed by the aggregator, ignoring {} rule", field_name, role);
            return false;
        }
        if self.rules.iter().any(|r| r.field_name == field_name) {
            log::warn!("⚠️  Field {} already has a rule, ignoring {} rule", field_name, role);
            return false;
        }
        if self.rules.len() >= MAX_RULES {
            log::warn!("⚠️  At most {} rules supported, ignoring {} {}", MAX_RULES, role, field_name);
            return false;
        }

        self.rules.push(AggregationRule {
            role,
            field_name: field_name.to_string(),
        });
        true
    }

    pub fn with_rule(mut self, role: Role, field_name: &str) -> Self {
        self.add_rule(role, field_name);
        self
    }

    pub fn set_timeout(&mut self, spec: &str) {
        self.timeout = TimeoutPolicy::parse(spec);
    }

    pub fn with_timeout(mut self, spec: &str) -> Self {
        self.set_timeout(spec);
        self
    }

    pub fn rules(&self) -> &[AggregationRule] {
        &self.rules
    }

    pub fn timeout(&self) -> TimeoutPolicy {
        self.timeout
    }

    pub fn key_count(&self) -> usize {
        self.rules.iter().filter(|r| r.role == Role::Key).count()
    }

    /// Print configuration summary
    pub fn print(&self) {
        log::info!("📋 Aggregation rules:");
        for rule in &self.rules {
            log::info!("   ├─ {:<5} {}", rule.role.to_string(), rule.field_name);
        }
        if self.key_count() == 0 {
            log::info!("   ├─ (no key: all records share one aggregate)");
        }
        log::info!("   └─ Timeout: {}", self.timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.kind, TimeoutKind::Active);
        assert_eq!(policy.active_secs, 10);
        assert_eq!(policy.passive_secs, 10);
    }

    #[test]
    fn test_parse_typed_timeouts() {
        let p = TimeoutPolicy::parse("A:30");
        assert_eq!((p.kind, p.active_secs, p.passive_secs), (TimeoutKind::Active, 30, 10));

        let p = TimeoutPolicy::parse("p:5");
        assert_eq!((p.kind, p.active_secs, p.passive_secs), (TimeoutKind::Passive, 10, 5));

        let p = TimeoutPolicy::parse("G:60");
        assert_eq!((p.kind, p.active_secs), (TimeoutKind::Global, 60));

        let p = TimeoutPolicy::parse("m:20,4");
        assert_eq!((p.kind, p.active_secs, p.passive_secs), (TimeoutKind::ActivePassive, 20, 4));
    }

    #[test]
    fn test_parse_bare_number_is_active() {
        let p = TimeoutPolicy::parse("45");
        assert_eq!((p.kind, p.active_secs), (TimeoutKind::Active, 45));
    }

    #[test]
    fn test_parse_invalid_durations_fall_back() {
        // Test: Zero and negative durations are replaced by the default
        let p = TimeoutPolicy::parse("P:0");
        assert_eq!((p.kind, p.passive_secs), (TimeoutKind::Passive, DEFAULT_TIMEOUT_SECS));

        let p = TimeoutPolicy::parse("M:-5,7");
        assert_eq!((p.active_secs, p.passive_secs), (DEFAULT_TIMEOUT_SECS, 7));

        let p = TimeoutPolicy::parse("A:abc");
        assert_eq!(p.active_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_parse_malformed_specs_use_default_policy() {
        assert_eq!(TimeoutPolicy::parse("X:10"), TimeoutPolicy::default());
        assert_eq!(TimeoutPolicy::parse("M:10"), TimeoutPolicy::default());
        assert_eq!(TimeoutPolicy::parse(""), TimeoutPolicy::default());
        assert_eq!(TimeoutPolicy::parse("A:1000000000000000000000"), TimeoutPolicy::default());
    }

    #[test]
    fn test_rule_validation() {
        let mut config = RuleConfig::new();
        assert!(config.add_rule(Role::Key, "SRC_IP"));
        assert!(config.add_rule(Role::Value(FuncKind::Sum), "BYTES"));

        // Test: Reserved and duplicate fields are rejected
        assert!(!config.add_rule(Role::Value(FuncKind::Max), "TIME_LAST"));
        assert!(!config.add_rule(Role::Value(FuncKind::Sum), "COUNT"));
        assert!(!config.add_rule(Role::Value(FuncKind::Avg), "BYTES"));
        assert!(!config.add_rule(Role::Key, ""));

        assert_eq!(config.rules().len(), 2);
        assert_eq!(config.key_count(), 1);
        assert_eq!(config.rules()[1].role, Role::Value(FuncKind::Sum));
    }

    #[test]
    fn test_rule_limit() {
        let mut config = RuleConfig::new();
        for i in 0..MAX_RULES {
            assert!(config.add_rule(Role::Value(FuncKind::Sum), &format!("F{}", i)));
        }
        assert!(!config.add_rule(Role::Key, "ONE_TOO_MANY"));
        assert_eq!(config.rules().len(), MAX_RULES);
    }

    #[test]
    fn test_func_kind_names() {
        assert_eq!(FuncKind::from_str("OR"), Some(FuncKind::BitOr));
        assert_eq!(FuncKind::from_str("and"), Some(FuncKind::BitAnd));
        assert_eq!(FuncKind::from_str("median"), None);
    }
}
