//! The `switch` router: evaluates an ordered list of rules
//! against a resolved message property and dispatches to the matching
//! output port(s).

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{ExecutionError, Result};
use crate::globals;
use crate::message::Message;
use crate::node::{
    Category, Config, Dispatch, ExecContext, Executor, ExecutorFactory, NodeInfo, PortSchema,
    PropertySchema,
};
use crate::value::Value;

/// Where `Switch::execute` resolves `property` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertySource {
    Msg,
    Flow,
    Global,
}

#[derive(Debug, Clone)]
enum RuleKind {
    Eq(String, bool),
    Neq(String, bool),
    Lt(f64),
    Lte(f64),
    Gt(f64),
    Gte(f64),
    Between(f64, f64),
    Contains(String),
    Regex(Regex),
    IsTrue,
    IsFalse,
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,
    IsType(String),
    Head,
    Tail,
    Index(usize),
    Else,
}

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    output: usize,
}

/// Parses one rule entry out of a node's config (rule kinds
/// eq/neq/lt/lte/gt/gte/btwn/cont/regex/true/false/null/nnull/empty/
/// nempty/istype/head/tail/index/else).
fn parse_rule(entry: &Value, output: usize) -> Result<Rule> {
    let Value::Object(obj) = entry else {
        return Err(ExecutionError::RuleInvalid("rule entry must be an object".into()));
    };
    let kind_str = obj
        .get("kind")
        .map(Value::stringify)
        .ok_or_else(|| ExecutionError::RuleInvalid("rule missing 'kind'".into()))?;
    let value = obj.get("value").cloned();
    let case_insensitive = matches!(obj.get("case"), Some(Value::Bool(true)));

    let kind = match kind_str.as_str() {
        "eq" => RuleKind::Eq(
            value.ok_or_else(|| missing("value", "eq"))?.stringify(),
            case_insensitive,
        ),
        "neq" => RuleKind::Neq(
            value.ok_or_else(|| missing("value", "neq"))?.stringify(),
            case_insensitive,
        ),
        "lt" => RuleKind::Lt(numeric(&value, "lt")?),
        "lte" => RuleKind::Lte(numeric(&value, "lte")?),
        "gt" => RuleKind::Gt(numeric(&value, "gt")?),
        "gte" => RuleKind::Gte(numeric(&value, "gte")?),
        "btwn" => {
            let lo = obj
                .get("low")
                .and_then(Value::as_f64)
                .ok_or_else(|| missing("low", "btwn"))?;
            let hi = obj
                .get("high")
                .and_then(Value::as_f64)
                .ok_or_else(|| missing("high", "btwn"))?;
            RuleKind::Between(lo, hi)
        }
        "cont" => RuleKind::Contains(value.map(|v| v.stringify()).ok_or_else(|| missing("value", "cont"))?),
        "regex" => {
            let pattern = value.map(|v| v.stringify()).ok_or_else(|| missing("value", "regex"))?;
            let re = Regex::new(&pattern)
                .map_err(|e| ExecutionError::RuleInvalid(format!("invalid regex: {e}")))?;
            RuleKind::Regex(re)
        }
        "true" => RuleKind::IsTrue,
        "false" => RuleKind::IsFalse,
        "null" => RuleKind::IsNull,
        "nnull" => RuleKind::IsNotNull,
        "empty" => RuleKind::IsEmpty,
        "nempty" => RuleKind::IsNotEmpty,
        "istype" => RuleKind::IsType(value.map(|v| v.stringify()).ok_or_else(|| missing("value", "istype"))?),
        "head" => RuleKind::Head,
        "tail" => RuleKind::Tail,
        "index" => RuleKind::Index(
            value
                .and_then(|v| v.as_f64())
                .ok_or_else(|| missing("value", "index"))? as usize,
        ),
        "else" => RuleKind::Else,
        other => return Err(ExecutionError::RuleInvalid(format!("unknown rule kind '{other}'"))),
    };
    Ok(Rule { kind, output })
}

fn missing(field: &str, kind: &str) -> ExecutionError {
    ExecutionError::RuleInvalid(format!("rule '{kind}' missing '{field}'"))
}

fn numeric(value: &Option<Value>, kind: &str) -> Result<f64> {
    value
        .as_ref()
        .and_then(Value::as_f64)
        .ok_or_else(|| missing("value", kind))
}

/// Stringified equality per the router's `eq`/`neq` rule kinds, with
/// optional case folding.
fn eq_stringified(resolved: &Value, target: &str, case_insensitive: bool) -> bool {
    let s = resolved.stringify();
    if case_insensitive {
        s.eq_ignore_ascii_case(target)
    } else {
        s == target
    }
}

fn matches(kind: &RuleKind, resolved: &Value, index_in_stream: usize, is_last: bool) -> bool {
    match kind {
        RuleKind::Eq(v, ci) => eq_stringified(resolved, v, *ci),
        RuleKind::Neq(v, ci) => !eq_stringified(resolved, v, *ci),
        RuleKind::Lt(n) => resolved.as_f64().is_some_and(|x| x < *n),
        RuleKind::Lte(n) => resolved.as_f64().is_some_and(|x| x <= *n),
        RuleKind::Gt(n) => resolved.as_f64().is_some_and(|x| x > *n),
        RuleKind::Gte(n) => resolved.as_f64().is_some_and(|x| x >= *n),
        RuleKind::Between(lo, hi) => resolved.as_f64().is_some_and(|x| x >= *lo && x <= *hi),
        RuleKind::Contains(needle) => resolved.stringify().contains(needle.as_str()),
        RuleKind::Regex(re) => re.is_match(&resolved.stringify()),
        RuleKind::IsTrue => resolved.as_bool_like() == Some(true),
        RuleKind::IsFalse => resolved.as_bool_like() == Some(false),
        RuleKind::IsNull => resolved.is_null(),
        RuleKind::IsNotNull => !resolved.is_null(),
        RuleKind::IsEmpty => resolved.is_empty_value(),
        RuleKind::IsNotEmpty => !resolved.is_empty_value(),
        RuleKind::IsType(t) => resolved.type_name() == t,
        RuleKind::Head => index_in_stream == 0,
        RuleKind::Tail => is_last,
        RuleKind::Index(i) => index_in_stream == *i,
        RuleKind::Else => true,
    }
}

#[derive(Debug)]
pub struct Switch {
    property: String,
    property_source: PropertySource,
    flow_vars: IndexMap<String, Value>,
    rules: Vec<Rule>,
    check_all: bool,
    repair: bool,
}

impl Switch {
    fn new() -> Self {
        Self {
            property: "topic".to_string(),
            property_source: PropertySource::Msg,
            flow_vars: IndexMap::new(),
            rules: Vec::new(),
            check_all: false,
            repair: false,
        }
    }

    /// Resolves `property` against the configured source: the arriving
    /// message, this node's own `flow_vars` config, or the process-wide
    /// global store.
    fn resolve(&self, msg: &Message) -> Value {
        match self.property_source {
            PropertySource::Msg => msg
                .resolve_property(&self.property)
                .map(|r| r.as_value())
                .unwrap_or(Value::Null),
            PropertySource::Flow => self.flow_vars.get(&self.property).cloned().unwrap_or(Value::Null),
            PropertySource::Global => globals::get(&self.property).unwrap_or(Value::Null),
        }
    }
}

impl Executor for Switch {
    fn init(&mut self, config: &Config) -> Result<()> {
        if let Some(Value::Str(p)) = config.get("property") {
            self.property = p.clone();
        }
        self.property_source = match config.get("property_source") {
            Some(Value::Str(s)) if s == "flow" => PropertySource::Flow,
            Some(Value::Str(s)) if s == "global" => PropertySource::Global,
            _ => PropertySource::Msg,
        };
        if let Some(Value::Object(vars)) = config.get("flow_vars") {
            self.flow_vars = vars.clone();
        }
        self.check_all = matches!(config.get("check_all"), Some(Value::Bool(true)));
        self.repair = matches!(config.get("repair"), Some(Value::Bool(true)));
        let Some(Value::Array(entries)) = config.get("rules") else {
            return Err(ExecutionError::RequiredFieldMissing("rules".to_string()));
        };
        self.rules = entries
            .iter()
            .enumerate()
            .map(|(i, e)| parse_rule(e, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// `head`/`tail`/`index` rule kinds need a sequence position; without
    /// split metadata every message is treated as a one-message sequence
    /// (index 0, also the tail) so those rules degrade sensibly instead of
    /// never matching.
    ///
    /// `else` is evaluated only as a fallback once every other rule has
    /// been tried and none matched; `repair` short-circuits that fallback
    /// and drops the message instead.
    fn execute(&mut self, _ctx: &ExecContext, msg: Message) -> Result<Dispatch> {
        let resolved = self.resolve(&msg);

        let (index_in_stream, is_last) = msg
            .parts
            .as_ref()
            .map(|p| (p.index, p.index + 1 == p.count))
            .unwrap_or((0, true));

        let mut dispatch = Dispatch::default();
        let mut matched_any = false;
        for rule in &self.rules {
            if matches!(rule.kind, RuleKind::Else) {
                continue;
            }
            if matches(&rule.kind, &resolved, index_in_stream, is_last) {
                matched_any = true;
                dispatch.push(rule.output, msg.clone());
                if !self.check_all {
                    break;
                }
            }
        }

        if !matched_any && !self.repair {
            if let Some(else_rule) = self.rules.iter().find(|r| matches!(r.kind, RuleKind::Else)) {
                dispatch.push(else_rule.output, msg);
            }
        }

        Ok(dispatch)
    }
}

pub fn node_info(num_outputs: usize) -> NodeInfo {
    NodeInfo {
        node_type: "switch".to_string(),
        name: "Switch".to_string(),
        category: Category::Function,
        description: "Routes a message to one or more outputs based on an ordered rule list."
            .to_string(),
        icon: None,
        color: None,
        properties: vec![
            PropertySchema::string("property").with_default(Value::from("topic")),
            PropertySchema::select(
                "property_source",
                vec![Value::from("msg"), Value::from("flow"), Value::from("global")],
            )
            .with_default(Value::from("msg")),
            PropertySchema::object("flow_vars")
                .with_description("variables resolved when property_source is 'flow'"),
            PropertySchema::boolean("check_all").with_default(Value::Bool(false)),
            PropertySchema::boolean("repair")
                .with_default(Value::Bool(false))
                .with_description("drop the message on no match instead of falling back to 'else'"),
            PropertySchema::string("rules").required(),
        ],
        inputs: vec![PortSchema::new("in")],
        outputs: (0..num_outputs.max(1)).map(|i| PortSchema::new(format!("out{i}"))).collect(),
    }
}

#[derive(Debug)]
pub struct SwitchFactory;

impl ExecutorFactory for SwitchFactory {
    fn create(&self) -> Box<dyn Executor> {
        Box::new(Switch::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use indexmap::IndexMap;

    fn ctx() -> ExecContext {
        ExecContext::new(CancelSource::new().token())
    }

    fn rule(kind: &str, value: Option<Value>) -> Value {
        let mut m = IndexMap::new();
        m.insert("kind".to_string(), Value::from(kind));
        if let Some(v) = value {
            m.insert("value".to_string(), v);
        }
        Value::Object(m)
    }

    #[test]
    fn eq_rule_routes_to_the_matching_output_and_stops() {
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("payload"));
        config.insert(
            "rules".to_string(),
            Value::Array(vec![
                rule("eq", Some(Value::Int(1))),
                rule("else", None),
            ]),
        );
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Int(1))).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
        assert_eq!(dispatch.outputs[0].0, 0);
    }

    #[test]
    fn check_all_evaluates_every_rule_instead_of_stopping_at_first_match() {
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("payload"));
        config.insert("check_all".to_string(), Value::Bool(true));
        config.insert(
            "rules".to_string(),
            Value::Array(vec![
                rule("gt", Some(Value::Int(0))),
                rule("gte", Some(Value::Int(5))),
            ]),
        );
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Int(5))).unwrap();
        assert_eq!(dispatch.outputs.len(), 2);
    }

    #[test]
    fn else_only_fires_as_a_fallback_when_nothing_else_matched() {
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("payload"));
        config.insert("check_all".to_string(), Value::Bool(true));
        config.insert(
            "rules".to_string(),
            Value::Array(vec![rule("gt", Some(Value::Int(0))), rule("else", None)]),
        );
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Int(5))).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);

        let dispatch = node.execute(&ctx(), Message::new(Value::Int(-1))).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
        assert_eq!(dispatch.outputs[0].0, 1);
    }

    #[test]
    fn repair_drops_the_message_instead_of_falling_back_to_else() {
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("payload"));
        config.insert("repair".to_string(), Value::Bool(true));
        config.insert(
            "rules".to_string(),
            Value::Array(vec![rule("gt", Some(Value::Int(0))), rule("else", None)]),
        );
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Int(-1))).unwrap();
        assert!(dispatch.outputs.is_empty());
    }

    #[test]
    fn eq_rule_compares_stringified_values_across_types() {
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("payload"));
        config.insert(
            "rules".to_string(),
            Value::Array(vec![rule("eq", Some(Value::from("10")))]),
        );
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Int(10))).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
    }

    #[test]
    fn eq_rule_case_option_folds_ascii_case() {
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("payload"));
        let mut rule_entry = IndexMap::new();
        rule_entry.insert("kind".to_string(), Value::from("eq"));
        rule_entry.insert("value".to_string(), Value::from("ON"));
        rule_entry.insert("case".to_string(), Value::Bool(true));
        config.insert("rules".to_string(), Value::Array(vec![Value::Object(rule_entry)]));
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::from("on"))).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
    }

    #[test]
    fn flow_property_source_resolves_against_flow_vars_not_the_message() {
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("mode"));
        config.insert("property_source".to_string(), Value::from("flow"));
        let mut vars = IndexMap::new();
        vars.insert("mode".to_string(), Value::from("armed"));
        config.insert("flow_vars".to_string(), Value::Object(vars));
        config.insert(
            "rules".to_string(),
            Value::Array(vec![rule("eq", Some(Value::from("armed")))]),
        );
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Int(999))).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
    }

    #[test]
    fn global_property_source_resolves_against_the_process_wide_store() {
        crate::globals::set("switch-test-alarm", Value::from("triggered"));
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("switch-test-alarm"));
        config.insert("property_source".to_string(), Value::from("global"));
        config.insert(
            "rules".to_string(),
            Value::Array(vec![rule("eq", Some(Value::from("triggered")))]),
        );
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Null)).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
    }

    #[test]
    fn regex_rule_matches_against_the_stringified_property() {
        let mut node = Switch::new();
        let mut config = Config::new();
        config.insert("property".to_string(), Value::from("payload"));
        config.insert(
            "rules".to_string(),
            Value::Array(vec![rule("regex", Some(Value::from("^sensor-\\d+$")))]),
        );
        node.init(&config).unwrap();
        let dispatch = node
            .execute(&ctx(), Message::new(Value::from("sensor-42")))
            .unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
    }

    #[test]
    fn missing_rules_config_is_a_required_field_error() {
        let mut node = Switch::new();
        let err = node.init(&Config::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RequiredFieldMissing);
    }

    #[test]
    fn unknown_rule_kind_is_rule_invalid() {
        assert!(matches!(
            parse_rule(&rule("bogus", None), 0),
            Err(ExecutionError::RuleInvalid(_))
        ));
    }
}
