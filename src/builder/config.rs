//! Declarative machine configuration.
//!
//! The same structures are produced by the fluent Rust API and by
//! deserializing JSON. Map-shaped sections (`states`, `on`, `after`) keep the
//! order in which entries were declared, since that order is the document
//! order the engine uses for priorities.

use crate::builder::error::DefinitionError;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Explicit kind of a state node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Atomic,
    Compound,
    Parallel,
    Final,
    History,
}

/// How much of a region a history node remembers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    /// Direct children of the parent only
    Shallow,
    /// Every atomic descendant of the parent
    Deep,
}

/// `history: true | false | "shallow" | "deep"`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryConfig {
    Flag(bool),
    Kind(HistoryKind),
}

impl HistoryConfig {
    pub fn kind(self) -> Option<HistoryKind> {
        match self {
            HistoryConfig::Flag(true) => Some(HistoryKind::Shallow),
            HistoryConfig::Flag(false) => None,
            HistoryConfig::Kind(kind) => Some(kind),
        }
    }
}

/// String-keyed map that preserves declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.0.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    OneOrMany::<T>::deserialize(deserializer).map(Vec::from)
}

/// One candidate transition.
///
/// In JSON a transition can be written as a bare target string, an object,
/// or an array of either.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionConfig {
    /// `sibling.child`, `.child`, or `#id.child`; empty for targetless
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<String>,
    /// Name of a guard registered in the machine options
    #[serde(default, alias = "cond", skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// State descriptor that must be active for the transition to be taken
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_state: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl TransitionConfig {
    /// Transition to a single target.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: vec![target.into()],
            ..Self::default()
        }
    }

    /// Transition without a target: runs actions only.
    pub fn targetless() -> Self {
        Self::default()
    }

    /// Add another target (for entering several parallel regions).
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target.push(target.into());
        self
    }

    pub fn guard(mut self, name: impl Into<String>) -> Self {
        self.guard = Some(name.into());
        self
    }

    pub fn in_state(mut self, descriptor: impl Into<String>) -> Self {
        self.in_state = Some(descriptor.into());
        self
    }

    pub fn action(mut self, name: impl Into<String>) -> Self {
        self.actions.push(name.into());
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = Some(internal);
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl From<&str> for TransitionConfig {
    fn from(target: &str) -> Self {
        TransitionConfig::to(target)
    }
}

impl From<String> for TransitionConfig {
    fn from(target: String) -> Self {
        TransitionConfig::to(target)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TransitionRepr {
    Target(String),
    Config(TransitionConfig),
}

impl From<TransitionRepr> for TransitionConfig {
    fn from(repr: TransitionRepr) -> Self {
        match repr {
            TransitionRepr::Target(target) => TransitionConfig::to(target),
            TransitionRepr::Config(config) => config,
        }
    }
}

/// Ordered candidate transitions for one selector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "OneOrMany<TransitionRepr>", into = "Vec<TransitionConfig>")]
pub struct Transitions(pub Vec<TransitionConfig>);

impl From<OneOrMany<TransitionRepr>> for Transitions {
    fn from(repr: OneOrMany<TransitionRepr>) -> Self {
        Transitions(
            Vec::from(repr)
                .into_iter()
                .map(TransitionConfig::from)
                .collect(),
        )
    }
}

impl From<Transitions> for Vec<TransitionConfig> {
    fn from(transitions: Transitions) -> Self {
        transitions.0
    }
}

impl From<TransitionConfig> for Transitions {
    fn from(transition: TransitionConfig) -> Self {
        Transitions(vec![transition])
    }
}

impl From<&str> for Transitions {
    fn from(target: &str) -> Self {
        Transitions(vec![TransitionConfig::to(target)])
    }
}

impl Transitions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransitionConfig> {
        self.0.iter()
    }

    pub fn push(&mut self, transition: TransitionConfig) {
        self.0.push(transition);
    }
}

/// A service invoked while its declaring node is active.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeConfig {
    /// Defaults to `<node id>:invocation[<index>]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of a service registered in the machine options
    pub src: String,
    #[serde(default, skip_serializing_if = "Transitions::is_empty")]
    pub on_done: Transitions,
    #[serde(default, skip_serializing_if = "Transitions::is_empty")]
    pub on_error: Transitions,
}

impl InvokeConfig {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn on_done(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_done.push(transition.into());
        self
    }

    pub fn on_error(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_error.push(transition.into());
        self
    }
}

/// Configuration of one state node and, recursively, its children.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateNodeConfig {
    /// Unique id for `#id` targeting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    /// Key of the initial child (compound nodes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryConfig>,
    /// Default target of a history node that has nothing recorded yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub states: OrderedMap<StateNodeConfig>,
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub on: OrderedMap<Transitions>,
    #[serde(default, skip_serializing_if = "Transitions::is_empty")]
    pub always: Transitions,
    /// Delay (milliseconds or a named delay) → transitions
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub after: OrderedMap<Transitions>,
    #[serde(default, skip_serializing_if = "Transitions::is_empty")]
    pub on_done: Transitions,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub invoke: Vec<InvokeConfig>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<String>,
    /// Name of the data mapper evaluated when this final node is entered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl StateNodeConfig {
    pub fn atomic() -> Self {
        Self::default()
    }

    pub fn compound(initial: impl Into<String>) -> Self {
        Self {
            initial: Some(initial.into()),
            ..Self::default()
        }
    }

    pub fn parallel() -> Self {
        Self {
            node_type: Some(NodeType::Parallel),
            ..Self::default()
        }
    }

    pub fn final_state() -> Self {
        Self {
            node_type: Some(NodeType::Final),
            ..Self::default()
        }
    }

    pub fn history(kind: HistoryKind) -> Self {
        Self {
            node_type: Some(NodeType::History),
            history: Some(HistoryConfig::Kind(kind)),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn state(mut self, key: impl Into<String>, config: StateNodeConfig) -> Self {
        self.states.insert(key, config);
        self
    }

    /// Append a candidate transition for an event type (`*` for any event).
    pub fn on(mut self, event: impl Into<String>, transition: impl Into<TransitionConfig>) -> Self {
        let event = event.into();
        let transition = transition.into();
        match self.on.get_mut(&event) {
            Some(existing) => existing.push(transition),
            None => self.on.insert(event, Transitions(vec![transition])),
        }
        self
    }

    pub fn always(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.always.push(transition.into());
        self
    }

    /// Delayed transition; `delay` is milliseconds or the name of a registered delay.
    pub fn after(mut self, delay: impl Into<String>, transition: impl Into<TransitionConfig>) -> Self {
        let delay = delay.into();
        let transition = transition.into();
        match self.after.get_mut(&delay) {
            Some(existing) => existing.push(transition),
            None => self.after.insert(delay, Transitions(vec![transition])),
        }
        self
    }

    pub fn after_ms(self, millis: u64, transition: impl Into<TransitionConfig>) -> Self {
        self.after(millis.to_string(), transition)
    }

    pub fn on_done(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_done.push(transition.into());
        self
    }

    pub fn entry(mut self, action: impl Into<String>) -> Self {
        self.entry.push(action.into());
        self
    }

    pub fn exit(mut self, action: impl Into<String>) -> Self {
        self.exit.push(action.into());
        self
    }

    pub fn invoke(mut self, invoke: InvokeConfig) -> Self {
        self.invoke.push(invoke);
        self
    }

    pub fn activity(mut self, name: impl Into<String>) -> Self {
        self.activities.push(name.into());
        self
    }

    pub fn data(mut self, mapper: impl Into<String>) -> Self {
        self.data = Some(mapper.into());
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn history_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Use this node as the root of a machine with the given id.
    pub fn into_machine(self, id: impl Into<String>) -> MachineConfig {
        MachineConfig::new(self.id(id))
    }
}

/// Top-level configuration: the root node plus machine-wide settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Path delimiter, `.` by default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    /// Reject events no node declares a transition for
    #[serde(default)]
    pub strict: bool,
    /// Initial context, decoded into the machine's context type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(flatten)]
    pub root: StateNodeConfig,
}

impl MachineConfig {
    pub fn new(root: StateNodeConfig) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    /// Parse a JSON machine configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use harel::builder::MachineConfig;
    ///
    /// let config = MachineConfig::from_json(r#"{
    ///     "id": "light",
    ///     "initial": "green",
    ///     "states": {
    ///         "green": { "on": { "TIMER": "yellow" } },
    ///         "yellow": { "on": { "TIMER": "red" } },
    ///         "red": {}
    ///     }
    /// }"#).unwrap();
    ///
    /// let keys: Vec<&str> = config.root.states.keys().collect();
    /// assert_eq!(keys, vec!["green", "yellow", "red"]);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, DefinitionError> {
        serde_json::to_string_pretty(self).map_err(|e| DefinitionError::Parse(e.to_string()))
    }

    pub fn id(&self) -> Option<&str> {
        self.root.id.as_deref()
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn states_keep_declaration_order() {
        let config: StateNodeConfig = serde_json::from_value(json!({
            "initial": "zulu",
            "states": { "zulu": {}, "alpha": {}, "mike": {} }
        }))
        .unwrap();

        let keys: Vec<&str> = config.states.keys().collect();
        assert_eq!(keys, vec!["zulu", "alpha", "mike"]);
    }

    #[test]
    fn text_and_value_loading_agree_on_document_order() {
        let text = r#"{
            "id": "m",
            "initial": "zulu",
            "states": {
                "zulu": { "on": { "ZED": "mike", "ALPHA": "alpha" } },
                "alpha": {},
                "mike": {}
            }
        }"#;
        let from_text = MachineConfig::from_json(text).unwrap();
        let value: Value = serde_json::from_str(text).unwrap();
        let from_value: MachineConfig = serde_json::from_value(value).unwrap();

        assert_eq!(from_value, from_text);
        let states: Vec<&str> = from_value.root.states.keys().collect();
        assert_eq!(states, vec!["zulu", "alpha", "mike"]);
        let events: Vec<&str> = from_value.root.states.get("zulu").unwrap().on.keys().collect();
        assert_eq!(events, vec!["ZED", "ALPHA"]);
    }

    #[test]
    fn transition_shorthands_parse() {
        let config: StateNodeConfig = serde_json::from_value(json!({
            "on": {
                "A": "next",
                "B": { "target": "next", "cond": "ready", "actions": "log" },
                "C": [{ "target": "x", "guard": "g" }, "y"],
                "D": { "target": ["#left", "#right"], "in": "#mode.on" }
            }
        }))
        .unwrap();

        let a = &config.on.get("A").unwrap().0;
        assert_eq!(a, &vec![TransitionConfig::to("next")]);

        let b = &config.on.get("B").unwrap().0[0];
        assert_eq!(b.guard.as_deref(), Some("ready"));
        assert_eq!(b.actions, vec!["log".to_string()]);

        let c = &config.on.get("C").unwrap().0;
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].guard.as_deref(), Some("g"));
        assert_eq!(c[1], TransitionConfig::to("y"));

        let d = &config.on.get("D").unwrap().0[0];
        assert_eq!(d.target, vec!["#left".to_string(), "#right".to_string()]);
        assert_eq!(d.in_state.as_deref(), Some("#mode.on"));
    }

    #[test]
    fn array_of_targets_is_not_mistaken_for_a_transition_object() {
        let transitions: Transitions = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(
            transitions.0,
            vec![TransitionConfig::to("a"), TransitionConfig::to("b")]
        );
    }

    #[test]
    fn history_flag_and_kind_parse() {
        let shallow: StateNodeConfig =
            serde_json::from_value(json!({ "type": "history", "history": true })).unwrap();
        assert_eq!(
            shallow.history.and_then(HistoryConfig::kind),
            Some(HistoryKind::Shallow)
        );

        let deep: StateNodeConfig =
            serde_json::from_value(json!({ "type": "history", "history": "deep" })).unwrap();
        assert_eq!(
            deep.history.and_then(HistoryConfig::kind),
            Some(HistoryKind::Deep)
        );
    }

    #[test]
    fn machine_settings_flatten_with_root() {
        let config = MachineConfig::from_json(
            r#"{ "id": "m", "version": "2", "strict": true, "context": { "n": 1 },
                 "initial": "a", "states": { "a": {} } }"#,
        )
        .unwrap();

        assert_eq!(config.id(), Some("m"));
        assert_eq!(config.version.as_deref(), Some("2"));
        assert!(config.strict);
        assert_eq!(config.context, Some(json!({ "n": 1 })));
        assert_eq!(config.root.initial.as_deref(), Some("a"));
    }

    #[test]
    fn fluent_builder_matches_json() {
        let built = StateNodeConfig::compound("green")
            .state("green", StateNodeConfig::atomic().on("TIMER", "yellow"))
            .state("yellow", StateNodeConfig::atomic().after_ms(500, "green"))
            .into_machine("light");

        let parsed = MachineConfig::from_json(
            r#"{ "id": "light", "initial": "green", "states": {
                "green": { "on": { "TIMER": "yellow" } },
                "yellow": { "after": { "500": "green" } }
            } }"#,
        )
        .unwrap();

        assert_eq!(built, parsed);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = StateNodeConfig::compound("idle")
            .state(
                "idle",
                StateNodeConfig::atomic().on("GO", TransitionConfig::to("busy").guard("ready")),
            )
            .state(
                "busy",
                StateNodeConfig::atomic().invoke(InvokeConfig::new("work").on_done("idle")),
            )
            .into_machine("worker")
            .version("1");

        let json = config.to_json().unwrap();
        let back = MachineConfig::from_json(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = MachineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }
}
