/// Template resolution for action configs
///
/// Renders `{{path.to.field}}` placeholders with minijinja against the event and
/// the outputs of nodes visited earlier on the same path. Resolution never fails:
/// an unknown path becomes an empty string and is reported back as missing.

use crate::automation::types::{ContextMap, DomainEvent, Scalar};
use minijinja::value::{Object, Value};
use minijinja::{Environment, UndefinedBehavior};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

const EVENT_BUILTINS: [&str; 5] = [
    "tenant_id",
    "entity_reference",
    "trigger_type",
    "correlation_id",
    "occurred_at",
];

/// Outputs of previously visited nodes, keyed by node id
pub type NodeOutputs = BTreeMap<String, ContextMap>;

/// Everything a placeholder or condition path can refer to
///
/// Lookup order:
/// - `event.<key>`: event context, then event built-ins (tenant_id, entity_reference, ...)
/// - `<node_id>.<key>`: output of a node visited earlier on this path
/// - `<key>`: event context
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    pub event: &'a DomainEvent,
    pub outputs: &'a NodeOutputs,
}

impl<'a> TemplateScope<'a> {
    pub fn new(event: &'a DomainEvent, outputs: &'a NodeOutputs) -> Self {
        Self { event, outputs }
    }

    pub fn lookup(&self, path: &str) -> Option<Scalar> {
        let path = path.trim();

        if let Some(field) = path.strip_prefix("event.") {
            return self
                .event
                .context
                .get(field)
                .cloned()
                .or_else(|| self.event_builtin(field));
        }

        if let Some((head, tail)) = path.split_once('.') {
            if let Some(output) = self.outputs.get(head) {
                return output.get(tail).cloned();
            }
        }

        self.event.context.get(path).cloned()
    }

    /// Scope as a minijinja context
    pub fn to_value(&self) -> Value {
        let mut paths = ScopePaths::default();
        for (key, value) in &self.event.context {
            let routed_to_output = key
                .split_once('.')
                .is_some_and(|(head, _)| self.outputs.contains_key(head));
            if !routed_to_output {
                paths.values.insert(key.clone(), value.clone());
            }
            paths.values.insert(format!("event.{}", key), value.clone());
        }
        for field in EVENT_BUILTINS {
            if let Some(value) = self.event_builtin(field) {
                paths.values.entry(format!("event.{}", field)).or_insert(value);
            }
        }
        for (node_id, output) in self.outputs {
            for (key, value) in output {
                paths.values.insert(format!("{}.{}", node_id, key), value.clone());
            }
        }

        Value::from_object(PathSegment {
            paths: Arc::new(paths),
            prefix: None,
        })
    }

    /// Referenced paths the scope cannot resolve, in order of first appearance
    pub fn missing(&self, source: &str, referenced: HashSet<String>) -> Vec<String> {
        let mut missing: Vec<String> = referenced
            .into_iter()
            .filter(|path| self.lookup(path).is_none())
            .collect();
        missing.sort_by_key(|path| (source.find(path.as_str()).unwrap_or(usize::MAX), path.clone()));
        missing
    }

    fn event_builtin(&self, field: &str) -> Option<Scalar> {
        let event = self.event;
        match field {
            "tenant_id" => Some(Scalar::from(event.tenant_id.as_str())),
            "entity_reference" => Some(Scalar::from(event.entity_reference.as_str())),
            "trigger_type" => Some(Scalar::from(event.trigger_type.as_str())),
            "correlation_id" => event.correlation_id.as_deref().map(Scalar::from),
            "occurred_at" => Some(Scalar::from(event.occurred_at.to_rfc3339())),
            _ => None,
        }
    }
}

/// Result of rendering one template string
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    /// Placeholder paths that could not be resolved (substituted with "")
    pub missing: Vec<String>,
}

/// Shared minijinja environment for action templates and condition expressions
///
/// Undefined values are chainable and print as nothing, `none` prints as nothing,
/// and a trailing newline is kept so bodies go out exactly as written.
pub fn environment() -> &'static Environment<'static> {
    static ENVIRONMENT: OnceLock<Environment<'static>> = OnceLock::new();
    ENVIRONMENT.get_or_init(|| {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_keep_trailing_newline(true);
        env.set_formatter(|out, state, value| {
            if value.is_none() {
                return Ok(());
            }
            minijinja::escape_formatter(out, state, value)
        });
        env
    })
}

/// Render a template against the scope
///
/// Placeholders may carry surrounding whitespace (`{{ event.username }}`) and
/// filters (`{{ event.username | upper }}`). A trailing unterminated `{{` is
/// copied through literally; any other template syntax error leaves the whole
/// text unrendered.
pub fn render(template: &str, scope: &TemplateScope<'_>) -> Rendered {
    let (head, literal_tail) = split_unterminated(template);

    let compiled = match environment().template_from_str(head) {
        Ok(compiled) => compiled,
        Err(e) => {
            tracing::warn!("⚠️ Template is not valid, sending it unrendered: {}", e);
            return Rendered {
                text: template.to_string(),
                missing: Vec::new(),
            };
        }
    };

    let missing = scope.missing(head, compiled.undeclared_variables(true));
    for path in &missing {
        tracing::warn!("⚠️ Unresolved template placeholder '{{{{{}}}}}', substituting empty string", path);
    }

    match compiled.render(scope.to_value()) {
        Ok(mut text) => {
            text.push_str(literal_tail);
            Rendered { text, missing }
        }
        Err(e) => {
            tracing::warn!("⚠️ Template failed to render, sending it unrendered: {}", e);
            Rendered {
                text: template.to_string(),
                missing,
            }
        }
    }
}

/// Split off a trailing `{{` that is never closed
fn split_unterminated(template: &str) -> (&str, &str) {
    match template.rfind("{{") {
        Some(open) if !template[open..].contains("}}") => template.split_at(open),
        _ => (template, ""),
    }
}

/// Every resolvable path of a scope, flattened the way `TemplateScope::lookup` sees it
#[derive(Debug, Default)]
struct ScopePaths {
    values: BTreeMap<String, Scalar>,
}

impl ScopePaths {
    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{}.", path);
        self.values
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }
}

/// One segment of a dotted path, exposed to minijinja as a map
///
/// `fetch.body.user.id` walks root -> `fetch` -> `fetch.body` -> ... and ends at
/// the scalar. A segment that is both a value and a prefix (an action's raw
/// `body` next to its flattened `body.*` fields) renders as its own value.
#[derive(Debug)]
struct PathSegment {
    paths: Arc<ScopePaths>,
    prefix: Option<String>,
}

impl Object for PathSegment {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str().map(str::to_string).unwrap_or_else(|| key.to_string());
        let path = match &self.prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key,
        };

        if self.paths.has_children(&path) {
            return Some(Value::from_object(PathSegment {
                paths: self.paths.clone(),
                prefix: Some(path),
            }));
        }
        self.paths.values.get(&path).map(scalar_value)
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix.as_ref().and_then(|prefix| self.paths.values.get(prefix)) {
            Some(value) => f.write_str(&value.render()),
            None => Ok(()),
        }
    }
}

fn scalar_value(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::from(()),
        Scalar::Bool(b) => Value::from(*b),
        Scalar::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Value::from(*n as i64),
        Scalar::Number(n) => Value::from(*n),
        Scalar::String(s) => Value::from(s.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::types::TriggerKind;

    fn event() -> DomainEvent {
        DomainEvent::new(TriggerKind::UserExpired, "tenant-a", "user-7")
            .with_context("username", "john")
            .with_context("balance", 500i64)
    }

    #[test]
    fn resolves_event_fields() {
        let event = event();
        let outputs = NodeOutputs::new();
        let scope = TemplateScope::new(&event, &outputs);

        let rendered = render("https://x/{{event.username}}", &scope);
        assert_eq!(rendered.text, "https://x/john");
        assert!(rendered.missing.is_empty());
    }

    #[test]
    fn missing_field_resolves_to_empty_string() {
        let event = event();
        let outputs = NodeOutputs::new();
        let scope = TemplateScope::new(&event, &outputs);

        let rendered = render("https://x/{{event.nickname}}", &scope);
        assert_eq!(rendered.text, "https://x/");
        assert_eq!(rendered.missing, vec!["event.nickname".to_string()]);
    }

    #[test]
    fn resolves_builtins_bare_keys_and_node_outputs() {
        let event = event();
        let mut outputs = NodeOutputs::new();
        let mut fetch = ContextMap::new();
        fetch.insert("status_code".to_string(), Scalar::Number(201.0));
        outputs.insert("fetch".to_string(), fetch);
        let scope = TemplateScope::new(&event, &outputs);

        let rendered = render(
            "{{ event.entity_reference }}|{{balance}}|{{fetch.status_code}}|{{event.trigger_type}}",
            &scope,
        );
        assert_eq!(rendered.text, "user-7|500|201|user-expired");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let event = event();
        let outputs = NodeOutputs::new();
        let scope = TemplateScope::new(&event, &outputs);

        let rendered = render("a {{event.username}} b {{oops", &scope);
        assert_eq!(rendered.text, "a john b {{oops");
        assert!(rendered.missing.is_empty());
    }

    #[test]
    fn unknown_node_prefix_falls_back_to_context() {
        let event = event().with_context("plan.name", "gold");
        let outputs = NodeOutputs::new();
        let scope = TemplateScope::new(&event, &outputs);

        assert_eq!(render("{{plan.name}}", &scope).text, "gold");
    }

    #[test]
    fn json_bodies_keep_their_bytes() {
        let event = event();
        let outputs = NodeOutputs::new();
        let scope = TemplateScope::new(&event, &outputs);

        let rendered = render("{\"user\":{\"name\":\"{{event.username}}\",\"balance\":{{balance}}}}\n", &scope);
        assert_eq!(rendered.text, "{\"user\":{\"name\":\"john\",\"balance\":500}}\n");
    }

    #[test]
    fn filters_apply_and_missing_paths_keep_template_order() {
        let event = event();
        let outputs = NodeOutputs::new();
        let scope = TemplateScope::new(&event, &outputs);

        assert_eq!(render("{{ event.username | upper }}", &scope).text, "JOHN");

        let rendered = render("{{ zeta }}/{{ alpha.id }}/{{ event.username }}", &scope);
        assert_eq!(rendered.text, "//john");
        assert_eq!(rendered.missing, vec!["zeta".to_string(), "alpha.id".to_string()]);
    }

    #[test]
    fn raw_body_and_flattened_fields_of_one_output() {
        let event = event();
        let mut outputs = NodeOutputs::new();
        let mut login = ContextMap::new();
        login.insert("body".to_string(), Scalar::from(r#"{"token":"abc"}"#));
        login.insert("body.token".to_string(), Scalar::from("abc"));
        outputs.insert("login".to_string(), login);
        let scope = TemplateScope::new(&event, &outputs);

        let rendered = render("{{login.body.token}} {{login.body}}", &scope);
        assert_eq!(rendered.text, r#"abc {"token":"abc"}"#);
        assert!(rendered.missing.is_empty());
    }
}
