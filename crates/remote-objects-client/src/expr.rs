//! Deferred operation chains and their rendering to expression text.

use std::{fmt::Write, sync::Arc};

use serde_json::Value;

/// Argument of a call, construction or assignment.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Plain data, rendered as a literal.
    Value(Value),
    /// Another remote value, inlined by its expression.
    Chain(Chain),
    /// Source text inlined verbatim, e.g. a closure `|x| x * 2`.
    Script(String),
}

impl Arg {
    /// Source text evaluated on the server.
    #[must_use]
    pub fn script(text: impl Into<String>) -> Self {
        Self::Script(text.into())
    }

    fn render(&self, preludes: &mut Vec<String>) -> String {
        match self {
            Self::Value(value) => literal(value),
            Self::Chain(chain) => chain.render(preludes),
            Self::Script(text) => text.clone(),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<Chain> for Arg {
    fn from(chain: Chain) -> Self {
        Self::Chain(chain)
    }
}

#[derive(Debug)]
enum Link {
    Root(String),
    Get(Chain, String),
    Set(Chain, String, Arg),
    Call(Chain, Vec<Arg>),
    Construct {
        callee: Chain,
        slot: String,
        args: Vec<Arg>,
    },
}

/// Immutable list of deferred operations.
///
/// Extending a chain never modifies it, so one chain can be the parent of
/// many others.
#[derive(Debug, Clone)]
pub struct Chain(Arc<Link>);

impl Chain {
    /// Chain starting from raw expression text.
    #[must_use]
    pub fn root(text: impl Into<String>) -> Self {
        Self(Arc::new(Link::Root(text.into())))
    }

    #[must_use]
    pub fn get(&self, key: impl Into<String>) -> Self {
        Self(Arc::new(Link::Get(self.clone(), key.into())))
    }

    #[must_use]
    pub fn set(&self, key: impl Into<String>, value: Arg) -> Self {
        Self(Arc::new(Link::Set(self.clone(), key.into(), value)))
    }

    #[must_use]
    pub fn call(&self, args: Vec<Arg>) -> Self {
        Self(Arc::new(Link::Call(self.clone(), args)))
    }

    /// Construct by calling this chain once and memoizing the value in
    /// `slot`, an assignable expression.
    #[must_use]
    pub fn construct(&self, slot: impl Into<String>, args: Vec<Arg>) -> Self {
        Self(Arc::new(Link::Construct {
            callee: self.clone(),
            slot: slot.into(),
            args,
        }))
    }

    /// Complete program text: construction preludes, then the expression.
    #[must_use]
    pub fn program(&self) -> String {
        let mut preludes = Vec::new();
        let expression = self.render(&mut preludes);
        let mut program = String::new();
        for prelude in preludes {
            let _ = writeln!(program, "{prelude}");
        }
        program.push_str(&expression);
        program
    }

    /// Text that removes the entry this chain addresses from its container.
    pub(crate) fn removal(&self) -> Option<String> {
        match &*self.0 {
            Link::Get(parent, key) => {
                let mut preludes = Vec::new();
                let target = parent.render(&mut preludes);
                preludes.push(format!("{target}.remove({})", string_literal(key)));
                Some(preludes.join("\n"))
            }
            Link::Root(text) => {
                let (target, key) = split_index(text)?;
                Some(format!("{target}.remove({key})"))
            }
            Link::Construct { slot, .. } => {
                let (target, key) = split_index(slot)?;
                Some(format!("{target}.remove({key})"))
            }
            Link::Set(..) | Link::Call(..) => None,
        }
    }

    fn render(&self, preludes: &mut Vec<String>) -> String {
        match &*self.0 {
            Link::Root(text) => text.clone(),
            Link::Get(parent, key) => member(&parent.render(preludes), key),
            Link::Set(parent, key, value) => {
                let target = member(&parent.render(preludes), key);
                format!("{target} = {}", value.render(preludes))
            }
            Link::Call(callee, args) => {
                let target = callee.render(preludes);
                let args = render_args(args, preludes);
                match &*callee.0 {
                    Link::Get(_, key) if is_identifier(key) => format!("{target}({args})"),
                    Link::Root(name) if is_identifier(name) => format!("{target}({args})"),
                    _ => format!("{target}.call({args})"),
                }
            }
            Link::Construct { callee, slot, args } => {
                let value = callee.call(args.clone()).render(preludes);
                let prelude = format!("if type_of({slot}) == \"()\" {{ {slot} = {value}; }}");
                if !preludes.contains(&prelude) {
                    preludes.push(prelude);
                }
                slot.clone()
            }
        }
    }
}

fn render_args(args: &[Arg], preludes: &mut Vec<String>) -> String {
    args.iter()
        .map(|arg| arg.render(preludes))
        .collect::<Vec<_>>()
        .join(", ")
}

fn member(target: &str, key: &str) -> String {
    if is_identifier(key) {
        format!("{target}.{key}")
    } else {
        format!("{target}[{}]", string_literal(key))
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// `target["key"]` split into its parts, with the key still quoted.
fn split_index(text: &str) -> Option<(&str, &str)> {
    let body = text.strip_suffix("\"]")?;
    let bytes = body.as_bytes();
    let open = (0..bytes.len()).rev().find(|&i| {
        let slashes = bytes[..i].iter().rev().take_while(|&&b| b == b'\\').count();
        bytes[i] == b'"' && slashes % 2 == 0
    })?;
    let target = body[..open].strip_suffix('[')?;
    (!target.is_empty()).then(|| (target, &text[open..text.len() - 1]))
}

/// Rhai string literal.
#[must_use]
pub fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Rhai literal for a JSON value.
#[must_use]
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "()".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => float_literal(f),
            (None, None) => n.to_string(),
        },
        Value::String(s) => string_literal(s),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(key, value)| format!("{}: {}", string_literal(key), literal(value)))
                .collect();
            format!("#{{{}}}", entries.join(", "))
        }
    }
}

fn float_literal(f: f64) -> String {
    let text = format!("{f:?}");
    if text.contains('.') {
        text
    } else if let Some((mantissa, exponent)) = text.split_once('e') {
        format!("{mantissa}.0e{exponent}")
    } else {
        format!("{text}.0")
    }
}
