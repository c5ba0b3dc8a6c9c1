use crate::console::format_block_time;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type ValueFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;
type ConditionFn = Arc<dyn Fn() -> Option<bool> + Send + Sync>;

/// A named source of text or of a yes/no decision.
///
/// Functions are called at most once per compile. Returning `None` means the
/// value is not available, which fails the compile.
#[derive(Clone)]
pub enum Binding {
    Value(ValueFn),
    Condition(ConditionFn),
}

impl Binding {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Condition(_) => "condition",
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding::{}", self.kind())
    }
}

/// Name → binding table consulted by [`Template::compile`](super::Template::compile).
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    entries: BTreeMap<String, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to a lazily computed value.
    #[must_use]
    pub fn value<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Binding::Value(Arc::new(f)));
        self
    }

    /// Bind `name` to fixed text.
    #[must_use]
    pub fn constant(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        self.value(name, move || Some(value.clone()))
    }

    /// Bind `name` to a lazily computed condition.
    #[must_use]
    pub fn condition<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Option<bool> + Send + Sync + 'static,
    {
        self.entries
            .insert(name.into(), Binding::Condition(Arc::new(f)));
        self
    }

    /// Bind `name` to a fixed condition.
    #[must_use]
    pub fn flag(self, name: impl Into<String>, enabled: bool) -> Self {
        self.condition(name, move || Some(enabled))
    }

    /// Add every entry of `other`, replacing same-named entries.
    #[must_use]
    pub fn extend(mut self, other: Bindings) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// `os`, `arch` and `niltime` for the current host.
    #[must_use]
    pub fn with_host_defaults(self) -> Self {
        self.constant("os", std::env::consts::OS)
            .constant("arch", std::env::consts::ARCH)
            .constant("niltime", format_block_time(0))
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
