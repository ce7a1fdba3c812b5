//! Values captured at one hit of one instrument on one thread.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    LocalVariable,
    InstanceField,
    StaticField,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Captured<R> {
    /// Declared type as written in source, e.g. `int` or `java.util.List`.
    pub type_name: String,
    /// `None` when the captured reference was null.
    pub value: Option<R>,
}

/// Ordered name to value maps; re-capturing a name replaces its value in place.
#[derive(Debug, Clone)]
pub struct ContextMap<R> {
    pub local_variables: Vec<(String, Captured<R>)>,
    pub fields: Vec<(String, Captured<R>)>,
    pub static_fields: Vec<(String, Captured<R>)>,
}

impl<R> Default for ContextMap<R> {
    fn default() -> Self {
        Self { local_variables: Vec::new(), fields: Vec::new(), static_fields: Vec::new() }
    }
}

impl<R> ContextMap<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope_mut(&mut self, scope: Scope) -> &mut Vec<(String, Captured<R>)> {
        match scope {
            Scope::LocalVariable => &mut self.local_variables,
            Scope::InstanceField => &mut self.fields,
            Scope::StaticField => &mut self.static_fields,
        }
    }

    pub fn scope(&self, scope: Scope) -> &[(String, Captured<R>)] {
        match scope {
            Scope::LocalVariable => &self.local_variables,
            Scope::InstanceField => &self.fields,
            Scope::StaticField => &self.static_fields,
        }
    }

    pub fn put(&mut self, scope: Scope, name: impl Into<String>, type_name: impl Into<String>, value: Option<R>) {
        let name = name.into();
        let captured = Captured { type_name: type_name.into(), value };
        let entries = self.scope_mut(scope);
        match entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = captured,
            None => entries.push((name, captured)),
        }
    }

    pub fn get(&self, scope: Scope, name: &str) -> Option<&Captured<R>> {
        self.scope(scope).iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Looks a bare name up as a local, then an instance field, then a static field.
    pub fn lookup(&self, name: &str) -> Option<&Captured<R>> {
        self.get(Scope::LocalVariable, name)
            .or_else(|| self.get(Scope::InstanceField, name))
            .or_else(|| self.get(Scope::StaticField, name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Scope, &str, &Captured<R>)> {
        [Scope::LocalVariable, Scope::InstanceField, Scope::StaticField]
            .into_iter()
            .flat_map(move |scope| self.scope(scope).iter().map(move |(n, c)| (scope, n.as_str(), c)))
    }

    pub fn is_empty(&self) -> bool {
        self.local_variables.is_empty() && self.fields.is_empty() && self.static_fields.is_empty()
    }
}
