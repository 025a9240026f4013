//! Variant values carried by specs and variant definitions declared by recipes.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use crate::spec::Spec;

const TRUE: &str = "true";
const FALSE: &str = "false";

/// A variant assignment: a name bound to one or more values.
///
/// Boolean variants hold exactly one of `true` / `false` and render as
/// `+name` / `~name`. Multi-valued variants merge their value sets when
/// constrained and are satisfied by supersets; single-valued ones must agree
/// exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantValue {
    name: String,
    values: BTreeSet<String>,
    multi: bool,
}

impl VariantValue {
    pub fn boolean(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            values: BTreeSet::from([if enabled { TRUE } else { FALSE }.to_string()]),
            multi: false,
        }
    }

    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeSet::from([value.into()]),
            multi: false,
        }
    }

    pub fn multi<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            multi: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    /// `Some(on)` for boolean assignments.
    pub fn as_bool(&self) -> Option<bool> {
        if self.multi || self.values.len() != 1 {
            return None;
        }
        match self.values.first().map(String::as_str) {
            Some(TRUE) => Some(true),
            Some(FALSE) => Some(false),
            _ => None,
        }
    }

    /// The single value of an exclusive assignment.
    pub fn single_value(&self) -> Option<&str> {
        match self.values.len() {
            1 => self.values.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn satisfies(&self, other: &VariantValue) -> bool {
        if self.multi || other.multi {
            other.values.is_subset(&self.values)
        } else {
            self.values == other.values
        }
    }

    pub fn intersects(&self, other: &VariantValue) -> bool {
        self.multi || other.multi || self.values == other.values
    }

    /// Merge `other` into `self`; `None` when the two cannot coexist.
    fn merged(&self, other: &VariantValue) -> Option<VariantValue> {
        if self.multi || other.multi {
            Some(VariantValue {
                name: self.name.clone(),
                values: self.values.union(&other.values).cloned().collect(),
                multi: true,
            })
        } else if self.values == other.values {
            Some(self.clone())
        } else {
            None
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_bool() {
            Some(true) => write!(f, "+{}", self.name),
            Some(false) => write!(f, "~{}", self.name),
            None => {
                write!(f, "{}=", self.name)?;
                for (i, v) in self.values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(v)?;
                }
                Ok(())
            }
        }
    }
}

/// The variant assignments of one spec, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VariantMap(BTreeMap<String, VariantValue>);

impl VariantMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&VariantValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, value: VariantValue) -> Option<VariantValue> {
        self.0.insert(value.name.clone(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<VariantValue> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariantValue> {
        self.0.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every assignment in `other` is satisfied here.
    pub fn satisfies(&self, other: &VariantMap) -> bool {
        other
            .iter()
            .all(|o| self.get(&o.name).is_some_and(|s| s.satisfies(o)))
    }

    pub fn intersects(&self, other: &VariantMap) -> bool {
        other
            .iter()
            .all(|o| self.get(&o.name).is_none_or(|s| s.intersects(o)))
    }

    /// Merge `other` into `self`, returning whether anything changed.
    ///
    /// On failure the first incompatible pair is returned and `self` is left
    /// untouched.
    pub(crate) fn constrain(
        &mut self,
        other: &VariantMap,
    ) -> Result<bool, (VariantValue, VariantValue)> {
        let mut merged = Vec::new();
        for o in other.iter() {
            match self.get(&o.name) {
                None => merged.push(o.clone()),
                Some(s) => match s.merged(o) {
                    Some(m) if m != *s => merged.push(m),
                    Some(_) => {}
                    None => return Err((s.clone(), o.clone())),
                },
            }
        }
        let changed = !merged.is_empty();
        for m in merged {
            self.insert(m);
        }
        Ok(changed)
    }
}

impl fmt::Display for VariantMap {
    /// Boolean variants first (`+a~b`), then ` key=value` pairs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for v in self.iter().filter(|v| v.as_bool().is_some()) {
            write!(f, "{v}")?;
        }
        for v in self.iter().filter(|v| v.as_bool().is_none()) {
            write!(f, " {v}")?;
        }
        Ok(())
    }
}

/// Values a variant may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedValues {
    Bool,
    Values(Vec<String>),
    /// Free-form; any non-empty value validates.
    Any,
}

/// A variant as declared by a package recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDefinition {
    pub name: String,
    pub default: BTreeSet<String>,
    pub allowed: AllowedValues,
    pub multi: bool,
    /// Only change from the default when something explicitly asks for it.
    pub sticky: bool,
    /// The variant exists only on nodes satisfying this anonymous spec.
    pub when: Option<Spec>,
    pub description: String,
}

impl VariantDefinition {
    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            default: BTreeSet::from([if default { TRUE } else { FALSE }.to_string()]),
            allowed: AllowedValues::Bool,
            multi: false,
            sticky: false,
            when: None,
            description: String::new(),
        }
    }

    pub fn single(name: impl Into<String>, default: &str, allowed: &[&str]) -> Self {
        Self {
            name: name.into(),
            default: BTreeSet::from([default.to_string()]),
            allowed: AllowedValues::Values(allowed.iter().map(|s| s.to_string()).collect()),
            multi: false,
            sticky: false,
            when: None,
            description: String::new(),
        }
    }

    pub fn multi(name: impl Into<String>, default: &[&str], allowed: &[&str]) -> Self {
        Self {
            name: name.into(),
            default: default.iter().map(|s| s.to_string()).collect(),
            allowed: AllowedValues::Values(allowed.iter().map(|s| s.to_string()).collect()),
            multi: true,
            sticky: false,
            when: None,
            description: String::new(),
        }
    }

    pub fn with_when(mut self, when: Spec) -> Self {
        self.when = Some(when);
        self
    }

    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn is_bool(&self) -> bool {
        self.allowed == AllowedValues::Bool
    }

    pub fn default_value(&self) -> VariantValue {
        VariantValue {
            name: self.name.clone(),
            values: self.default.clone(),
            multi: self.multi,
        }
    }

    /// Build an assignment of this variant from a set of values.
    pub fn value_of(&self, values: BTreeSet<String>) -> VariantValue {
        VariantValue {
            name: self.name.clone(),
            values,
            multi: self.multi,
        }
    }

    /// Return the first value of `value` not admitted by this definition.
    pub fn invalid_value<'a>(&self, value: &'a VariantValue) -> Option<&'a str> {
        if !self.multi && value.values.len() > 1 {
            return value.values.iter().nth(1).map(String::as_str);
        }
        value
            .values
            .iter()
            .find(|v| !self.admits(v))
            .map(String::as_str)
    }

    pub fn admits(&self, value: &str) -> bool {
        match &self.allowed {
            AllowedValues::Bool => value == TRUE || value == FALSE,
            AllowedValues::Values(allowed) => allowed.iter().any(|a| a == value),
            AllowedValues::Any => !value.is_empty(),
        }
    }
}
