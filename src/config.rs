//! Layered solver configuration.
//!
//! A [`Config`] is merged once from [`ConfigScope`]s, each holding one raw
//! TOML document, and is then passed by reference into the solver.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::compiler::CompilerSpec;
use crate::error::ConfigError;
use crate::parser::parse_specs;
use crate::requirements::{RequirementGroup, RequirementPolicy};
use crate::spec::Spec;
use crate::version::{Version, VersionList, VersionRange};

/// Settings under this package name apply to every package.
pub const ALL_PACKAGES: &str = "all";

const DEFAULT_MAX_ALTERNATIVES: usize = 8;

/// How several root specs share dependency nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawUnify")]
pub enum UnifyMode {
    /// One solve; each package name appears once in the result.
    #[default]
    Unified,
    /// One independent solve per root.
    Separate,
    /// Unify as many roots as possible, over several rounds.
    WhenPossible,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawUnify {
    Bool(bool),
    Word(String),
}

impl TryFrom<RawUnify> for UnifyMode {
    type Error = ConfigError;

    fn try_from(raw: RawUnify) -> Result<Self, Self::Error> {
        match raw {
            RawUnify::Bool(true) => Ok(UnifyMode::Unified),
            RawUnify::Bool(false) => Ok(UnifyMode::Separate),
            RawUnify::Word(word) => word.parse(),
        }
    }
}

impl FromStr for UnifyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true" => Ok(UnifyMode::Unified),
            "false" => Ok(UnifyMode::Separate),
            "when_possible" => Ok(UnifyMode::WhenPossible),
            other => Err(ConfigError::InvalidUnify(other.to_string())),
        }
    }
}

impl fmt::Display for UnifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnifyMode::Unified => "true",
            UnifyMode::Separate => "false",
            UnifyMode::WhenPossible => "when_possible",
        })
    }
}

// --- raw documents ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    concretizer: RawConcretizer,
    #[serde(default)]
    config: RawGeneral,
    #[serde(default)]
    compilers: Vec<RawCompiler>,
    #[serde(default)]
    packages: BTreeMap<String, RawPackage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConcretizer {
    unify: Option<UnifyMode>,
    reuse: Option<bool>,
    max_alternatives: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGeneral {
    deprecated: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCompiler {
    spec: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackage {
    require: Option<RawRequire>,
    #[serde(default)]
    version: Vec<String>,
    #[serde(default)]
    compiler: Vec<String>,
    variants: Option<String>,
    #[serde(default)]
    providers: BTreeMap<String, Vec<String>>,
    buildable: Option<bool>,
    #[serde(default)]
    externals: Vec<RawExternal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExternal {
    spec: String,
    prefix: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawRequire {
    One(String),
    Many(Vec<RawRequirementEntry>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawRequirementEntry {
    Plain(String),
    OneOf {
        one_of: Vec<String>,
        when: Option<String>,
        message: Option<String>,
    },
    AnyOf {
        any_of: Vec<String>,
        when: Option<String>,
        message: Option<String>,
    },
    Spec {
        spec: String,
        when: Option<String>,
        message: Option<String>,
    },
}

/// One named layer of configuration.
#[derive(Debug, Clone)]
pub struct ConfigScope {
    name: String,
    raw: RawConfig,
}

impl ConfigScope {
    pub fn from_toml_str(name: impl Into<String>, text: &str) -> Result<Self, ConfigError> {
        let name = name.into();
        let raw = toml::from_str(text).map_err(|source| ConfigError::Toml {
            scope: name.clone(),
            source,
        })?;
        Ok(Self { name, raw })
    }

    /// Read a scope from a file; the scope is named after the path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(path.display().to_string(), &text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A package already present on the system, used in place of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSpec {
    /// Name, exact version and variants of the external.
    pub spec: Spec,
    pub prefix: PathBuf,
}

/// Preferences and requirements for one package (or for `all`).
#[derive(Debug, Clone, Default)]
pub struct PackagePreferences {
    pub require: Vec<RequirementGroup>,
    /// Preferred version ranges, most preferred first.
    pub version: Vec<VersionList>,
    /// Preferred compilers, most preferred first.
    pub compiler: Vec<CompilerSpec>,
    /// Preferred variant values.
    pub variants: Option<Spec>,
    /// Preferred providers per virtual, most preferred first.
    pub providers: BTreeMap<String, Vec<String>>,
    pub buildable: Option<bool>,
    /// Only read from package entries, never from `all`.
    pub externals: Vec<ExternalSpec>,
}

/// Merged, immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct Config {
    pub unify: UnifyMode,
    pub reuse: bool,
    /// Upper bound on provider alternatives scored after the first solution.
    pub max_alternatives: usize,
    pub allow_deprecated: bool,
    /// Available compilers, in preference order.
    pub compilers: Vec<CompilerSpec>,
    pub packages: BTreeMap<String, PackagePreferences>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unify: UnifyMode::default(),
            reuse: true,
            max_alternatives: DEFAULT_MAX_ALTERNATIVES,
            allow_deprecated: false,
            compilers: Vec::new(),
            packages: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Merge scopes given lowest precedence first.
    pub fn from_scopes(scopes: &[ConfigScope]) -> Result<Self, ConfigError> {
        let mut merged = RawConfig::default();
        for scope in scopes {
            tracing::debug!(scope = %scope.name, "merging config scope");
            merge(&mut merged, &scope.raw);
        }
        Self::from_raw(merged)
    }

    /// A configuration made of a single scope.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_scopes(&[ConfigScope::from_toml_str("inline", text)?])
    }

    pub fn with_unify(mut self, unify: UnifyMode) -> Self {
        self.unify = unify;
        self
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut compilers = Vec::with_capacity(raw.compilers.len());
        for entry in &raw.compilers {
            let compiler = parse_compiler(&entry.spec, "compilers")?;
            let Some(version) = pinned_version(&compiler.versions) else {
                return Err(ConfigError::InvalidCompiler {
                    value: entry.spec.clone(),
                });
            };
            compilers.push(CompilerSpec::concrete(compiler.name, version));
        }

        let mut packages = BTreeMap::new();
        for (name, pkg) in raw.packages {
            let location = format!("packages.{name}");
            let prefs = PackagePreferences {
                require: match &pkg.require {
                    Some(require) => convert_require(&name, require, &location)?,
                    None => Vec::new(),
                },
                version: pkg
                    .version
                    .iter()
                    .map(|v| {
                        VersionList::parse(v).map_err(|e| ConfigError::InvalidSpec {
                            location: format!("{location}.version"),
                            value: v.clone(),
                            source: crate::error::SpecSyntaxError {
                                input: v.clone(),
                                offset: 0,
                                message: e.reason,
                            },
                        })
                    })
                    .collect::<Result<_, _>>()?,
                compiler: pkg
                    .compiler
                    .iter()
                    .map(|c| parse_compiler(c, &format!("{location}.compiler")))
                    .collect::<Result<_, _>>()?,
                variants: pkg
                    .variants
                    .as_deref()
                    .map(|v| parse_one(v, v, &location).map(|s| s.node_constraint()))
                    .transpose()?,
                externals: pkg
                    .externals
                    .iter()
                    .map(|e| convert_external(&name, e, &location))
                    .collect::<Result<_, _>>()?,
                providers: pkg.providers,
                buildable: pkg.buildable,
            };
            packages.insert(name, prefs);
        }

        Ok(Self {
            unify: raw.concretizer.unify.unwrap_or_default(),
            reuse: raw.concretizer.reuse.unwrap_or(true),
            max_alternatives: raw
                .concretizer
                .max_alternatives
                .unwrap_or(DEFAULT_MAX_ALTERNATIVES),
            allow_deprecated: raw.config.deprecated.unwrap_or(false),
            compilers,
            packages,
        })
    }

    fn package(&self, name: &str) -> Option<&PackagePreferences> {
        self.packages.get(name)
    }

    fn all(&self) -> Option<&PackagePreferences> {
        self.packages.get(ALL_PACKAGES)
    }

    /// Hard requirements for `name`; package-level groups replace `all`.
    pub fn requirements_for(&self, name: &str) -> &[RequirementGroup] {
        match self.package(name) {
            Some(p) if !p.require.is_empty() => &p.require,
            _ => self.all().map_or(&[], |a| a.require.as_slice()),
        }
    }

    pub fn version_preferences(&self, name: &str) -> &[VersionList] {
        match self.package(name) {
            Some(p) if !p.version.is_empty() => &p.version,
            _ => self.all().map_or(&[], |a| a.version.as_slice()),
        }
    }

    pub fn compiler_preferences(&self, name: &str) -> &[CompilerSpec] {
        match self.package(name) {
            Some(p) if !p.compiler.is_empty() => &p.compiler,
            _ => self.all().map_or(&[], |a| a.compiler.as_slice()),
        }
    }

    pub fn variant_preferences(&self, name: &str) -> Option<&Spec> {
        self.package(name)
            .and_then(|p| p.variants.as_ref())
            .or_else(|| self.all().and_then(|a| a.variants.as_ref()))
    }

    /// Preferred providers of a virtual, most preferred first.
    pub fn providers_for(&self, virtual_name: &str) -> &[String] {
        self.all()
            .and_then(|a| a.providers.get(virtual_name))
            .map_or(&[], Vec::as_slice)
    }

    pub fn externals_for(&self, name: &str) -> &[ExternalSpec] {
        self.package(name).map_or(&[], |p| p.externals.as_slice())
    }

    pub fn is_buildable(&self, name: &str) -> bool {
        self.package(name)
            .and_then(|p| p.buildable)
            .or_else(|| self.all().and_then(|a| a.buildable))
            .unwrap_or(true)
    }
}

fn parse_one(input: &str, value: &str, location: &str) -> Result<Spec, ConfigError> {
    let mut specs = parse_specs(input).map_err(|source| ConfigError::InvalidSpec {
        location: location.to_string(),
        value: value.to_string(),
        source,
    })?;
    match (specs.pop(), specs.is_empty()) {
        (Some(spec), true) => Ok(spec),
        _ => Err(ConfigError::InvalidSpec {
            location: location.to_string(),
            value: value.to_string(),
            source: crate::error::SpecSyntaxError {
                input: value.to_string(),
                offset: 0,
                message: "expected exactly one spec".into(),
            },
        }),
    }
}

fn parse_compiler(value: &str, location: &str) -> Result<CompilerSpec, ConfigError> {
    let spec = parse_one(&format!("%{value}"), value, location)?;
    spec.compiler()
        .cloned()
        .ok_or_else(|| ConfigError::InvalidCompiler {
            value: value.to_string(),
        })
}

/// The single version a `@x` or `@=x` constraint names.
fn pinned_version(versions: &VersionList) -> Option<Version> {
    match versions.ranges() {
        [VersionRange::Exact(v)] => Some(v.clone()),
        [VersionRange::Between {
            lo: Some(lo),
            hi: Some(hi),
        }] if lo == hi => Some(lo.clone()),
        _ => None,
    }
}

fn convert_external(package: &str, raw: &RawExternal, location: &str) -> Result<ExternalSpec, ConfigError> {
    let spec = parse_one(&raw.spec, &raw.spec, &format!("{location}.externals"))?;
    let invalid = |reason| ConfigError::InvalidExternal {
        package: package.to_string(),
        value: raw.spec.clone(),
        reason,
    };
    if spec.name() != Some(package) {
        return Err(invalid("must name the package it is listed under"));
    }
    let Some(version) = pinned_version(spec.versions()) else {
        return Err(invalid("needs an exact version"));
    };
    if !spec.dependencies().is_empty() {
        return Err(invalid("cannot constrain dependencies"));
    }
    let mut spec = spec.with_versions(VersionList::exact(version));
    if let Some(compiler) = spec.compiler() {
        let Some(version) = pinned_version(&compiler.versions) else {
            return Err(invalid("needs an exact compiler version"));
        };
        let compiler = CompilerSpec::concrete(compiler.name.clone(), version);
        spec = spec.with_compiler(compiler);
    }
    Ok(ExternalSpec {
        spec,
        prefix: raw.prefix.clone(),
    })
}

fn convert_require(
    package: &str,
    raw: &RawRequire,
    location: &str,
) -> Result<Vec<RequirementGroup>, ConfigError> {
    let location = format!("{location}.require");
    let parse = |value: &str| -> Result<Spec, ConfigError> {
        let spec = parse_one(value, value, &location)?;
        if !spec.dependencies().is_empty() {
            return Err(ConfigError::DependencyInRequirement {
                package: package.to_string(),
                requirement: value.to_string(),
            });
        }
        Ok(spec)
    };
    let when = |value: &Option<String>| value.as_deref().map(&parse).transpose();

    let entries: Vec<RawRequirementEntry> = match raw {
        RawRequire::One(s) => vec![RawRequirementEntry::Plain(s.clone())],
        RawRequire::Many(entries) => entries.clone(),
    };
    entries
        .into_iter()
        .map(|entry| -> Result<RequirementGroup, ConfigError> {
            Ok(match entry {
                RawRequirementEntry::Plain(s) => RequirementGroup {
                    policy: RequirementPolicy::Single,
                    alternatives: vec![parse(&s)?],
                    when: None,
                    message: None,
                },
                RawRequirementEntry::Spec {
                    spec,
                    when: w,
                    message,
                } => RequirementGroup {
                    policy: RequirementPolicy::Single,
                    alternatives: vec![parse(&spec)?],
                    when: when(&w)?,
                    message,
                },
                RawRequirementEntry::OneOf {
                    one_of,
                    when: w,
                    message,
                } => RequirementGroup {
                    policy: RequirementPolicy::OneOf,
                    alternatives: one_of.iter().map(|s| parse(s)).collect::<Result<_, _>>()?,
                    when: when(&w)?,
                    message,
                },
                RawRequirementEntry::AnyOf {
                    any_of,
                    when: w,
                    message,
                } => RequirementGroup {
                    policy: RequirementPolicy::AnyOf,
                    alternatives: any_of.iter().map(|s| parse(s)).collect::<Result<_, _>>()?,
                    when: when(&w)?,
                    message,
                },
            })
        })
        .collect()
}

/// Fold `higher` into `merged`.
fn merge(merged: &mut RawConfig, higher: &RawConfig) {
    let c = &higher.concretizer;
    if c.unify.is_some() {
        merged.concretizer.unify = c.unify;
    }
    if c.reuse.is_some() {
        merged.concretizer.reuse = c.reuse;
    }
    if c.max_alternatives.is_some() {
        merged.concretizer.max_alternatives = c.max_alternatives;
    }
    if higher.config.deprecated.is_some() {
        merged.config.deprecated = higher.config.deprecated;
    }
    merged.compilers = prepend(&higher.compilers, &merged.compilers);

    for (name, pkg) in &higher.packages {
        let target = merged.packages.entry(name.clone()).or_default();
        if pkg.require.is_some() {
            target.require = pkg.require.clone();
        }
        if pkg.variants.is_some() {
            target.variants = pkg.variants.clone();
        }
        if pkg.buildable.is_some() {
            target.buildable = pkg.buildable;
        }
        target.externals = prepend(&pkg.externals, &target.externals);
        target.version = prepend(&pkg.version, &target.version);
        target.compiler = prepend(&pkg.compiler, &target.compiler);
        for (virtual_name, providers) in &pkg.providers {
            let existing = target.providers.entry(virtual_name.clone()).or_default();
            *existing = prepend(providers, existing);
        }
    }
}

/// `first` followed by the items of `rest` not already present.
fn prepend<T: Clone + PartialEq>(first: &[T], rest: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(first.len() + rest.len());
    for item in first.iter().chain(rest) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}
