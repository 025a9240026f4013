//! Package recipes: the declarations the concretizer reasons about.
//!
//! A [`PackageRecipe`] lists declared versions, variants (with an implicit
//! `build_system` variant always first), dependency edges guarded by `when`
//! conditions, virtual `provides` declarations and conflicts.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::deptypes::DepTypes;
use crate::error::RepositoryError;
use crate::spec::Spec;
use crate::variant::{AllowedValues, VariantDefinition};
use crate::version::Version;

/// Name of the implicit variant recording the chosen build system.
pub const BUILD_SYSTEM_VARIANT: &str = "build_system";

/// How a package is built, selected once concretization fixes the
/// `build_system` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildSystem {
    Generic,
    Makefile,
    Autotools,
    CMake,
    Meson,
    Python,
}

impl BuildSystem {
    pub const ALL: [BuildSystem; 6] = [
        BuildSystem::Generic,
        BuildSystem::Makefile,
        BuildSystem::Autotools,
        BuildSystem::CMake,
        BuildSystem::Meson,
        BuildSystem::Python,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildSystem::Generic => "generic",
            BuildSystem::Makefile => "makefile",
            BuildSystem::Autotools => "autotools",
            BuildSystem::CMake => "cmake",
            BuildSystem::Meson => "meson",
            BuildSystem::Python => "python_pip",
        }
    }

    /// The install phases run, in order, for this kind.
    pub fn phases(&self) -> &'static [&'static str] {
        match self {
            BuildSystem::Generic => &["install"],
            BuildSystem::Makefile => &["edit", "build", "install"],
            BuildSystem::Autotools => &["autoreconf", "configure", "build", "install"],
            BuildSystem::CMake => &["cmake", "build", "install"],
            BuildSystem::Meson => &["meson", "build", "install"],
            BuildSystem::Python => &["install"],
        }
    }

    /// The build system a concrete spec was concretized with.
    pub fn of(spec: &Spec) -> Option<BuildSystem> {
        spec.variant(BUILD_SYSTEM_VARIANT)?
            .single_value()?
            .parse()
            .ok()
    }
}

impl FromStr for BuildSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildSystem::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredVersion {
    pub version: Version,
    pub deprecated: bool,
    /// Recipe-level preference, ranked after configured version preferences.
    pub preferred: bool,
}

impl DeclaredVersion {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            deprecated: false,
            preferred: false,
        }
    }
}

/// `depends_on(spec, type=..., when=...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDecl {
    pub spec: Spec,
    pub deptypes: DepTypes,
    pub when: Option<Spec>,
}

impl DependencyDecl {
    pub fn new(spec: Spec) -> Self {
        Self {
            spec,
            deptypes: DepTypes::DEFAULT,
            when: None,
        }
    }

    /// Name of the required package or virtual.
    pub fn name(&self) -> &str {
        self.spec.name().unwrap_or_default()
    }
}

/// `provides(virtual, when=...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidesDecl {
    pub virtual_spec: Spec,
    pub when: Option<Spec>,
}

impl ProvidesDecl {
    pub fn virtual_name(&self) -> &str {
        self.virtual_spec.name().unwrap_or_default()
    }
}

/// `conflicts(pattern, when=..., msg=...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDecl {
    pub pattern: Spec,
    pub when: Option<Spec>,
    pub message: Option<String>,
}

/// Everything the concretizer knows about one package.
#[derive(Debug, Clone)]
pub struct PackageRecipe {
    name: String,
    versions: Vec<DeclaredVersion>,
    variants: Vec<VariantDefinition>,
    dependencies: Vec<DependencyDecl>,
    provides: Vec<ProvidesDecl>,
    conflicts: Vec<ConflictDecl>,
    build_systems: Vec<BuildSystem>,
}

impl PackageRecipe {
    pub fn new(name: impl Into<String>) -> Self {
        let mut recipe = Self {
            name: name.into(),
            versions: Vec::new(),
            variants: Vec::new(),
            dependencies: Vec::new(),
            provides: Vec::new(),
            conflicts: Vec::new(),
            build_systems: Vec::new(),
        };
        recipe.set_build_systems(vec![BuildSystem::Generic]);
        recipe
    }

    pub fn with_version(mut self, version: DeclaredVersion) -> Self {
        self.versions.push(version);
        self
    }

    pub fn with_variant(mut self, variant: VariantDefinition) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn with_dependency(mut self, dep: DependencyDecl) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn with_provides(mut self, provides: ProvidesDecl) -> Self {
        self.provides.push(provides);
        self
    }

    pub fn with_conflict(mut self, conflict: ConflictDecl) -> Self {
        self.conflicts.push(conflict);
        self
    }

    /// Replace the supported build systems; the first is the default.
    pub fn with_build_systems(mut self, systems: Vec<BuildSystem>) -> Self {
        self.set_build_systems(systems);
        self
    }

    fn set_build_systems(&mut self, mut systems: Vec<BuildSystem>) {
        if systems.is_empty() {
            systems.push(BuildSystem::Generic);
        }
        let allowed: Vec<&str> = systems.iter().map(BuildSystem::as_str).collect();
        let def = VariantDefinition::single(BUILD_SYSTEM_VARIANT, allowed[0], &allowed);
        self.variants.retain(|v| v.name != BUILD_SYSTEM_VARIANT);
        self.variants.insert(0, def);
        self.build_systems = systems;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn versions(&self) -> &[DeclaredVersion] {
        &self.versions
    }

    pub fn declared_version(&self, version: &Version) -> Option<&DeclaredVersion> {
        self.versions.iter().find(|d| d.version == *version)
    }

    /// Variant definitions in declaration order, `build_system` first.
    pub fn variants(&self) -> &[VariantDefinition] {
        &self.variants
    }

    pub fn variant(&self, name: &str) -> Option<&VariantDefinition> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn dependencies(&self) -> &[DependencyDecl] {
        &self.dependencies
    }

    pub fn provides(&self) -> &[ProvidesDecl] {
        &self.provides
    }

    pub fn conflicts(&self) -> &[ConflictDecl] {
        &self.conflicts
    }

    pub fn build_systems(&self) -> &[BuildSystem] {
        &self.build_systems
    }

    /// Check the invariants that only depend on this recipe.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if self.versions.is_empty() {
            return Err(RepositoryError::NoVersions(self.name.clone()));
        }
        for def in &self.variants {
            if def.default.is_empty() && !def.multi {
                return Err(self.invalid_default(def, ""));
            }
            if let Some(bad) = def.default.iter().find(|v| !def.admits(v)) {
                return Err(self.invalid_default(def, bad));
            }
            if !def.multi && def.default.len() > 1 {
                let joined = def.default.iter().cloned().collect::<Vec<_>>().join(",");
                return Err(self.invalid_default(def, &joined));
            }
            if let Some(when) = &def.when {
                self.check_condition(when, &format!("condition of variant `{}`", def.name))?;
            }
        }
        for dep in &self.dependencies {
            if let Some(when) = &dep.when {
                self.check_condition(when, &format!("condition of dependency on {}", dep.name()))?;
            }
        }
        for provides in &self.provides {
            if let Some(when) = &provides.when {
                self.check_condition(
                    when,
                    &format!("condition of provides {}", provides.virtual_name()),
                )?;
            }
        }
        for conflict in &self.conflicts {
            let context = format!("conflict `{}`", conflict.pattern);
            if conflict.pattern.name().is_none_or(|n| n == self.name) {
                self.check_variants(&conflict.pattern, &context)?;
            }
            if let Some(when) = &conflict.when {
                self.check_condition(when, &context)?;
            }
        }
        Ok(())
    }

    fn invalid_default(&self, def: &VariantDefinition, value: &str) -> RepositoryError {
        RepositoryError::InvalidDefault {
            package: self.name.clone(),
            variant: def.name.clone(),
            value: value.to_string(),
        }
    }

    fn check_condition(&self, when: &Spec, context: &str) -> Result<(), RepositoryError> {
        if when.dependencies().len() > 1 {
            return Err(RepositoryError::CompoundCondition {
                package: self.name.clone(),
                when: when.to_string(),
            });
        }
        self.check_variants(when, context)
    }

    fn check_variants(&self, spec: &Spec, context: &str) -> Result<(), RepositoryError> {
        match spec.variants().names().find(|n| self.variant(n).is_none()) {
            Some(unknown) => Err(RepositoryError::UnknownVariant {
                package: self.name.clone(),
                variant: unknown.to_string(),
                context: context.to_string(),
            }),
            None => Ok(()),
        }
    }
}

// --- TOML form ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawRecipe {
    name: String,
    #[serde(default)]
    versions: Vec<RawVersion>,
    #[serde(default, rename = "variant")]
    variants: Vec<RawVariant>,
    #[serde(default)]
    depends_on: Vec<RawDependency>,
    #[serde(default)]
    provides: Vec<RawProvides>,
    #[serde(default)]
    conflicts: Vec<RawConflict>,
    #[serde(default)]
    build_systems: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Plain(String),
    Detailed {
        version: String,
        #[serde(default)]
        deprecated: bool,
        #[serde(default)]
        preferred: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariant {
    name: String,
    default: Option<RawValue>,
    values: Option<RawAllowed>,
    #[serde(default)]
    multi: bool,
    #[serde(default)]
    sticky: bool,
    when: Option<String>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAllowed {
    List(Vec<String>),
    /// Only `"any"` is accepted.
    Keyword(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Plain(String),
    Detailed {
        spec: String,
        #[serde(rename = "type")]
        deptypes: Option<Vec<String>>,
        when: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawProvides {
    Plain(String),
    Detailed { spec: String, when: Option<String> },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConflict {
    spec: String,
    when: Option<String>,
    msg: Option<String>,
}

impl RawRecipe {
    pub(crate) fn into_recipe(self) -> Result<PackageRecipe, RepositoryError> {
        let package = self.name;
        let spec = |value: &str| -> Result<Spec, RepositoryError> {
            value.parse().map_err(|source| RepositoryError::InvalidSpec {
                package: package.clone(),
                value: value.to_string(),
                source,
            })
        };
        let when = |value: Option<String>| value.as_deref().map(spec).transpose();

        let mut systems = Vec::new();
        for s in &self.build_systems {
            let system = s.parse().map_err(|value| RepositoryError::UnknownBuildSystem {
                package: package.clone(),
                value,
            })?;
            systems.push(system);
        }
        let mut recipe = PackageRecipe::new(package.clone()).with_build_systems(systems);

        for raw in self.versions {
            let (text, deprecated, preferred) = match raw {
                RawVersion::Plain(v) => (v, false, false),
                RawVersion::Detailed {
                    version,
                    deprecated,
                    preferred,
                } => (version, deprecated, preferred),
            };
            let version = Version::parse(&text).map_err(|source| RepositoryError::InvalidVersion {
                package: package.clone(),
                source,
            })?;
            recipe.versions.push(DeclaredVersion {
                version,
                deprecated,
                preferred,
            });
        }

        for raw in self.variants {
            let allowed = match raw.values {
                None => AllowedValues::Bool,
                Some(RawAllowed::List(values)) => AllowedValues::Values(values),
                Some(RawAllowed::Keyword(k)) if k == "any" => AllowedValues::Any,
                Some(RawAllowed::Keyword(k)) => {
                    return Err(RepositoryError::InvalidDefault {
                        package: package.clone(),
                        variant: raw.name,
                        value: k,
                    });
                }
            };
            let default: BTreeSet<String> = match raw.default {
                None if allowed == AllowedValues::Bool => BTreeSet::from(["false".to_string()]),
                None => BTreeSet::new(),
                Some(RawValue::Bool(b)) => BTreeSet::from([b.to_string()]),
                Some(RawValue::One(s)) => s.split(',').map(str::to_string).collect(),
                Some(RawValue::Many(v)) => v.into_iter().collect(),
            };
            recipe.variants.push(VariantDefinition {
                name: raw.name,
                default,
                allowed,
                multi: raw.multi,
                sticky: raw.sticky,
                when: when(raw.when)?,
                description: raw.description,
            });
        }

        for raw in self.depends_on {
            let decl = match raw {
                RawDependency::Plain(s) => DependencyDecl::new(spec(&s)?),
                RawDependency::Detailed {
                    spec: s,
                    deptypes,
                    when: w,
                } => {
                    let deptypes = match deptypes {
                        Some(names) => DepTypes::from_names(&names).map_err(|value| {
                            RepositoryError::InvalidSpec {
                                package: package.clone(),
                                value: s.clone(),
                                source: crate::error::SpecSyntaxError {
                                    input: s.clone(),
                                    offset: 0,
                                    message: format!("unknown dependency type `{value}`"),
                                },
                            }
                        })?,
                        None => DepTypes::DEFAULT,
                    };
                    DependencyDecl {
                        spec: spec(&s)?,
                        deptypes,
                        when: when(w)?,
                    }
                }
            };
            if decl.spec.name().is_none() {
                return Err(RepositoryError::InvalidSpec {
                    package: package.clone(),
                    value: decl.spec.to_string(),
                    source: crate::error::SpecSyntaxError {
                        input: decl.spec.to_string(),
                        offset: 0,
                        message: "dependency must name a package".into(),
                    },
                });
            }
            recipe.dependencies.push(decl);
        }

        for raw in self.provides {
            let (s, w) = match raw {
                RawProvides::Plain(s) => (s, None),
                RawProvides::Detailed { spec, when } => (spec, when),
            };
            recipe.provides.push(ProvidesDecl {
                virtual_spec: spec(&s)?,
                when: when(w)?,
            });
        }

        for raw in self.conflicts {
            recipe.conflicts.push(ConflictDecl {
                pattern: spec(&raw.spec)?,
                when: when(raw.when)?,
                message: raw.msg,
            });
        }

        recipe.validate()?;
        Ok(recipe)
    }
}
