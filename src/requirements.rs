//! Hard requirements from configuration (`packages.<name>.require`).
//!
//! A requirement group is attached to a package name and evaluated against
//! every candidate node of that package. Violating candidates are removed
//! from the solve with a reason; satisfied `one_of`/`any_of` groups carry a
//! weight (the index of the alternative that held) used for ranking.

use std::fmt;

use crate::config::{ALL_PACKAGES, Config};
use crate::error::ConfigError;
use crate::repository::PackageRepository;
use crate::spec::Spec;

/// How the alternatives of a group combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequirementPolicy {
    /// The single alternative must hold.
    Single,
    /// Exactly one alternative must hold.
    OneOf,
    /// At least one alternative must hold.
    AnyOf,
}

impl fmt::Display for RequirementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequirementPolicy::Single => "spec",
            RequirementPolicy::OneOf => "one_of",
            RequirementPolicy::AnyOf => "any_of",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementGroup {
    pub policy: RequirementPolicy,
    pub alternatives: Vec<Spec>,
    /// The group only applies to nodes satisfying this.
    pub when: Option<Spec>,
    pub message: Option<String>,
}

/// Result of evaluating one group against one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementOutcome {
    NotApplicable,
    /// Held; `weight` is the position of the alternative that held.
    Satisfied { weight: usize },
    Violated,
}

fn names_match(spec: &Spec, name: &str) -> bool {
    spec.name().is_none_or(|n| n == name)
}

/// Whether `node` (a candidate of `package`) matches a requirement term.
fn term_holds(term: &Spec, package: &str, node: &Spec) -> bool {
    names_match(term, package) && node.satisfies_attributes(term)
}

impl RequirementGroup {
    pub fn single(spec: Spec) -> Self {
        Self {
            policy: RequirementPolicy::Single,
            alternatives: vec![spec],
            when: None,
            message: None,
        }
    }

    /// Evaluate against a candidate node of `package`.
    pub fn evaluate(&self, package: &str, node: &Spec) -> RequirementOutcome {
        if let Some(when) = &self.when {
            if !term_holds(when, package, node) {
                return RequirementOutcome::NotApplicable;
            }
        }
        let mut holding = self
            .alternatives
            .iter()
            .enumerate()
            .filter(|(_, alt)| term_holds(alt, package, node))
            .map(|(i, _)| i);
        let first = holding.next();
        match (self.policy, first) {
            (_, None) => RequirementOutcome::Violated,
            (RequirementPolicy::OneOf, Some(_)) if holding.next().is_some() => {
                RequirementOutcome::Violated
            }
            (_, Some(weight)) => RequirementOutcome::Satisfied { weight },
        }
    }

    /// Alternatives usable when choosing `provider` for a virtual, with
    /// their positions. Only the provider name is checked here; the rest of
    /// each alternative constrains the provider node.
    pub fn provider_alternatives<'a>(
        &'a self,
        provider: &'a str,
    ) -> impl Iterator<Item = (usize, &'a Spec)> + 'a {
        self.alternatives
            .iter()
            .enumerate()
            .filter(move |(_, alt)| names_match(alt, provider))
    }

    /// Human-readable reason used when a candidate is excluded.
    pub fn describe(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        let alternatives: Vec<String> = self.alternatives.iter().map(|a| a.to_string()).collect();
        let mut out = match self.policy {
            RequirementPolicy::Single => format!("required `{}`", alternatives.join(" ")),
            policy => format!("required {policy} [{}]", alternatives.join(", ")),
        };
        if let Some(when) = &self.when {
            out.push_str(&format!(" when `{when}`"));
        }
        out
    }
}

/// Outcome of every group for one candidate: the summed weight, or the
/// first violated group.
pub fn evaluate_all<'a>(
    groups: &'a [RequirementGroup],
    package: &str,
    node: &Spec,
) -> Result<usize, &'a RequirementGroup> {
    let mut weight = 0;
    for group in groups {
        match group.evaluate(package, node) {
            RequirementOutcome::NotApplicable => {}
            RequirementOutcome::Satisfied { weight: w } => weight += w,
            RequirementOutcome::Violated => return Err(group),
        }
    }
    Ok(weight)
}

/// Reject requirements that name versions a package never declares.
pub fn validate_requirements(
    config: &Config,
    repo: &dyn PackageRepository,
) -> Result<(), ConfigError> {
    for (package, prefs) in &config.packages {
        if package == ALL_PACKAGES {
            continue;
        }
        for group in &prefs.require {
            for alt in &group.alternatives {
                if alt.versions().is_any() {
                    continue;
                }
                let target = alt.name().unwrap_or(package);
                let Some(recipe) = repo.recipe(target) else {
                    continue;
                };
                if !recipe
                    .versions()
                    .iter()
                    .any(|d| alt.versions().contains(&d.version))
                {
                    return Err(ConfigError::UndefinedVersion {
                        package: target.to_string(),
                        version: alt.versions().to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerSpec;
    use crate::repository::InMemoryRepository;
    use crate::variant::{VariantMap, VariantValue};
    use crate::version::Version;

    fn node(name: &str, version: &str, compiler: &str, shared: bool) -> Spec {
        let mut variants = VariantMap::new();
        variants.insert(VariantValue::boolean("shared", shared));
        let (cname, cversion) = compiler.split_once('@').unwrap();
        Spec::concrete_node(
            name,
            Version::parse(version).unwrap(),
            Some(CompilerSpec::concrete(cname, Version::parse(cversion).unwrap())),
            variants,
        )
    }

    fn group(policy: RequirementPolicy, alternatives: &[&str], when: Option<&str>) -> RequirementGroup {
        RequirementGroup {
            policy,
            alternatives: alternatives.iter().map(|s| s.parse().unwrap()).collect(),
            when: when.map(|w| w.parse().unwrap()),
            message: None,
        }
    }

    #[test]
    fn single_requirement() {
        let g = group(RequirementPolicy::Single, &["+shared"], None);
        let on = node("zlib", "1.3", "gcc@12.2.0", true);
        let off = node("zlib", "1.3", "gcc@12.2.0", false);
        assert_eq!(g.evaluate("zlib", &on), RequirementOutcome::Satisfied { weight: 0 });
        assert_eq!(g.evaluate("zlib", &off), RequirementOutcome::Violated);
    }

    #[test]
    fn one_of_needs_exactly_one() {
        let g = group(RequirementPolicy::OneOf, &["%gcc", "%clang", "@1.3"], None);
        let clang = node("zlib", "1.2", "clang@16.0.0", true);
        assert_eq!(g.evaluate("zlib", &clang), RequirementOutcome::Satisfied { weight: 1 });
        let both = node("zlib", "1.3", "gcc@12.2.0", true);
        assert_eq!(g.evaluate("zlib", &both), RequirementOutcome::Violated);
    }

    #[test]
    fn any_of_weight_is_first_match() {
        let g = group(RequirementPolicy::AnyOf, &["%gcc", "@1.3"], None);
        let n = node("zlib", "1.3", "clang@16.0.0", true);
        assert_eq!(g.evaluate("zlib", &n), RequirementOutcome::Satisfied { weight: 1 });
        let n = node("zlib", "1.2", "clang@16.0.0", true);
        assert_eq!(g.evaluate("zlib", &n), RequirementOutcome::Violated);
    }

    #[test]
    fn when_limits_applicability() {
        let g = group(RequirementPolicy::Single, &["%gcc"], Some("@2:"));
        let old = node("zlib", "1.3", "clang@16.0.0", true);
        assert_eq!(g.evaluate("zlib", &old), RequirementOutcome::NotApplicable);
        let new = node("zlib", "2.0", "clang@16.0.0", true);
        assert_eq!(g.evaluate("zlib", &new), RequirementOutcome::Violated);

        let groups = [g, group(RequirementPolicy::AnyOf, &["~shared", "+shared"], None)];
        assert_eq!(evaluate_all(&groups, "zlib", &old), Ok(1));
        assert!(evaluate_all(&groups, "zlib", &new).is_err());
    }

    #[test]
    fn provider_alternatives_filter_by_name() {
        let g = group(RequirementPolicy::OneOf, &["mpich", "openmpi@4"], None);
        let positions: Vec<_> = g.provider_alternatives("openmpi").map(|(i, _)| i).collect();
        assert_eq!(positions, [1]);
        assert!(g.describe().contains("one_of"));
    }

    #[test]
    fn undefined_versions_are_rejected() {
        let repo = InMemoryRepository::from_toml_str(
            r#"
            [[package]]
            name = "hdf5"
            versions = ["1.14.3", "1.12.2"]
            "#,
        )
        .unwrap();
        let ok = Config::from_toml_str("[packages.hdf5]\nrequire = \"@1.12\"").unwrap();
        assert!(validate_requirements(&ok, &repo).is_ok());

        let bad = Config::from_toml_str("[packages.hdf5]\nrequire = \"@1.10\"").unwrap();
        assert!(matches!(
            validate_requirements(&bad, &repo),
            Err(ConfigError::UndefinedVersion { package, .. }) if package == "hdf5"
        ));
    }
}
