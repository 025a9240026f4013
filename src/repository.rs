//! Package repository abstraction.
//!
//! [`PackageRepository`] provides read-only access to a recipe database.
//! [`InMemoryRepository`] is a simple implementation backed by a `BTreeMap`,
//! loadable from a TOML file of `[[package]]` tables.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::RepositoryError;
use crate::package::{PackageRecipe, RawRecipe};

/// Read-only recipe database.
///
/// Solves read it concurrently, so implementations must be shareable across
/// threads and must not change during a solve.
pub trait PackageRepository: Send + Sync {
    /// All package names with a recipe, sorted.
    fn all_packages(&self) -> Vec<&str>;

    /// The recipe for a package name.
    fn recipe(&self, name: &str) -> Option<&PackageRecipe>;

    /// Recipes that declare `provides` for a virtual name, sorted by name.
    fn providers_of(&self, virtual_name: &str) -> Vec<&PackageRecipe>;

    /// Whether `name` is a virtual: no recipe, but at least one provider.
    fn is_virtual(&self, name: &str) -> bool {
        self.recipe(name).is_none() && !self.providers_of(name).is_empty()
    }

    /// Whether `name` is a package or a virtual.
    fn exists(&self, name: &str) -> bool {
        self.recipe(name).is_some() || self.is_virtual(name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRepository {
    #[serde(default, rename = "package")]
    packages: Vec<RawRecipe>,
}

/// In-memory repository, useful for tests and for TOML-described repos.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    packages: BTreeMap<String, PackageRecipe>,
    /// virtual name -> provider package names
    providers: BTreeMap<String, BTreeSet<String>>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipe, checking its own invariants.
    pub fn add(&mut self, recipe: PackageRecipe) -> Result<(), RepositoryError> {
        recipe.validate()?;
        if self.packages.contains_key(recipe.name()) {
            return Err(RepositoryError::DuplicatePackage(recipe.name().to_string()));
        }
        for provides in recipe.provides() {
            self.providers
                .entry(provides.virtual_name().to_string())
                .or_default()
                .insert(recipe.name().to_string());
        }
        self.packages.insert(recipe.name().to_string(), recipe);
        Ok(())
    }

    /// Parse a repository from TOML text and validate it as a whole.
    pub fn from_toml_str(text: &str) -> Result<Self, RepositoryError> {
        let raw: RawRepository = toml::from_str(text)?;
        let mut repo = Self::new();
        for recipe in raw.packages {
            repo.add(recipe.into_recipe()?)?;
        }
        repo.validate()?;
        Ok(repo)
    }

    /// Read and parse a TOML repository file.
    pub fn load(path: &Path) -> Result<Self, RepositoryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RepositoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check invariants spanning several recipes.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if let Some(name) = self.providers.keys().find(|v| self.packages.contains_key(*v)) {
            return Err(RepositoryError::VirtualShadowsPackage(name.clone()));
        }
        for recipe in self.packages.values() {
            for dep in recipe.dependencies() {
                let Some(target) = self.packages.get(dep.name()) else {
                    continue;
                };
                if let Some(unknown) = dep
                    .spec
                    .variants()
                    .names()
                    .find(|n| target.variant(n).is_none())
                {
                    return Err(RepositoryError::UnknownVariant {
                        package: recipe.name().to_string(),
                        variant: unknown.to_string(),
                        context: format!("dependency on {}", dep.name()),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl PackageRepository for InMemoryRepository {
    fn all_packages(&self) -> Vec<&str> {
        self.packages.keys().map(String::as_str).collect()
    }

    fn recipe(&self, name: &str) -> Option<&PackageRecipe> {
        self.packages.get(name)
    }

    fn providers_of(&self, virtual_name: &str) -> Vec<&PackageRecipe> {
        self.providers
            .get(virtual_name)
            .into_iter()
            .flatten()
            .filter_map(|p| self.packages.get(p))
            .collect()
    }
}
