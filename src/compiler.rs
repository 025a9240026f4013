//! Compiler constraints (`%gcc@12:`).

use std::fmt;

use crate::version::{Version, VersionList};

/// A compiler name plus a version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompilerSpec {
    pub name: String,
    pub versions: VersionList,
}

impl CompilerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: VersionList::any(),
        }
    }

    pub fn concrete(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            versions: VersionList::exact(version),
        }
    }

    pub fn with_versions(mut self, versions: VersionList) -> Self {
        self.versions = versions;
        self
    }

    pub fn version(&self) -> Option<&Version> {
        self.versions.concrete()
    }

    pub fn satisfies(&self, other: &CompilerSpec) -> bool {
        self.name == other.name && self.versions.is_subset_of(&other.versions)
    }

    pub fn intersects(&self, other: &CompilerSpec) -> bool {
        self.name == other.name && self.versions.intersects(&other.versions)
    }

    /// Intersect with `other`; `None` when the names differ or the version
    /// ranges are disjoint.
    pub fn intersect(&self, other: &CompilerSpec) -> Option<CompilerSpec> {
        if self.name != other.name {
            return None;
        }
        let versions = self.versions.intersect(&other.versions);
        (!versions.is_empty()).then(|| CompilerSpec {
            name: self.name.clone(),
            versions,
        })
    }

    /// Render for a concrete node: `gcc@12.2.0` rather than `gcc@=12.2.0`.
    pub(crate) fn format_concrete(&self) -> String {
        match self.version() {
            Some(v) => format!("{}@{v}", self.name),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for CompilerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.versions.is_any() {
            write!(f, "@{}", self.versions)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_satisfies_range() {
        let gcc = CompilerSpec::concrete("gcc", Version::parse("12.2.0").unwrap());
        let want = CompilerSpec::new("gcc").with_versions(VersionList::parse("12:").unwrap());
        assert!(gcc.satisfies(&want));
        assert!(!gcc.satisfies(&CompilerSpec::new("clang")));
        assert_eq!(gcc.format_concrete(), "gcc@12.2.0");
        assert_eq!(gcc.to_string(), "gcc@=12.2.0");
    }

    #[test]
    fn intersect_disjoint() {
        let a = CompilerSpec::new("gcc").with_versions(VersionList::parse(":10").unwrap());
        let b = CompilerSpec::new("gcc").with_versions(VersionList::parse("12:").unwrap());
        assert!(a.intersect(&b).is_none());
        assert!(!a.intersects(&b));
        assert!(a.intersect(&CompilerSpec::new("gcc")).is_some());
    }
}
