//! Optimization criteria used to rank alternative solutions.

use std::fmt;

/// How a criterion fared in a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionStatus {
    /// Zero cost.
    Satisfied,
    /// Non-zero cost, with the number of nodes that contributed.
    Partial(u64),
    /// Nothing in the solve could be scored by this criterion.
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    /// 1 is the most important.
    pub priority: u32,
    pub name: &'static str,
    /// Cost contributed by reused nodes.
    pub installed_cost: u64,
    /// Cost contributed by nodes that must be built.
    pub build_cost: u64,
    pub status: CriterionStatus,
}

impl Criterion {
    pub fn total(&self) -> u64 {
        self.installed_cost + self.build_cost
    }
}

pub(crate) const CRITERIA: [&str; 9] = [
    "number of packages to build (vs. reuse)",
    "requirement weight",
    "deprecated versions used",
    "version badness",
    "non-default variant values",
    "non-preferred compilers",
    "non-preferred providers",
    "number of nodes",
    "version age",
];

/// Accumulates per-node costs into the criteria table.
#[derive(Debug, Clone)]
pub(crate) struct CriteriaBuilder {
    costs: [(u64, u64, u64); CRITERIA.len()],
    applicable: [bool; CRITERIA.len()],
}

impl CriteriaBuilder {
    pub(crate) fn new() -> Self {
        Self {
            costs: [(0, 0, 0); CRITERIA.len()],
            applicable: [true; CRITERIA.len()],
        }
    }

    /// Add `cost` to criterion `index` (0-based priority order).
    pub(crate) fn add(&mut self, index: usize, reused: bool, cost: usize) {
        let entry = &mut self.costs[index];
        let cost = cost as u64;
        if reused {
            entry.0 += cost;
        } else {
            entry.1 += cost;
        }
        if cost > 0 {
            entry.2 += 1;
        }
    }

    pub(crate) fn not_applicable(&mut self, index: usize) {
        self.applicable[index] = false;
    }

    pub(crate) fn finish(self) -> CriteriaReport {
        let criteria = CRITERIA
            .iter()
            .zip(self.costs)
            .zip(self.applicable)
            .enumerate()
            .map(|(i, ((name, (installed, build, count)), applicable))| Criterion {
                priority: i as u32 + 1,
                name,
                installed_cost: installed,
                build_cost: build,
                status: if !applicable {
                    CriterionStatus::NotApplicable
                } else if installed + build == 0 {
                    CriterionStatus::Satisfied
                } else {
                    CriterionStatus::Partial(count)
                },
            })
            .collect();
        CriteriaReport { criteria }
    }
}

/// The criteria of one solution, in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriteriaReport {
    pub criteria: Vec<Criterion>,
}

impl CriteriaReport {
    /// Lexicographic sort key; the smallest key is the best solution.
    pub fn key(&self) -> Vec<u64> {
        self.criteria.iter().map(Criterion::total).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    /// Sum two reports criterion by criterion.
    pub(crate) fn merge(&mut self, other: &CriteriaReport) {
        if self.criteria.is_empty() {
            self.criteria = other.criteria.clone();
            return;
        }
        for (mine, theirs) in self.criteria.iter_mut().zip(&other.criteria) {
            mine.installed_cost += theirs.installed_cost;
            mine.build_cost += theirs.build_cost;
            mine.status = match (mine.status, theirs.status) {
                (CriterionStatus::Partial(a), CriterionStatus::Partial(b)) => {
                    CriterionStatus::Partial(a + b)
                }
                (CriterionStatus::Partial(a), _) | (_, CriterionStatus::Partial(a)) => {
                    CriterionStatus::Partial(a)
                }
                (CriterionStatus::Satisfied, _) | (_, CriterionStatus::Satisfied) => {
                    CriterionStatus::Satisfied
                }
                _ => CriterionStatus::NotApplicable,
            };
        }
    }
}

impl fmt::Display for CriteriaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10}{:<42}{:>10}{:>10}", "Priority", "Criterion", "Installed", "ToBuild")?;
        for c in &self.criteria {
            let (installed, build) = match c.status {
                CriterionStatus::NotApplicable => ("-".to_string(), "-".to_string()),
                _ => (c.installed_cost.to_string(), c.build_cost.to_string()),
            };
            writeln!(f, "{:<10}{:<42}{:>10}{:>10}", c.priority, c.name, installed, build)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_orders_by_priority() {
        let mut reuse = CriteriaBuilder::new();
        reuse.add(0, true, 0);
        reuse.add(8, true, 3);
        let mut build = CriteriaBuilder::new();
        build.add(0, false, 1);
        let (reuse, build) = (reuse.finish(), build.finish());
        assert!(reuse.key() < build.key());
        assert_eq!(reuse.criteria[8].status, CriterionStatus::Partial(1));
        assert_eq!(reuse.criteria[8].installed_cost, 3);
        assert_eq!(reuse.criteria[0].status, CriterionStatus::Satisfied);
    }

    #[test]
    fn table_lists_every_criterion() {
        let mut builder = CriteriaBuilder::new();
        builder.not_applicable(6);
        let report = builder.finish();
        let table = report.to_string();
        assert!(table.starts_with("Priority"));
        assert_eq!(table.lines().count(), CRITERIA.len() + 1);
        assert_eq!(
            report.get("non-preferred providers").map(|c| c.status),
            Some(CriterionStatus::NotApplicable)
        );
    }

    #[test]
    fn merge_sums_costs() {
        let mut a = CriteriaBuilder::new();
        a.add(7, false, 2);
        let mut b = CriteriaBuilder::new();
        b.add(7, false, 3);
        let mut report = a.finish();
        report.merge(&b.finish());
        assert_eq!(report.criteria[7].build_cost, 5);
        assert_eq!(report.criteria[7].status, CriterionStatus::Partial(2));
    }
}
