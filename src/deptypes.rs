//! Dependency-type flags attached to graph edges.

use std::fmt;

bitflags::bitflags! {
    /// The relationship kinds of a dependency edge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct DepTypes: u8 {
        const BUILD = 1 << 0;
        const LINK = 1 << 1;
        const RUN = 1 << 2;
        const TEST = 1 << 3;
    }
}

const NAMES: [(DepTypes, &str, char); 4] = [
    (DepTypes::BUILD, "build", 'b'),
    (DepTypes::LINK, "link", 'l'),
    (DepTypes::RUN, "run", 'r'),
    (DepTypes::TEST, "test", 't'),
];

impl DepTypes {
    /// Applied when a dependency declares no `type`.
    pub const DEFAULT: DepTypes = DepTypes::BUILD.union(DepTypes::LINK);

    /// Parse names such as `["build", "run"]`.
    pub fn from_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = DepTypes::empty();
        for name in names {
            let name = name.as_ref().trim();
            let flag = NAMES
                .iter()
                .find(|(_, n, _)| *n == name)
                .map(|(f, _, _)| *f)
                .ok_or_else(|| name.to_string())?;
            out |= flag;
        }
        Ok(out)
    }

    pub fn names(&self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(f, _, _)| self.contains(*f))
            .map(|(_, n, _)| *n)
            .collect()
    }

    /// Fixed-width column such as `[bl  ]`.
    pub fn column(&self) -> String {
        let mut out = String::from("[");
        for (flag, _, c) in NAMES {
            out.push(if self.contains(flag) { c } else { ' ' });
        }
        out.push(']');
        out
    }
}

impl Default for DepTypes {
    fn default() -> Self {
        DepTypes::DEFAULT
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let t = DepTypes::from_names(["build", "run"]).unwrap();
        assert_eq!(t, DepTypes::BUILD | DepTypes::RUN);
        assert_eq!(t.to_string(), "build,run");
        assert_eq!(t.column(), "[b r ]");
        assert_eq!(DepTypes::from_names(["bogus"]), Err("bogus".to_string()));
        assert_eq!(DepTypes::default().names(), vec!["build", "link"]);
    }
}
