//! Spec string syntax.
//!
//! ```text
//! name[@versions][%compiler[@versions]][+v][~v][ -v][ key=value][ /hash] [^dep ...]
//! ```
//!
//! Several specs may share one string (`mpileaks ^mpich zlib@1.2`): a bare
//! name that is not a `key=value` pair starts the next spec. Every `^dep`
//! attaches to the spec it follows, flattened, so `x ^y ^z` gives `x` two
//! dependency constraints.

use std::str::FromStr;

use crate::compiler::CompilerSpec;
use crate::error::{SpecConcretizedError, SpecSyntaxError};
use crate::spec::Spec;
use crate::variant::VariantValue;
use crate::version::VersionList;

/// Parse zero or more specs from `input`.
pub fn parse_specs(input: &str) -> Result<Vec<Spec>, SpecSyntaxError> {
    Parser::new(input).parse()
}

impl FromStr for Spec {
    type Err = SpecSyntaxError;

    /// Parse exactly one spec.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut specs = parse_specs(s)?;
        match specs.len() {
            1 => Ok(specs.remove(0)),
            0 => Err(SpecSyntaxError {
                input: s.to_string(),
                offset: 0,
                message: "expected a spec".into(),
            }),
            n => Err(SpecSyntaxError {
                input: s.to_string(),
                offset: 0,
                message: format!("expected one spec, found {n}"),
            }),
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

fn is_version_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b':' | b'=' | b',')
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    specs: Vec<Spec>,
    /// The spec attributes currently attach to.
    root: Option<Spec>,
    /// A `^dep` being built; attributes go here while it is open.
    dep: Option<Spec>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            specs: Vec::new(),
            root: None,
            dep: None,
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> SpecSyntaxError {
        SpecSyntaxError {
            input: self.input.to_string(),
            offset,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let input = self.input;
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &input[start..self.pos]
    }

    fn ident(&mut self, what: &str) -> Result<&'a str, SpecSyntaxError> {
        let at = self.pos;
        if !self.peek().is_some_and(is_ident_start) {
            return Err(self.error(at, format!("expected {what}")));
        }
        Ok(self.take_while(is_ident))
    }

    fn versions(&mut self) -> Result<VersionList, SpecSyntaxError> {
        let at = self.pos;
        let text = self.take_while(is_version_char);
        if text.is_empty() {
            return Err(self.error(at, "expected a version after `@`"));
        }
        VersionList::parse(text).map_err(|e| self.error(at, e.to_string()))
    }

    /// The spec that attributes currently apply to, creating an anonymous
    /// root when none is open.
    fn target(&mut self) -> &mut Spec {
        match &mut self.dep {
            Some(dep) => dep,
            None => self.root.get_or_insert_with(Spec::anonymous),
        }
    }

    fn close_dep(&mut self, at: usize) -> Result<(), SpecSyntaxError> {
        if let Some(dep) = self.dep.take() {
            let root = self.root.get_or_insert_with(Spec::anonymous);
            root.add_dependency(dep)
                .map_err(|e| SpecSyntaxError {
                    input: self.input.to_string(),
                    offset: at,
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn close_root(&mut self, at: usize) -> Result<(), SpecSyntaxError> {
        self.close_dep(at)?;
        if let Some(root) = self.root.take() {
            self.specs.push(root);
        }
        Ok(())
    }

    fn parse(mut self) -> Result<Vec<Spec>, SpecSyntaxError> {
        let mut after_space = true;
        loop {
            after_space |= self.skip_whitespace();
            let at = self.pos;
            let Some(b) = self.peek() else { break };
            match b {
                b'^' => {
                    self.pos += 1;
                    self.skip_whitespace();
                    let name = self.ident("a dependency name after `^`")?;
                    self.close_dep(at)?;
                    self.root.get_or_insert_with(Spec::anonymous);
                    self.dep = Some(Spec::new(name));
                }
                b'@' => {
                    self.pos += 1;
                    let versions = self.versions()?;
                    if !self.target().versions().is_any() {
                        return Err(self.error(at, "version specified twice"));
                    }
                    let result = self.target().set_versions(versions);
                    self.check(at, result)?;
                }
                b'%' => {
                    self.pos += 1;
                    let name = self.ident("a compiler name after `%`")?;
                    let mut compiler = CompilerSpec::new(name);
                    if self.peek() == Some(b'@') {
                        self.pos += 1;
                        compiler = compiler.with_versions(self.versions()?);
                    }
                    if self.target().compiler().is_some() {
                        return Err(self.error(at, "compiler specified twice"));
                    }
                    let result = self.target().set_compiler(compiler);
                    self.check(at, result)?;
                }
                b'+' | b'~' => {
                    self.pos += 1;
                    let name = self.ident("a variant name")?;
                    self.set_variant(at, VariantValue::boolean(name, b == b'+'))?;
                }
                b'-' if after_space => {
                    self.pos += 1;
                    let name = self.ident("a variant name after `-`")?;
                    self.set_variant(at, VariantValue::boolean(name, false))?;
                }
                b'/' => {
                    self.pos += 1;
                    let hash = self.take_while(|b| b.is_ascii_alphanumeric());
                    if hash.is_empty() {
                        return Err(self.error(at, "expected a hash after `/`"));
                    }
                    if self.target().abstract_hash().is_some() {
                        return Err(self.error(at, "hash specified twice"));
                    }
                    let result = self.target().set_abstract_hash(hash);
                    self.check(at, result)?;
                }
                b if is_ident_start(b) && after_space => {
                    let word = self.ident("a name")?;
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        let value_at = self.pos;
                        let value = self.take_while(|b| {
                            !b.is_ascii_whitespace() && !matches!(b, b'^' | b'%')
                        });
                        if value.is_empty() {
                            return Err(self.error(value_at, format!("expected a value for `{word}`")));
                        }
                        self.set_variant(at, key_value(word, value))?;
                    } else {
                        self.close_root(at)?;
                        self.root = Some(Spec::new(word));
                    }
                }
                _ => {
                    let c = self.input[at..].chars().next().unwrap_or('?');
                    return Err(self.error(at, format!("unexpected character `{c}`")));
                }
            }
            after_space = false;
        }
        let end = self.pos;
        self.close_root(end)?;
        Ok(self.specs)
    }

    fn set_variant(&mut self, at: usize, value: VariantValue) -> Result<(), SpecSyntaxError> {
        if self.target().variants().contains(value.name()) {
            let message = format!("variant `{}` specified twice", value.name());
            return Err(self.error(at, message));
        }
        let result = self.target().set_variant(value);
        self.check(at, result)
    }

    fn check(&self, at: usize, result: Result<(), SpecConcretizedError>) -> Result<(), SpecSyntaxError> {
        result.map_err(|e| self.error(at, e.to_string()))
    }
}

fn key_value(key: &str, value: &str) -> VariantValue {
    match value {
        "true" => VariantValue::boolean(key, true),
        "false" => VariantValue::boolean(key, false),
        v if v.contains(',') => VariantValue::multi(key, v.split(',').filter(|s| !s.is_empty())),
        v => VariantValue::single(key, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_node() {
        let s: Spec = "mpileaks@1.2:1.4%gcc@12+debug~shared build_type=Release /abc123"
            .parse()
            .unwrap();
        assert_eq!(s.name(), Some("mpileaks"));
        assert_eq!(s.versions().to_string(), "1.2:1.4");
        assert_eq!(s.compiler().unwrap().to_string(), "gcc@12");
        assert_eq!(s.variant("debug").unwrap().as_bool(), Some(true));
        assert_eq!(s.variant("shared").unwrap().as_bool(), Some(false));
        assert_eq!(s.variant("build_type").unwrap().single_value(), Some("Release"));
        assert_eq!(s.abstract_hash(), Some("abc123"));
    }

    #[test]
    fn display_round_trips() {
        for input in [
            "mpileaks@1.2:1.4%gcc@12+debug~shared build_type=Release",
            "x@=1.0",
            "y@2.4+shared ^z@1: languages=c,fortran",
            "+shared",
            "@1.0:",
        ] {
            let spec: Spec = input.parse().unwrap();
            assert_eq!(spec.to_string(), input);
            assert_eq!(spec.to_string().parse::<Spec>().unwrap(), spec);
        }
    }

    #[test]
    fn dependencies_are_flattened() {
        let s: Spec = "mpileaks ^callpath@1.0 ^mpich ^callpath+debug".parse().unwrap();
        let names: Vec<_> = s.dependencies().iter().filter_map(Spec::name).collect();
        assert_eq!(names, ["callpath", "mpich"]);
        let callpath = s.dependency("callpath").unwrap();
        assert_eq!(callpath.to_string(), "callpath@1.0+debug");
    }

    #[test]
    fn multiple_roots() {
        let specs = parse_specs("mpileaks ^mpich zlib@1.2 +shared").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].to_string(), "mpileaks ^mpich");
        assert_eq!(specs[1].to_string(), "zlib@1.2+shared");
        assert!(parse_specs("   ").unwrap().is_empty());
    }

    #[test]
    fn anonymous_condition_with_dependency() {
        let s: Spec = "+mpi ^openmpi@4:".parse().unwrap();
        assert_eq!(s.name(), None);
        assert_eq!(s.dependency("openmpi").unwrap().versions().to_string(), "4:");
        let s: Spec = "^zlib".parse().unwrap();
        assert_eq!(s.to_string(), "^zlib");
    }

    #[test]
    fn dash_disables_after_whitespace() {
        let s: Spec = "x -debug".parse().unwrap();
        assert_eq!(s.variant("debug").unwrap().as_bool(), Some(false));
        let s: Spec = "x@1.0-rc1".parse().unwrap();
        assert_eq!(s.versions().to_string(), "1.0-rc1");
    }

    #[test]
    fn syntax_errors() {
        let err = "x+shared~shared".parse::<Spec>().unwrap_err();
        assert!(err.message.contains("twice"));
        assert_eq!(err.offset, 8);

        assert!("x@1.0@2.0".parse::<Spec>().is_err());
        assert!("x ^".parse::<Spec>().is_err());
        assert!("x@".parse::<Spec>().is_err());
        assert!("x@1..2".parse::<Spec>().is_err());
        assert!("x $".parse::<Spec>().is_err());
        assert!("x y".parse::<Spec>().is_err());
        assert!("x ^y@1 ^y@2".parse::<Spec>().is_err());
    }

    #[test]
    fn setter_failures_become_syntax_errors() {
        let parser = Parser::new("zlib@1.3");
        let err = parser
            .check(
                4,
                Err(SpecConcretizedError {
                    spec: "zlib@1.3".into(),
                }),
            )
            .unwrap_err();
        assert_eq!(err.offset, 4);
        assert!(err.message.contains("concrete spec zlib@1.3"));
    }
}
