//! Named, string-valued model variables.
//!
//! Every model exposes its parameters as `(name, type, value)` triples so a
//! caller that knows nothing about the concrete model can list and change
//! them. Each model declares its fields once through [`FieldTable`]; the
//! same declaration drives `vars()`, `set_vars()`, config file loading and
//! the decision whether a change invalidates the model's sampled index.

use crate::error::{Result, SqwError};
use nalgebra::Vector3;

/// Separator between entries in the variable wire format.
pub const ENTRY_SEP: &str = "#;#";
/// Separator between the fields of one entry.
pub const FIELD_SEP: &str = "#,#";

/// A model parameter as seen from outside the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Advisory type tag (`real`, `uint`, `vector`, ...).
    pub ty: String,
    pub value: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            value: value.into(),
        }
    }
}

/// Fit metadata for a parameter: its error and whether it is free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FitVariable {
    pub name: String,
    pub error: String,
    pub free: bool,
}

impl FitVariable {
    pub fn new(name: impl Into<String>, error: impl Into<String>, free: bool) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            free,
        }
    }
}

/// Whether changing a field invalidates sampled data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Changes the sampled point set; the model rebuilds its index.
    Structural,
    /// Only read at evaluation time.
    Cosmetic,
}

/// Mutable view of one typed model field.
pub enum Slot<'a> {
    Real(&'a mut f64),
    Uint(&'a mut u32),
    Vector(&'a mut Vector3<f64>),
}

impl Slot<'_> {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Slot::Real(_) => "real",
            Slot::Uint(_) => "uint",
            Slot::Vector(_) => "vector",
        }
    }

    pub fn format(&self) -> String {
        match self {
            Slot::Real(v) => format_real(**v),
            Slot::Uint(v) => v.to_string(),
            Slot::Vector(v) => format_vec3(v),
        }
    }

    /// Parse `value` into the field. The field is untouched on error.
    pub fn assign(self, value: &str) -> Result<()> {
        match self {
            Slot::Real(v) => *v = parse_real(value)?,
            Slot::Uint(v) => *v = parse_uint(value)?,
            Slot::Vector(v) => *v = parse_vec3(value)?,
        }
        Ok(())
    }
}

/// Declarative parameter set of a model.
pub trait FieldTable: Clone {
    /// Field names in the order `vars()` reports them.
    const NAMES: &'static [&'static str];

    fn slot(&mut self, name: &str) -> Option<(FieldKind, Slot<'_>)>;

    fn kind(&self, name: &str) -> Option<FieldKind> {
        self.clone().slot(name).map(|(kind, _)| kind)
    }

    fn to_vars(&self) -> Vec<Variable> {
        let mut scratch = self.clone();
        Self::NAMES
            .iter()
            .filter_map(|&name| {
                let (_, slot) = scratch.slot(name)?;
                Some(Variable::new(name, slot.type_tag(), slot.format()))
            })
            .collect()
    }

    /// Apply every known, parseable entry. Returns whether a structural
    /// field was among them.
    fn apply(&mut self, vars: &[Variable]) -> bool {
        let mut rebuild = false;
        for var in vars {
            let Some((kind, slot)) = self.slot(&var.name) else {
                tracing::trace!(name = %var.name, "ignoring unknown variable");
                continue;
            };
            match slot.assign(&var.value) {
                Ok(()) => rebuild |= kind == FieldKind::Structural,
                Err(e) => tracing::debug!(name = %var.name, "skipping variable: {}", e),
            }
        }
        rebuild
    }
}

pub fn format_real(v: f64) -> String {
    format!("{}", v)
}

pub fn format_vec3(v: &Vector3<f64>) -> String {
    format!("{} {} {}", v.x, v.y, v.z)
}

pub fn parse_real(s: &str) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .map_err(|e| SqwError::Format(format!("'{}' is not a real: {}", s, e)))
}

pub fn parse_uint(s: &str) -> Result<u32> {
    s.trim()
        .parse::<u32>()
        .map_err(|e| SqwError::Format(format!("'{}' is not an unsigned integer: {}", s, e)))
}

/// Three components separated by whitespace and/or commas.
pub fn parse_vec3(s: &str) -> Result<Vector3<f64>> {
    let comps = s
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(parse_real)
        .collect::<Result<Vec<_>>>()?;
    match comps.as_slice() {
        &[x, y, z] => Ok(Vector3::new(x, y, z)),
        _ => Err(SqwError::Format(format!(
            "'{}' needs 3 components, found {}",
            s,
            comps.len()
        ))),
    }
}

/// Serialise variables as `name#,#type#,#value` joined by `#;#`.
pub fn encode_vars(vars: &[Variable]) -> String {
    vars.iter()
        .map(|v| [v.name.as_str(), v.ty.as_str(), v.value.as_str()].join(FIELD_SEP))
        .collect::<Vec<_>>()
        .join(ENTRY_SEP)
}

/// Inverse of [`encode_vars`]. Empty entries are skipped, malformed ones
/// logged and skipped.
pub fn decode_vars(wire: &str) -> Vec<Variable> {
    wire.split(ENTRY_SEP)
        .filter(|e| !e.is_empty())
        .filter_map(|entry| {
            let fields: Vec<&str> = entry.split(FIELD_SEP).collect();
            match fields.as_slice() {
                &[name, ty, value] => Some(Variable::new(name, ty, value)),
                _ => {
                    tracing::warn!("{}", SqwError::Format(entry.to_string()));
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Demo {
        g: Vector3<f64>,
        t: f64,
        n: u32,
    }

    impl FieldTable for Demo {
        const NAMES: &'static [&'static str] = &["G", "T", "n"];

        fn slot(&mut self, name: &str) -> Option<(FieldKind, Slot<'_>)> {
            Some(match name {
                "G" => (FieldKind::Structural, Slot::Vector(&mut self.g)),
                "T" => (FieldKind::Cosmetic, Slot::Real(&mut self.t)),
                "n" => (FieldKind::Structural, Slot::Uint(&mut self.n)),
                _ => return None,
            })
        }
    }

    #[test]
    fn test_to_vars_order_and_tags() {
        let d = Demo {
            g: Vector3::new(1.0, 0.0, 0.5),
            t: 300.0,
            n: 7,
        };
        let vars = d.to_vars();
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[0], Variable::new("G", "vector", "1 0 0.5"));
        assert_eq!(vars[1], Variable::new("T", "real", "300"));
        assert_eq!(vars[2], Variable::new("n", "uint", "7"));
    }

    #[test]
    fn test_apply_rebuild_decision() {
        let mut d = Demo::default();
        assert!(!d.apply(&[Variable::new("T", "real", "10")]));
        assert_eq!(d.t, 10.0);

        assert!(d.apply(&[Variable::new("G", "vector", "2, 0, 0")]));
        assert_eq!(d.g, Vector3::new(2.0, 0.0, 0.0));

        // unknown and unparseable entries are skipped
        assert!(!d.apply(&[
            Variable::new("bogus", "real", "1"),
            Variable::new("n", "uint", "-3"),
            Variable::new("T", "real", "abc"),
        ]));
        assert_eq!(d.n, 0);
        assert_eq!(d.t, 10.0);
    }

    #[test]
    fn test_parse_vec3() {
        assert_eq!(parse_vec3(" 1 2\t3 ").unwrap(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(parse_vec3("1,2,3").unwrap(), Vector3::new(1.0, 2.0, 3.0));
        assert!(parse_vec3("1 2").is_err());
    }

    #[test]
    fn test_wire_format() {
        let vars = vec![
            Variable::new("G", "vector", "1 0 0"),
            Variable::new("note", "str", "a, b; c"),
        ];
        let wire = encode_vars(&vars);
        assert_eq!(wire, "G#,#vector#,#1 0 0#;#note#,#str#,#a, b; c");
        assert_eq!(decode_vars(&wire), vars);
    }

    #[test]
    fn test_wire_skips_empty_and_malformed() {
        let decoded = decode_vars("#;#T#,#real#,#5#;##;#broken#;#");
        assert_eq!(decoded, vec![Variable::new("T", "real", "5")]);
        assert!(decode_vars("").is_empty());
    }
}
