//! Model descriptors
//!
//! A [ModelDescriptor] is the explicit, read-only snapshot of a model kind
//! that the surrounding simulation engine hands to the code generator: its
//! parameter and sequence groups with their fields, module-level constants,
//! the user-authored routines, and which routines make up each stage of a
//! simulation step. Descriptors are plain data (serde), and must pass
//! [ModelDescriptor::validate] before any emitter sees them.

mod builder;
mod validation;

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

pub use builder::{DescriptorBuilder, GroupBuilder};
pub use validation::{GroupInfo, ValidatedDescriptor};

// ═══════════════════════════════════════════════════════════════════════════════
// Fields
// ═══════════════════════════════════════════════════════════════════════════════

/// Element kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Boolean,
    Integer,
    Real,
    Text,
}

/// Dimensionality of a field, restricted to what the emitters support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Ndim {
    D0,
    D1,
    D2,
    D3,
}

impl Ndim {
    /// Number of axes
    pub fn rank(self) -> usize {
        match self {
            Ndim::D0 => 0,
            Ndim::D1 => 1,
            Ndim::D2 => 2,
            Ndim::D3 => 3,
        }
    }
}

impl TryFrom<u8> for Ndim {
    type Error = DescriptorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Ndim::D0),
            1 => Ok(Ndim::D1),
            2 => Ok(Ndim::D2),
            3 => Ok(Ndim::D3),
            other => Err(DescriptorError::InvalidDimensionality(other)),
        }
    }
}

impl From<Ndim> for u8 {
    fn from(ndim: Ndim) -> u8 {
        ndim.rank() as u8
    }
}

/// One declared unit of model data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Field {
    pub name: String,
    pub kind: ElementKind,
    pub ndim: Ndim,
    /// Participates in adaptive integration
    #[serde(default)]
    pub numeric: bool,
    /// Eligible for disk or RAM buffering (sequences only)
    #[serde(default)]
    pub persistent: bool,
    /// Holds non-owning references into another model (sequences only)
    #[serde(default)]
    pub link: bool,
}

impl Field {
    /// Create a field without any flags
    pub fn new(name: impl Into<String>, kind: ElementKind, ndim: Ndim) -> Self {
        Self {
            name: name.into(),
            kind,
            ndim,
            numeric: false,
            persistent: false,
            link: false,
        }
    }

    /// A real-valued field
    pub fn real(name: impl Into<String>, ndim: Ndim) -> Self {
        Self::new(name, ElementKind::Real, ndim)
    }

    /// An integer field
    pub fn integer(name: impl Into<String>, ndim: Ndim) -> Self {
        Self::new(name, ElementKind::Integer, ndim)
    }

    /// A boolean field
    pub fn boolean(name: impl Into<String>, ndim: Ndim) -> Self {
        Self::new(name, ElementKind::Boolean, ndim)
    }

    /// A link field
    pub fn link(name: impl Into<String>, ndim: Ndim) -> Self {
        Self {
            link: true,
            ..Self::real(name, ndim)
        }
    }

    pub fn numeric(mut self) -> Self {
        self.numeric = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Groups
// ═══════════════════════════════════════════════════════════════════════════════

/// Role of a group, derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// `parameters.*`
    Parameters,
    /// `sequences.inputs`, loaded each step
    Inputs,
    /// `sequences.fluxes`, saved each step
    Fluxes,
    /// `sequences.states`, saved each step, with an old snapshot
    States,
    /// `sequences.{inlets,outlets,receivers,senders}`
    Link,
    /// Any other sequence group, e.g. `sequences.aides`
    Plain,
}

impl GroupKind {
    /// Parse a group name such as `sequences.fluxes`
    pub fn parse(name: &str) -> Option<(GroupKind, &str)> {
        let (family, category) = name.split_once('.')?;
        if category.is_empty() || category.contains('.') {
            return None;
        }
        let kind = match family {
            "parameters" => GroupKind::Parameters,
            "sequences" => match category {
                "inputs" => GroupKind::Inputs,
                "fluxes" => GroupKind::Fluxes,
                "states" => GroupKind::States,
                "inlets" | "outlets" | "receivers" | "senders" => GroupKind::Link,
                _ => GroupKind::Plain,
            },
            _ => return None,
        };
        Some((kind, category))
    }

    pub fn is_sequence(self) -> bool {
        !matches!(self, GroupKind::Parameters)
    }

    /// Groups whose persistent fields get open/close/load/save routines
    pub fn is_io(self) -> bool {
        matches!(self, GroupKind::Inputs | GroupKind::Fluxes | GroupKind::States)
    }
}

/// A named, ordered group of fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    /// E.g. `parameters.control` or `sequences.states`
    pub name: String,
    pub fields: Vec<Field>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Constants, routines and method lists
// ═══════════════════════════════════════════════════════════════════════════════

/// Value of a module-level constant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Real(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Constant {
    pub name: String,
    pub value: ConstValue,
}

/// A user-authored per-step routine in source form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutineSource {
    pub name: String,
    pub source: String,
}

/// Routines called by the generated stage procedures, in call order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MethodLists {
    pub run: Vec<String>,
    pub inlets: Vec<String>,
    pub outlets: Vec<String>,
    pub receivers: Vec<String>,
    pub senders: Vec<String>,
    pub part_ode: Vec<String>,
    pub full_ode: Vec<String>,
}

impl MethodLists {
    /// All lists with their names, in a fixed order
    pub fn named(&self) -> [(&'static str, &[String]); 7] {
        [
            ("run", &self.run),
            ("inlets", &self.inlets),
            ("outlets", &self.outlets),
            ("receivers", &self.receivers),
            ("senders", &self.senders),
            ("part_ode", &self.part_ode),
            ("full_ode", &self.full_ode),
        ]
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Model descriptor
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of a model kind's declared data and per-step routines
///
/// # Example
///
/// ```ignore
/// use hydrocomp::descriptor::ModelDescriptor;
///
/// let json = r#"{
///     "name": "lstream",
///     "groups": [
///         { "name": "sequences.inlets", "fields": [
///             { "name": "q", "kind": "real", "ndim": 1, "link": true }
///         ]}
///     ]
/// }"#;
///
/// let descriptor = ModelDescriptor::from_json(json)?.validate()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDescriptor {
    /// Model kind, e.g. `wland`
    pub name: String,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub routines: Vec<RoutineSource>,
    #[serde(default)]
    pub methods: MethodLists,
    /// Declares adaptive numerical integration
    #[serde(default)]
    pub numerical: bool,
}

impl ModelDescriptor {
    /// Start building a descriptor in code
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(name)
    }

    /// Parse a descriptor from JSON
    pub fn from_json(json: &str) -> Result<Self, DescriptorError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the descriptor to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check all structural invariants
    pub fn validate(self) -> Result<ValidatedDescriptor, DescriptorError> {
        ValidatedDescriptor::new(self)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn routine(&self, name: &str) -> Option<&RoutineSource> {
        self.routines.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndim_rejects_out_of_range() {
        assert_eq!(Ndim::try_from(3).unwrap(), Ndim::D3);
        assert!(matches!(
            Ndim::try_from(4),
            Err(DescriptorError::InvalidDimensionality(4))
        ));
    }

    #[test]
    fn test_parse_descriptor_from_json() {
        let json = r#"{
            "name": "lstream",
            "constants": [{ "name": "FIELD", "value": 1 }],
            "groups": [
                { "name": "parameters.control", "fields": [
                    { "name": "len", "kind": "real", "ndim": 0 }
                ]},
                { "name": "sequences.fluxes", "fields": [
                    { "name": "qz", "kind": "real", "ndim": 0, "persistent": true }
                ]}
            ],
            "methods": { "run": [] }
        }"#;

        let descriptor = ModelDescriptor::from_json(json).unwrap();
        assert_eq!(descriptor.name, "lstream");
        assert_eq!(descriptor.groups.len(), 2);
        assert_eq!(descriptor.constants[0].value, ConstValue::Int(1));
        assert!(descriptor.groups[1].fields[0].persistent);
        assert!(!descriptor.numerical);
    }

    #[test]
    fn test_parse_descriptor_with_bad_ndim() {
        let json = r#"{
            "name": "bad",
            "groups": [
                { "name": "sequences.fluxes", "fields": [
                    { "name": "q", "kind": "real", "ndim": 4 }
                ]}
            ]
        }"#;

        assert!(ModelDescriptor::from_json(json).is_err());
    }

    #[test]
    fn test_group_kind_parse() {
        assert_eq!(
            GroupKind::parse("sequences.states"),
            Some((GroupKind::States, "states"))
        );
        assert_eq!(
            GroupKind::parse("sequences.outlets"),
            Some((GroupKind::Link, "outlets"))
        );
        assert_eq!(
            GroupKind::parse("parameters.control"),
            Some((GroupKind::Parameters, "control"))
        );
        assert_eq!(GroupKind::parse("control"), None);
        assert_eq!(GroupKind::parse("options.fast"), None);
        assert_eq!(GroupKind::parse("sequences."), None);
    }

    #[test]
    fn test_json_round_trip_preserves_order() {
        let descriptor = ModelDescriptor::builder("m")
            .group("sequences.fluxes", |g| {
                g.field(Field::real("b", Ndim::D0))
                    .field(Field::real("a", Ndim::D1))
            })
            .build();
        let json = descriptor.to_json().unwrap();
        let parsed = ModelDescriptor::from_json(&json).unwrap();
        assert_eq!(parsed, descriptor);
        assert_eq!(parsed.groups[0].fields[0].name, "b");
    }
}
