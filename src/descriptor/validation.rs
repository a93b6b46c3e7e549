//! Validation of model descriptors

use std::collections::{HashMap, HashSet};

use crate::codegen::GENERATED_ROUTINES;
use crate::descriptor::*;

/// Model attributes that groups may not shadow
const RESERVED_ATTRIBUTES: &[&str] = &["idx_sim", "old_states", "numconsts", "numvars"];

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern",
    "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub",
    "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true", "type",
    "unsafe", "use", "where", "while", "abstract", "become", "box", "do", "final", "macro",
    "override", "priv", "typeof", "unsized", "virtual", "yield", "try", "gen",
];

/// Derived naming information of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub kind: GroupKind,
    /// Attribute name on the generated model, e.g. `fluxes`
    pub attr: String,
    /// Name of the generated struct, e.g. `FluxesSequences`
    pub struct_name: String,
    /// Conventional three-letter shorthand, e.g. `flu`
    pub shorthand: String,
}

/// A descriptor that passed all structural checks
///
/// This wrapper guarantees that group names parse, names are unique and
/// usable as identifiers, flags agree with their groups, and every method
/// list references a declared routine.
#[derive(Debug, Clone)]
pub struct ValidatedDescriptor {
    inner: ModelDescriptor,
    infos: Vec<GroupInfo>,
}

impl ValidatedDescriptor {
    pub(crate) fn new(descriptor: ModelDescriptor) -> Result<Self, DescriptorError> {
        check_identifier(&descriptor.name)?;
        validate_constants(&descriptor)?;
        let infos = validate_groups(&descriptor)?;
        validate_routines(&descriptor)?;
        Ok(Self {
            inner: descriptor,
            infos,
        })
    }

    pub fn inner(&self) -> &ModelDescriptor {
        &self.inner
    }

    pub fn into_inner(self) -> ModelDescriptor {
        self.inner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Groups in declaration order together with their derived names
    pub fn groups(&self) -> impl Iterator<Item = (&GroupInfo, &Group)> {
        self.infos.iter().zip(self.inner.groups.iter())
    }

    /// Groups of the given kind in declaration order
    pub fn groups_of(&self, kind: GroupKind) -> impl Iterator<Item = (&GroupInfo, &Group)> {
        self.groups().filter(move |(info, _)| info.kind == kind)
    }

    /// The single group of an IO kind, if declared
    pub fn io_group(&self, kind: GroupKind) -> Option<(&GroupInfo, &Group)> {
        self.groups_of(kind).next()
    }

    pub fn has_states(&self) -> bool {
        self.io_group(GroupKind::States).is_some()
    }

    /// Resolve a shorthand to the group and the model attribute it stands for
    pub fn shorthand(&self, shorthand: &str) -> Option<(&GroupInfo, &Group, String)> {
        self.groups().find_map(|(info, group)| {
            if info.shorthand == shorthand {
                return Some((info, group, info.attr.clone()));
            }
            if info.kind == GroupKind::States {
                match shorthand {
                    "new" => return Some((info, group, info.attr.clone())),
                    "old" => return Some((info, group, "old_states".to_string())),
                    _ => {}
                }
            }
            None
        })
    }

    /// Resolve a full group name such as `sequences.fluxes`
    pub fn group_named(&self, name: &str) -> Option<(&GroupInfo, &Group)> {
        self.groups().find(|(_, group)| group.name == name)
    }

    pub fn routine_names(&self) -> impl Iterator<Item = &str> {
        self.inner.routines.iter().map(|r| r.name.as_str())
    }
}

fn check_identifier(name: &str) -> Result<(), DescriptorError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name == "_" || RUST_KEYWORDS.contains(&name) {
        return Err(DescriptorError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

fn validate_constants(descriptor: &ModelDescriptor) -> Result<(), DescriptorError> {
    let mut seen = HashSet::new();
    for constant in &descriptor.constants {
        check_identifier(&constant.name)?;
        if !seen.insert(constant.name.as_str()) {
            return Err(DescriptorError::DuplicateConstant(constant.name.clone()));
        }
    }
    Ok(())
}

fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn validate_groups(descriptor: &ModelDescriptor) -> Result<Vec<GroupInfo>, DescriptorError> {
    let mut infos: Vec<GroupInfo> = Vec::with_capacity(descriptor.groups.len());
    let mut shorthands: HashMap<String, String> = HashMap::new();

    for group in &descriptor.groups {
        let (kind, category) = GroupKind::parse(&group.name)
            .ok_or_else(|| DescriptorError::InvalidGroupName(group.name.clone()))?;
        check_identifier(category)?;
        if RESERVED_ATTRIBUTES.contains(&category) || infos.iter().any(|i| i.attr == category) {
            return Err(DescriptorError::DuplicateGroup(group.name.clone()));
        }

        let mut names = HashSet::new();
        for field in &group.fields {
            check_identifier(&field.name)?;
            if !names.insert(field.name.as_str()) {
                return Err(DescriptorError::DuplicateField {
                    group: group.name.clone(),
                    field: field.name.clone(),
                });
            }
            validate_field(kind, group, field)?;
        }

        let shorthand: String = category.chars().take(3).collect();
        let mut claimed = vec![shorthand.clone()];
        if kind == GroupKind::States {
            claimed.push("old".to_string());
            claimed.push("new".to_string());
        }
        for claim in claimed {
            if let Some(first) = shorthands.insert(claim.clone(), group.name.clone()) {
                return Err(DescriptorError::ShorthandCollision {
                    shorthand: claim,
                    first,
                    second: group.name.clone(),
                });
            }
        }

        let suffix = if kind == GroupKind::Parameters {
            "Parameters"
        } else {
            "Sequences"
        };
        infos.push(GroupInfo {
            kind,
            attr: category.to_string(),
            struct_name: format!("{}{}", pascal_case(category), suffix),
            shorthand,
        });
    }
    Ok(infos)
}

fn validate_field(kind: GroupKind, group: &Group, field: &Field) -> Result<(), DescriptorError> {
    let unsupported = |flag| DescriptorError::UnsupportedFlag {
        group: group.name.clone(),
        field: field.name.clone(),
        flag,
    };

    if kind.is_sequence() && field.kind != ElementKind::Real {
        return Err(DescriptorError::NonRealSequence {
            group: group.name.clone(),
            field: field.name.clone(),
        });
    }
    if field.link != (kind == GroupKind::Link) {
        return Err(DescriptorError::LinkFlagMismatch {
            group: group.name.clone(),
            field: field.name.clone(),
        });
    }
    if field.link && field.ndim > Ndim::D1 {
        return Err(DescriptorError::LinkDimensionality {
            group: group.name.clone(),
            field: field.name.clone(),
            ndim: field.ndim.rank(),
        });
    }
    if field.persistent && !kind.is_io() {
        return Err(unsupported("persistent"));
    }
    if field.numeric && !matches!(kind, GroupKind::Fluxes | GroupKind::States) {
        return Err(unsupported("numeric"));
    }
    Ok(())
}

fn validate_routines(descriptor: &ModelDescriptor) -> Result<(), DescriptorError> {
    let mut names = HashSet::new();
    for routine in &descriptor.routines {
        check_identifier(&routine.name)?;
        if GENERATED_ROUTINES.contains(&routine.name.as_str()) {
            return Err(DescriptorError::ReservedName(routine.name.clone()));
        }
        if !names.insert(routine.name.as_str()) {
            return Err(DescriptorError::DuplicateRoutine(routine.name.clone()));
        }
    }
    for (list, methods) in descriptor.methods.named() {
        for method in methods {
            if !names.contains(method.as_str()) {
                return Err(DescriptorError::UnknownMethod {
                    list: list.to_string(),
                    routine: method.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DescriptorBuilder {
        ModelDescriptor::builder("test")
    }

    #[test]
    fn test_valid_descriptor_infos() {
        let validated = base()
            .group("parameters.control", |g| g.field(Field::real("area", Ndim::D0)))
            .group("sequences.fluxes", |g| {
                g.field(Field::real("q", Ndim::D1).numeric().persistent())
            })
            .group("sequences.states", |g| g.field(Field::real("s", Ndim::D0)))
            .build()
            .validate()
            .unwrap();

        let infos: Vec<_> = validated.groups().map(|(i, _)| i.clone()).collect();
        assert_eq!(infos[0].struct_name, "ControlParameters");
        assert_eq!(infos[1].struct_name, "FluxesSequences");
        assert_eq!(infos[1].shorthand, "flu");
        assert_eq!(validated.shorthand("old").unwrap().2, "old_states");
        assert_eq!(validated.shorthand("new").unwrap().2, "states");
        assert_eq!(validated.shorthand("con").unwrap().2, "control");
        assert!(validated.shorthand("xyz").is_none());
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        let result = base()
            .group("sequences.fluxes", |g| {
                g.field(Field::real("q", Ndim::D0))
                    .field(Field::real("q", Ndim::D1))
            })
            .build()
            .validate();
        assert!(matches!(result, Err(DescriptorError::DuplicateField { .. })));
    }

    #[test]
    fn test_link_field_rank_is_limited() {
        let result = base()
            .group("sequences.inlets", |g| g.field(Field::link("q", Ndim::D2)))
            .build()
            .validate();
        assert!(matches!(
            result,
            Err(DescriptorError::LinkDimensionality { ndim: 2, .. })
        ));
    }

    #[test]
    fn test_link_flag_must_match_group() {
        let result = base()
            .group("sequences.fluxes", |g| g.field(Field::link("q", Ndim::D0)))
            .build()
            .validate();
        assert!(matches!(result, Err(DescriptorError::LinkFlagMismatch { .. })));

        let result = base()
            .group("sequences.outlets", |g| g.field(Field::real("q", Ndim::D0)))
            .build()
            .validate();
        assert!(matches!(result, Err(DescriptorError::LinkFlagMismatch { .. })));
    }

    #[test]
    fn test_sequences_must_be_real() {
        let result = base()
            .group("sequences.aides", |g| g.field(Field::integer("n", Ndim::D0)))
            .build()
            .validate();
        assert!(matches!(result, Err(DescriptorError::NonRealSequence { .. })));
    }

    #[test]
    fn test_persistence_outside_io_groups() {
        let result = base()
            .group("sequences.aides", |g| {
                g.field(Field::real("a", Ndim::D0).persistent())
            })
            .build()
            .validate();
        assert!(matches!(
            result,
            Err(DescriptorError::UnsupportedFlag {
                flag: "persistent",
                ..
            })
        ));
    }

    #[test]
    fn test_shorthand_collision() {
        let result = base()
            .group("sequences.inputs", |g| g.field(Field::real("p", Ndim::D0)))
            .group("sequences.inpatients", |g| g.field(Field::real("x", Ndim::D0)))
            .build()
            .validate();
        assert!(matches!(
            result,
            Err(DescriptorError::ShorthandCollision { .. })
        ));
    }

    #[test]
    fn test_invalid_group_and_identifier() {
        let result = base()
            .group("fluxes", |g| g.field(Field::real("q", Ndim::D0)))
            .build()
            .validate();
        assert!(matches!(result, Err(DescriptorError::InvalidGroupName(_))));

        let result = base()
            .group("sequences.fluxes", |g| g.field(Field::real("type", Ndim::D0)))
            .build()
            .validate();
        assert!(matches!(result, Err(DescriptorError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_method_lists_reference_routines() {
        let result = base().run(&["calc_q_v1"]).build().validate();
        assert!(matches!(result, Err(DescriptorError::UnknownMethod { .. })));

        let result = base()
            .routine("do_it", "def do_it(model):\n    pass\n")
            .build()
            .validate();
        assert!(matches!(result, Err(DescriptorError::ReservedName(_))));
    }

    #[test]
    fn test_reserved_model_attribute() {
        let result = base()
            .group("sequences.numvars", |g| g.field(Field::real("x", Ndim::D0)))
            .build()
            .validate();
        assert!(matches!(result, Err(DescriptorError::DuplicateGroup(_))));
    }
}
