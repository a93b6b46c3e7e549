use crate::descriptor::*;

/// Incrementally assembles a [ModelDescriptor]
pub struct DescriptorBuilder {
    descriptor: ModelDescriptor,
}

impl DescriptorBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: ModelDescriptor {
                name: name.into(),
                constants: Vec::new(),
                groups: Vec::new(),
                routines: Vec::new(),
                methods: MethodLists::default(),
                numerical: false,
            },
        }
    }

    pub fn constant(mut self, name: impl Into<String>, value: ConstValue) -> Self {
        self.descriptor.constants.push(Constant {
            name: name.into(),
            value,
        });
        self
    }

    /// Add a group, filling its fields through the closure
    pub fn group(mut self, name: impl Into<String>, fill: impl FnOnce(GroupBuilder) -> GroupBuilder) -> Self {
        let builder = fill(GroupBuilder {
            group: Group {
                name: name.into(),
                fields: Vec::new(),
            },
        });
        self.descriptor.groups.push(builder.group);
        self
    }

    pub fn routine(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.descriptor.routines.push(RoutineSource {
            name: name.into(),
            source: source.into(),
        });
        self
    }

    /// Set the routines called by `run`
    pub fn run(mut self, methods: &[&str]) -> Self {
        self.descriptor.methods.run = to_owned(methods);
        self
    }

    pub fn inlets(mut self, methods: &[&str]) -> Self {
        self.descriptor.methods.inlets = to_owned(methods);
        self
    }

    pub fn outlets(mut self, methods: &[&str]) -> Self {
        self.descriptor.methods.outlets = to_owned(methods);
        self
    }

    pub fn receivers(mut self, methods: &[&str]) -> Self {
        self.descriptor.methods.receivers = to_owned(methods);
        self
    }

    pub fn senders(mut self, methods: &[&str]) -> Self {
        self.descriptor.methods.senders = to_owned(methods);
        self
    }

    /// Declare adaptive integration with the given partial and full ODE routines
    pub fn numerical(mut self, part_ode: &[&str], full_ode: &[&str]) -> Self {
        self.descriptor.numerical = true;
        self.descriptor.methods.part_ode = to_owned(part_ode);
        self.descriptor.methods.full_ode = to_owned(full_ode);
        self
    }

    pub fn build(self) -> ModelDescriptor {
        self.descriptor
    }
}

/// Collects the fields of one group
pub struct GroupBuilder {
    group: Group,
}

impl GroupBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.group.fields.push(field);
        self
    }
}

fn to_owned(methods: &[&str]) -> Vec<String> {
    methods.iter().map(|m| m.to_string()).collect()
}
