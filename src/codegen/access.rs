use crate::codegen::{BuildMode, CodegenOptions};

/// Renders element access for the generated scaffolding
///
/// Performance mode reads through `uget` and writes through `uget_mut`,
/// relying on buffers sized by `set_shape` and `prepare_numerics`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Access {
    unchecked: bool,
}

impl Access {
    pub fn new(options: CodegenOptions) -> Self {
        Self {
            unchecked: options.mode == BuildMode::Performance,
        }
    }

    fn index(idx: &[String]) -> String {
        match idx {
            [single] => single.clone(),
            _ => format!("[{}]", idx.join(", ")),
        }
    }

    /// Expression reading `base` at `idx`
    pub fn read(&self, base: &str, idx: &[String]) -> String {
        if idx.is_empty() {
            base.to_string()
        } else if self.unchecked {
            format!("*{}.uget({})", base, Self::index(idx))
        } else {
            format!("{}[{}]", base, Self::index(idx))
        }
    }

    /// Statement assigning `value` to `base` at `idx`
    pub fn write(&self, base: &str, idx: &[String], value: &str) -> String {
        let statement = if idx.is_empty() {
            format!("{} = {};", base, value)
        } else if self.unchecked {
            format!("*{}.uget_mut({}) = {};", base, Self::index(idx), value)
        } else {
            format!("{}[{}] = {};", base, Self::index(idx), value)
        };
        self.wrap(statement)
    }

    /// Wrap a statement containing unchecked access into an unsafe block
    pub fn wrap(&self, statement: String) -> String {
        if self.unchecked && statement.contains(".uget") {
            format!("unsafe {{ {} }}", statement)
        } else {
            statement
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_checked_access() {
        let access = Access::new(CodegenOptions::safety());
        assert_eq!(access.read("self.fluxes.q", &idx(&["jdx0"])), "self.fluxes.q[jdx0]");
        assert_eq!(
            access.write("self.fluxes._q_points", &idx(&["k", "jdx0"]), "1.0"),
            "self.fluxes._q_points[[k, jdx0]] = 1.0;"
        );
        assert_eq!(access.write("self.fluxes._q_sum", &[], "0.0"), "self.fluxes._q_sum = 0.0;");
    }

    #[test]
    fn test_unchecked_access() {
        let access = Access::new(CodegenOptions::performance());
        let read = access.read("self.fluxes.q", &idx(&["jdx0"]));
        assert_eq!(read, "*self.fluxes.q.uget(jdx0)");
        assert_eq!(
            access.write("self.fluxes._q_sum", &idx(&["jdx0"]), &read),
            "unsafe { *self.fluxes._q_sum.uget_mut(jdx0) = *self.fluxes.q.uget(jdx0); }"
        );
        assert_eq!(access.write("self.fluxes._q_sum", &[], "0.0"), "self.fluxes._q_sum = 0.0;");
    }
}
