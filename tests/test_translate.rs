//! Integration tests for routine translation

use hydrocomp::descriptor::RoutineSource;
use hydrocomp::*;

fn descriptor() -> ValidatedDescriptor {
    ModelDescriptor::builder("lland")
        .constant("RHO", ConstValue::Real(1000.0))
        .group("parameters.control", |g| {
            g.field(Field::integer("nhru", Ndim::D0))
                .field(Field::real("wmax", Ndim::D1))
                .field(Field::boolean("frozen", Ndim::D0))
        })
        .group("sequences.fluxes", |g| {
            g.field(Field::real("qb", Ndim::D1))
                .field(Field::real("qdgz", Ndim::D0))
        })
        .group("sequences.states", |g| g.field(Field::real("bowa", Ndim::D1)))
        .build()
        .validate()
        .unwrap()
}

fn translate(name: &str, source: &str) -> Result<TranslatedRoutine, TranslateError> {
    FunctionTranslator::new(&descriptor(), CodegenOptions::performance()).translate(
        &RoutineSource {
            name: name.to_string(),
            source: source.to_string(),
        },
    )
}

mod dialect {
    use super::*;

    #[test]
    fn test_documented_routine_with_bindings() {
        let source = r#"def calc_qb_v1(model):
    """Calculate base flow.

    Basic equation: QB = WMax * BoWa / 1000
    """
    con = model.parameters.control.fastaccess
    flu = model.sequences.fluxes.fastaccess
    old = model.sequences.states.fastaccess_old
    new = model.sequences.states.fastaccess_new
    for k in range(con.nhru):
        if con.frozen or old.bowa[k] <= 0.:  # nothing to drain
            flu.qb[k] = 0.
        else:
            flu.qb[k] = con.wmax[k] * old.bowa[k] / RHO
        new.bowa[k] = old.bowa[k] - flu.qb[k]
"#;
        let routine = translate("calc_qb_v1", source).unwrap();
        assert!(routine.code.starts_with("pub fn calc_qb_v1(&mut self) {"));
        assert!(routine
            .code
            .contains("for k in 0..(self.control.nhru as usize) {"));
        assert!(routine
            .code
            .contains("if self.control.frozen || self.old_states.bowa[k] <= 0.0 {"));
        assert!(routine
            .code
            .contains("self.fluxes.qb[k] = self.control.wmax[k]*self.old_states.bowa[k]/RHO;"));
        assert!(routine
            .code
            .contains("self.states.bowa[k] = self.old_states.bowa[k] - self.fluxes.qb[k];"));
        assert!(!routine.code.contains("fastaccess"));
        assert!(!routine.code.contains("Basic equation"));
        assert!(routine.thread_release_safe);
    }

    #[test]
    fn test_continuations_and_compound_operators() {
        let source = "def calc_qdgz(model):\n    flu.qdgz = 0.\n    for k in range(con.nhru):\n        flu.qdgz += (flu.qb[k] *\n                     con.wmax[k])\n        flu.qdgz /= 2\n";
        let routine = translate("calc_qdgz", source).unwrap();
        assert!(routine
            .code
            .contains("self.fluxes.qdgz = self.fluxes.qdgz + ((self.fluxes.qb[k]*self.control.wmax[k]));"));
        assert!(routine
            .code
            .contains("self.fluxes.qdgz = self.fluxes.qdgz/(2.0);"));
    }

    #[test]
    fn test_while_and_early_return() {
        let source = "def find_k(model, threshold):\n    k = 0\n    while k < con.nhru:\n        if flu.qb[k] > threshold:\n            return k\n        k += 1\n    return -1\n";
        let routine = translate("find_k", source).unwrap();
        assert!(routine
            .code
            .contains("pub fn find_k(&mut self, threshold: f64) -> f64 {"));
        assert!(routine.code.contains("let mut k: usize = 0;"));
        assert!(routine.code.contains("while (k as i64) < self.control.nhru {"));
        assert!(routine.code.contains("return (k as f64);"));
        assert!(routine.code.contains("k = k + (1);"));
        assert!(routine.code.contains("return -1.0;"));
    }
}

mod errors {
    use super::*;

    #[test]
    fn test_unknown_shorthand() {
        let err = translate("calc_x", "def calc_x(model):\n    abc.x = 1.\n").unwrap_err();
        assert!(err.to_string().contains("calc_x"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_unknown_field() {
        let err = translate("calc_x", "def calc_x(model):\n    flu.nope = 1.\n").unwrap_err();
        assert!(matches!(err, TranslateError::UnknownField { ref field, .. } if field == "nope"));
    }

    #[test]
    fn test_unbalanced_brackets() {
        let err = translate("calc_x", "def calc_x(model):\n    flu.qdgz = (1. + 2.\n").unwrap_err();
        assert!(matches!(
            err,
            TranslateError::UnbalancedBrackets { ref routine, line: 2 } if routine == "calc_x"
        ));
    }

    #[test]
    fn test_unknown_routine_call() {
        let err = translate("calc_x", "def calc_x(model):\n    model.calc_y()\n").unwrap_err();
        assert!(matches!(err, TranslateError::UnknownRoutine { ref callee, .. } if callee == "calc_y"));
    }

    #[test]
    fn test_syntax_error_has_line() {
        let err = translate("calc_x", "def calc_x(model):\n    pass\n    flu.qdgz = = 1.\n").unwrap_err();
        assert!(matches!(err, TranslateError::Syntax { line: 3, .. }));
    }
}
