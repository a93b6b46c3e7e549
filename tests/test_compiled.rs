//! Generated crates compiled with the local cargo and driven through their
//! exported entry points
//!
//! Every test compiles at least one model against this checkout, so they only
//! run with `--features load`.

#[cfg(feature = "load")]
mod compiled_tests {
    use approx::assert_relative_eq;
    use hydrocomp::build::LOCAL_ENV;
    use hydrocomp::runtime::SequenceFile;
    use hydrocomp::*;
    use std::fs;
    use std::path::Path;

    fn compile(descriptor: ModelDescriptor, root: &Path, options: CodegenOptions) -> CompiledModel {
        compile_with(descriptor, root, options, &Cargo::locate())
    }

    fn compile_with(
        descriptor: ModelDescriptor,
        root: &Path,
        options: CodegenOptions,
        toolchain: &dyn Toolchain,
    ) -> CompiledModel {
        std::env::set_var(LOCAL_ENV, "1");
        let build = ModelBuild::new(descriptor, root).options(options);
        assert_eq!(build.ensure_up_to_date(toolchain).unwrap(), BuildOutcome::Rebuilt);
        unsafe { CompiledModel::open(&build.paths().artifact) }.unwrap()
    }

    /// Runoff accumulating the precipitation of all previous steps
    fn accumulator() -> ModelDescriptor {
        ModelDescriptor::builder("accumulator")
            .group("sequences.inputs", |g| g.field(Field::real("p", Ndim::D0).persistent()))
            .group("sequences.fluxes", |g| g.field(Field::real("q", Ndim::D0).persistent()))
            .group("sequences.states", |g| g.field(Field::real("s", Ndim::D0)))
            .routine(
                "calc_q",
                "def calc_q(model):\n    sta.s = old.s + inp.p\n    flu.q = sta.s\n",
            )
            .run(&["calc_q"])
            .build()
    }

    /// Linear storage `ds/dt = -k * s`, draining through `q`
    fn storage(with_states: bool) -> ModelDescriptor {
        let builder = ModelDescriptor::builder(if with_states { "storage" } else { "constant_flux" })
            .group("parameters.control", |g| g.field(Field::real("k", Ndim::D0)))
            .group("sequences.fluxes", |g| g.field(Field::real("q", Ndim::D0).numeric()));
        if with_states {
            builder
                .group("sequences.states", |g| g.field(Field::real("s", Ndim::D0).numeric()))
                .routine("calc_q", "def calc_q(model):\n    flu.q = con.k * sta.s\n")
                .routine("update_s", "def update_s(model):\n    sta.s = old.s - flu.q\n")
                .numerical(&["calc_q"], &["update_s"])
                .build()
        } else {
            builder
                .routine("calc_q", "def calc_q(model):\n    flu.q = con.k\n")
                .routine("update_q", "def update_q(model):\n    pass\n")
                .numerical(&["calc_q"], &["update_q"])
                .build()
        }
    }

    fn run_accumulator(options: CodegenOptions) -> Vec<f64> {
        let dir = tempfile::tempdir().unwrap();
        let mut model = compile(accumulator(), dir.path(), options);
        for (group, name) in [("inputs", "p"), ("fluxes", "q"), ("states", "s")] {
            model.set_shape(group, name, &[]).unwrap();
        }

        let inputs = dir.path().join("p.bin");
        let outputs = dir.path().join("q.bin");
        let mut file = SequenceFile::open(&inputs, 0, 1).unwrap();
        for value in [1.0, 2.0, 3.0, 4.0] {
            file.write_scalar(value).unwrap();
        }
        file.close().unwrap();

        model.activate_disk("inputs", "p", &inputs).unwrap();
        model.activate_disk("fluxes", "q", &outputs).unwrap();
        model.open_files(0).unwrap();
        for idx in 0..4 {
            model.do_it(idx).unwrap();
        }
        model.close_files().unwrap();

        let mut file = SequenceFile::open(&outputs, 0, 1).unwrap();
        (0..4).map(|_| file.read_scalar().unwrap()).collect()
    }

    #[test]
    fn test_disk_round_trip_in_both_modes() {
        let fast = run_accumulator(CodegenOptions::performance());
        assert_eq!(fast, vec![1.0, 3.0, 6.0, 10.0]);
        let safe = run_accumulator(CodegenOptions::safety());
        assert_eq!(safe, fast);
    }

    #[test]
    fn test_solver_drains_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = compile(storage(true), dir.path(), CodegenOptions::performance());
        for (group, name) in [("fluxes", "q"), ("states", "s")] {
            model.set_shape(group, name, &[]).unwrap();
        }
        model.prepare_numerics().unwrap();
        unsafe {
            model.write_field("control", "k", &[0.5]).unwrap();
            model.write_field("states", "s", &[1.0]).unwrap();
            model.write_field("old_states", "s", &[1.0]).unwrap();
        }

        model.do_it(0).unwrap();

        let s = unsafe { model.read_field("states", "s", 1) }.unwrap()[0];
        let q = unsafe { model.read_field("fluxes", "q", 1) }.unwrap()[0];
        assert_relative_eq!(s, (-0.5f64).exp(), epsilon = 0.01);
        assert_relative_eq!(q, 1.0 - s, epsilon = 1e-9);
        assert_relative_eq!(
            unsafe { model.read_field("old_states", "s", 1) }.unwrap()[0],
            s,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_solver_without_states() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = compile(storage(false), dir.path(), CodegenOptions::safety());
        model.prepare_numerics().unwrap();
        unsafe { model.write_field("control", "k", &[0.25]).unwrap() };

        model.do_it(0).unwrap();

        let q = unsafe { model.read_field("fluxes", "q", 1) }.unwrap()[0];
        assert_relative_eq!(q, 0.25, epsilon = 1e-9);
        assert!(matches!(
            model.field_ptr("old_states", "s"),
            Err(LoadError::UnknownField { .. })
        ));
    }

    /// Appends an export that runs the generated `calculate_error` on two
    /// method results of `q`
    struct WithErrorExport;

    const ERROR_EXPORT: &str = r#"
#[no_mangle]
pub extern "C" fn error_between(current: f64, previous: f64) -> f64 {
    let mut model = Model::default();
    model.prepare_numerics();
    model.fluxes._q_results[1] = previous;
    model.fluxes._q_results[2] = current;
    model.numvars.idx_method = 2;
    model.calculate_error();
    model.numvars.error
}
"#;

    impl Toolchain for WithErrorExport {
        fn build(
            &self,
            crate_dir: &Path,
            target_dir: &Path,
            module: &str,
        ) -> Result<(), ToolchainError> {
            let source = crate_dir.join("src").join("lib.rs");
            let mut text = fs::read_to_string(&source).unwrap();
            text.push_str(ERROR_EXPORT);
            fs::write(&source, text).unwrap();
            Cargo::locate().build(crate_dir, target_dir, module)
        }
    }

    #[test]
    fn test_generated_error_of_two_methods() {
        type ErrorBetween = unsafe extern "C" fn(f64, f64) -> f64;

        let dir = tempfile::tempdir().unwrap();
        let build = ModelBuild::new(storage(true), dir.path());
        std::env::set_var(LOCAL_ENV, "1");
        build.ensure_up_to_date(&WithErrorExport).unwrap();

        let library = unsafe { libloading::Library::new(&build.paths().artifact) }.unwrap();
        let error_between: libloading::Symbol<ErrorBetween> =
            unsafe { library.get(b"error_between") }.unwrap();
        assert_eq!(unsafe { error_between(5.0, 3.0) }, 2.0);
        assert_eq!(unsafe { error_between(3.0, 5.0) }, 2.0);
    }

    #[test]
    fn test_links_point_into_host_memory() {
        let junction = ModelDescriptor::builder("junction")
            .group("sequences.fluxes", |g| g.field(Field::real("q", Ndim::D0)))
            .group("sequences.inlets", |g| g.field(Field::link("q", Ndim::D1)))
            .group("sequences.outlets", |g| g.field(Field::link("q", Ndim::D0)))
            .routine(
                "pick_q",
                "def pick_q(model):\n    flu.q = 0.0\n    for idx in range(inl.len_q):\n        flu.q += inl.q[idx][0]\n",
            )
            .routine("double_q", "def double_q(model):\n    flu.q = flu.q * 2.0\n")
            .routine("pass_q", "def pass_q(model):\n    out.q[0] += flu.q\n")
            .run(&["double_q"])
            .inlets(&["pick_q"])
            .outlets(&["pass_q"])
            .build();

        let dir = tempfile::tempdir().unwrap();
        let mut model = compile(junction, dir.path(), CodegenOptions::safety());
        let mut upstream = [1.5, 2.5];
        let mut downstream = 0.0;
        model.alloc("inlets", "q", 2).unwrap();
        unsafe {
            model
                .set_pointer1d("inlets", "q", upstream.as_mut_ptr(), 0)
                .unwrap();
            model
                .set_pointer1d("inlets", "q", upstream.as_mut_ptr().add(1), 1)
                .unwrap();
            model
                .set_pointer0d("outlets", "q", &mut downstream as *mut f64)
                .unwrap();
        }

        model.do_it(0).unwrap();
        model.do_it(1).unwrap();
        assert_eq!(downstream, 16.0);

        model.dealloc("inlets", "q").unwrap();
        assert!(model.set_shape("inlets", "missing", &[1]).is_err());
    }
}
