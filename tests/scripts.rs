use lang::{CollectingReporter, InterpretResult, Vm};

fn run(source: &str) -> (InterpretResult, String, Vec<String>) {
    let mut vm = Vm::new();
    let mut reporter = CollectingReporter::default();
    let mut out = Vec::new();
    let result = vm.interpret(source, &mut reporter, &mut out);
    let stdout = String::from_utf8(out).expect("program output is valid utf-8");
    let errors = reporter.errors.into_iter().map(|d| d.to_string()).collect();
    (result, stdout, errors)
}

#[test]
fn scenario_1_arithmetic_precedence() {
    let (result, stdout, _) = run("print 1 + 2 * 3;");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "7\n");
}

#[test]
fn scenario_2_string_concatenation() {
    let (result, stdout, _) = run("var a = \"hi\"; var b = \" there\"; print a + b;");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "hi there\n");
}

#[test]
fn scenario_3_while_loop() {
    let (result, stdout, _) = run("var i = 0; while (i < 3) { print i; i = i + 1; }");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "0\n1\n2\n");
}

#[test]
fn scenario_4_recursive_fibonacci() {
    let (result, stdout, _) = run(
        "fun fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); } print fib(10);",
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "55\n");
}

#[test]
fn scenario_5_undefined_variable_is_a_runtime_error() {
    let (result, _stdout, errors) = run("print x;");
    assert_eq!(result, InterpretResult::RuntimeError);
    let joined = errors.join("\n");
    assert!(joined.contains("Undefined variable 'x'."));
    assert!(joined.contains("[line 1] in script"));
}

#[test]
fn scenario_6_clock_native() {
    let (result, stdout, _) = run("print clock() >= 0;");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "true\n");
}

#[test]
fn for_loop_desugars_like_while() {
    let (result, stdout, _) = run("for (var i = 0; i < 3; i = i + 1) { print i; }");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(stdout, "0\n1\n2\n");
}

#[test]
fn logical_and_or_short_circuit() {
    let (result, stdout, _) = run(
        "fun loud(v) { print v; return v; } \
         if (loud(false) and loud(true)) { print \"unreachable\"; } \
         if (loud(true) or loud(false)) { print \"reached\"; }",
    );
    assert_eq!(result, InterpretResult::Ok);
    // `and`'s right side never runs (false short-circuits); `or`'s right
    // side never runs either (true short-circuits) — only the necessary
    // `loud` calls print.
    assert_eq!(stdout, "false\ntrue\nreached\n");
}

#[test]
fn wrong_arity_is_a_runtime_error() {
    let (result, _stdout, errors) = run("fun add(a, b) { return a + b; } print add(1);");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(errors
        .iter()
        .any(|e| e.contains("Expected 2 arguments but got 1.")));
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    let (result, _stdout, errors) = run("var x = 1; print x();");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(errors
        .iter()
        .any(|e| e.contains("Can only call functions and native functions.")));
}

#[test]
fn compile_error_does_not_run_anything() {
    let (result, stdout, errors) = run("print 1 +;");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(stdout, "");
    assert!(errors.iter().any(|e| e.contains("Expect expression.")));
}

#[test]
fn globals_persist_across_interpret_calls_on_one_vm() {
    let mut vm = Vm::new();
    let mut reporter = CollectingReporter::default();

    let mut out1 = Vec::new();
    assert_eq!(
        vm.interpret("var count = 0;", &mut reporter, &mut out1),
        InterpretResult::Ok
    );

    let mut out2 = Vec::new();
    assert_eq!(
        vm.interpret("count = count + 1; print count;", &mut reporter, &mut out2),
        InterpretResult::Ok
    );
    assert_eq!(String::from_utf8(out2).unwrap(), "1\n");
}

#[test]
fn stress_gc_does_not_corrupt_a_running_program() {
    let mut vm = Vm::new();
    vm.set_stress_gc(true);
    let mut reporter = CollectingReporter::default();
    let mut out = Vec::new();
    let result = vm.interpret(
        "fun build(n) { var s = \"x\"; var i = 0; while (i < n) { s = s + \"x\"; i = i + 1; } return s; } \
         print build(50);",
        &mut reporter,
        &mut out,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(String::from_utf8(out).unwrap(), "x".repeat(51) + "\n");
    assert!(vm.gc_count() > 0);
    // The loop allocates 51 distinct intermediate strings ("x", "xx", ...,
    // 51 x's); if collection weren't actually reclaiming the ones each
    // concatenation makes dead, they'd all still be live here.
    assert!(vm.object_count() < 20);
}
