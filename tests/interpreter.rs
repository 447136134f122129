//! End-to-end tests driving the public Vm API: read, evaluate in the global
//! environment, print.

use std::fs;
use std::path::PathBuf;

use kat::error::Error;
use kat::ports::ByteStream;
use kat::printer;
use kat::reader;
use kat::vm::Vm;

/// Evaluates every form in `source`, returning each printed result.
fn eval_all(vm: &Vm, source: &str) -> Vec<String> {
    let mut src = ByteStream::from_str(source);
    let mut out = Vec::new();
    loop {
        let expr = reader::read(&vm.heap, &mut src)
            .unwrap_or_else(|e| panic!("failed to read `{}`: {}", source, e));
        let expr = match expr {
            Some(expr) => expr,
            None => return out,
        };
        let scope = vm.heap.scope_with(&[expr]);
        let value = vm
            .eval_in_global(expr)
            .unwrap_or_else(|e| panic!("failed to eval `{}`: {}", source, e));
        out.push(printer::to_string(&vm.heap, value));
        drop(scope);
    }
}

/// Evaluates every form and returns the last printed result.
fn eval_last(vm: &Vm, source: &str) -> String {
    eval_all(vm, source).pop().unwrap_or_else(|| panic!("no forms in `{}`", source))
}

/// Evaluates forms until one fails, returning that error.
fn eval_err(vm: &Vm, source: &str) -> Error {
    let mut src = ByteStream::from_str(source);
    loop {
        let expr = match reader::read(&vm.heap, &mut src) {
            Ok(Some(expr)) => expr,
            Ok(None) => panic!("expected an error from `{}`", source),
            Err(e) => return e,
        };
        let scope = vm.heap.scope_with(&[expr]);
        let result = vm.eval_in_global(expr);
        drop(scope);
        if let Err(e) = result {
            return e;
        }
    }
}

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path =
        std::env::temp_dir().join(format!("kat-{}-{}", std::process::id(), name));
    fs::write(&path, contents).unwrap();
    path
}

//===----------------------------------------------------------------------===//
// Arithmetic
//===----------------------------------------------------------------------===//

#[test]
fn arithmetic() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "(+ 1 2 3)"), "6");
    assert_eq!(eval_last(&vm, "(+)"), "0");
    assert_eq!(eval_last(&vm, "(*)"), "1");
    assert_eq!(eval_last(&vm, "(* 2 3 4)"), "24");
    assert_eq!(eval_last(&vm, "(- 5)"), "-5");
    assert_eq!(eval_last(&vm, "(- 10 1 2)"), "7");
    assert_eq!(eval_last(&vm, "(quotient 7 2)"), "3");
    assert_eq!(eval_last(&vm, "(remainder 7 2)"), "1");
    assert_eq!(eval_last(&vm, "(remainder -7 2)"), "-1");
}

#[test]
fn comparison_chains_are_strictly_monotonic() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "(< 1 2 3)"), "#t");
    assert_eq!(eval_last(&vm, "(< 1 2 2)"), "#f");
    assert_eq!(eval_last(&vm, "(> 3 2 1)"), "#t");
    assert_eq!(eval_last(&vm, "(= 4 4 4)"), "#t");
    assert_eq!(eval_last(&vm, "(= 4 5)"), "#f");
    assert_eq!(eval_last(&vm, "(= 1)"), "#t");
    assert!(matches!(eval_err(&vm, "(<)"), Error::Arity { .. }));
}

#[test]
fn arithmetic_failures() {
    let vm = Vm::new();
    assert!(matches!(eval_err(&vm, "(-)"), Error::Arity { .. }));
    assert!(matches!(eval_err(&vm, "(+ 1 'a)"), Error::Type { .. }));
    assert!(matches!(eval_err(&vm, "(quotient 1 0)"), Error::DivisionByZero));
    assert!(matches!(eval_err(&vm, "(remainder 1 0)"), Error::DivisionByZero));
    // Overflow fails rather than wrapping.
    assert!(matches!(
        eval_err(&vm, "(+ 9223372036854775807 1)"),
        Error::Overflow
    ));
    assert!(matches!(
        eval_err(&vm, "(* 9223372036854775807 2)"),
        Error::Overflow
    ));
}

//===----------------------------------------------------------------------===//
// Special forms
//===----------------------------------------------------------------------===//

#[test]
fn define_and_recursion() {
    let vm = Vm::new();
    let out = eval_all(
        &vm,
        "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (fact 10)",
    );
    assert_eq!(out, vec!["ok", "3628800"]);
}

#[test]
fn define_replaces_and_set_mutates() {
    let vm = Vm::new();
    assert_eq!(eval_all(&vm, "(define x 1) (define x 2) x"), vec!["ok", "ok", "2"]);
    assert_eq!(eval_all(&vm, "(set! x 9) x"), vec!["ok", "9"]);
    assert!(matches!(
        eval_err(&vm, "(set! never-defined 1)"),
        Error::UnboundVariable(name) if name == "never-defined"
    ));
}

#[test]
fn if_and_omitted_alternative() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "(if #t 1 2)"), "1");
    assert_eq!(eval_last(&vm, "(if #f 1 2)"), "2");
    assert_eq!(eval_last(&vm, "(if #f 1)"), "#f");
    // The test is identity with #t, not mere non-falseness.
    assert_eq!(eval_last(&vm, "(if 0 1 2)"), "2");
}

#[test]
fn cond_desugars_to_nested_ifs() {
    let vm = Vm::new();
    assert_eq!(
        eval_last(&vm, "(cond ((= 1 2) 'a) ((eq? 'x 'x) 'b) (else 'c))"),
        "b"
    );
    assert_eq!(eval_last(&vm, "(cond ((= 1 2) 'a))"), "#f");
    assert_eq!(eval_last(&vm, "(cond (else 1 2 3))"), "3");
    // An else clause is legal only in final position.
    assert!(matches!(
        eval_err(&vm, "(cond (else 'a) (#t 'b))"),
        Error::BadForm(_)
    ));
}

#[test]
fn let_binds_in_parallel() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "(let ((x 1) (y 2)) (+ x y))"), "3");
    assert_eq!(
        eval_last(&vm, "(define x 10) (let ((x 1) (y x)) y)"),
        "10"
    );
}

#[test]
fn and_or_short_circuit() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "(and)"), "#t");
    assert_eq!(eval_last(&vm, "(or)"), "#f");
    assert_eq!(eval_last(&vm, "(and 1 2)"), "2");
    assert_eq!(eval_last(&vm, "(and #f (error \"not reached\"))"), "#f");
    assert_eq!(eval_last(&vm, "(or #f 5)"), "5");
    assert_eq!(eval_last(&vm, "(or 7 (error \"not reached\"))"), "7");
}

#[test]
fn begin_sequences() {
    let vm = Vm::new();
    assert_eq!(
        eval_last(&vm, "(define x 0) (begin (set! x 5) (+ x 1))"),
        "6"
    );
}

#[test]
fn lambda_closures_capture_lexically() {
    let vm = Vm::new();
    let out = eval_all(
        &vm,
        "(define (make-adder n) (lambda (x) (+ x n)))
         (define add3 (make-adder 3))
         (add3 4)",
    );
    assert_eq!(out.last().unwrap(), "7");
}

#[test]
fn quote_returns_unevaluated() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "'x"), "x");
    assert_eq!(eval_last(&vm, "'(1 2 3)"), "(1 2 3)");
    assert_eq!(eval_last(&vm, "(quote (a . b))"), "(a . b)");
    // A dotted nil tail is a proper list.
    assert_eq!(eval_last(&vm, "'(a . ())"), "(a)");
}

//===----------------------------------------------------------------------===//
// Application
//===----------------------------------------------------------------------===//

#[test]
fn compound_arity_is_checked() {
    let vm = Vm::new();
    assert!(matches!(
        eval_err(&vm, "((lambda (x) x) 1 2)"),
        Error::Arity { expected: 1, got: 2 }
    ));
    assert!(matches!(
        eval_err(&vm, "((lambda (x y) x) 1)"),
        Error::Arity { expected: 2, got: 1 }
    ));
}

#[test]
fn dotted_parameter_tail_is_ignored() {
    // Only the proper prefix of the parameter list binds; the dangling tail
    // neither binds nor counts toward arity.
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "((lambda (x . ignored) x) 7)"), "7");
}

#[test]
fn applying_a_non_procedure_fails() {
    let vm = Vm::new();
    assert!(matches!(eval_err(&vm, "(1 2)"), Error::NotApplicable(_)));
    // The empty list reads fine but cannot be evaluated.
    assert!(matches!(eval_err(&vm, "()"), Error::CannotEvaluate(_)));
}

#[test]
fn eval_and_apply_are_intercepted() {
    let vm = Vm::new();
    assert_eq!(
        eval_last(&vm, "(eval '(+ 1 2) (interaction-environment))"),
        "3"
    );
    assert_eq!(eval_last(&vm, "(apply + '(1 2))"), "3");
    assert_eq!(eval_last(&vm, "(apply + 1 2 '(3 4))"), "10");
    assert_eq!(eval_last(&vm, "(apply car '((9 8)))"), "9");
    // eval through a variable still lands in the interception path.
    assert_eq!(
        eval_last(&vm, "(define my-eval eval) (my-eval '(* 2 3) (interaction-environment))"),
        "6"
    );
}

#[test]
fn environments_are_first_class() {
    let vm = Vm::new();
    // A null environment has no bindings at all.
    assert!(matches!(
        eval_err(&vm, "(eval 'car (null-environment))"),
        Error::UnboundVariable(_)
    ));
    // A fresh environment has the primitives but not user definitions.
    assert_eq!(eval_last(&vm, "(eval '(+ 1 1) (environment))"), "2");
    assert_eq!(eval_all(&vm, "(define zz 5)"), vec!["ok"]);
    assert!(matches!(
        eval_err(&vm, "(eval 'zz (environment))"),
        Error::UnboundVariable(_)
    ));
    assert_eq!(eval_last(&vm, "(eval 'zz (interaction-environment))"), "5");
}

//===----------------------------------------------------------------------===//
// Pairs, equality, conversions
//===----------------------------------------------------------------------===//

#[test]
fn pair_mutation() {
    let vm = Vm::new();
    let out = eval_all(&vm, "(define p (cons 1 2)) (set-car! p 9) (car p)");
    assert_eq!(out, vec!["ok", "ok", "9"]);
    assert_eq!(eval_last(&vm, "(set-cdr! p 7) (cdr p)"), "7");
    assert!(matches!(eval_err(&vm, "(car 5)"), Error::Type { .. }));
    assert!(matches!(eval_err(&vm, "(cdr '())"), Error::Type { .. }));
}

#[test]
fn list_and_predicates() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "(list 1 2 3)"), "(1 2 3)");
    assert_eq!(eval_last(&vm, "(list)"), "()");
    assert_eq!(eval_last(&vm, "(null? '())"), "#t");
    assert_eq!(eval_last(&vm, "(pair? '(1))"), "#t");
    assert_eq!(eval_last(&vm, "(pair? '())"), "#f");
    assert_eq!(eval_last(&vm, "(symbol? 'a)"), "#t");
    assert_eq!(eval_last(&vm, "(integer? 3)"), "#t");
    assert_eq!(eval_last(&vm, "(boolean? #f)"), "#t");
    assert_eq!(eval_last(&vm, "(string? \"s\")"), "#t");
    assert_eq!(eval_last(&vm, "(char? #\\a)"), "#t");
    assert_eq!(eval_last(&vm, "(procedure? car)"), "#t");
    assert_eq!(eval_last(&vm, "(procedure? (lambda (x) x))"), "#t");
    assert_eq!(eval_last(&vm, "(procedure? 'car)"), "#f");
}

#[test]
fn eq_is_identity_with_value_exceptions() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "(eq? 'a 'a)"), "#t");
    assert_eq!(eval_last(&vm, "(eq? \"str\" \"str\")"), "#t");
    assert_eq!(eval_last(&vm, "(eq? 42 42)"), "#t");
    assert_eq!(eval_last(&vm, "(eq? #\\a #\\a)"), "#t");
    assert_eq!(eval_last(&vm, "(eq? '() '())"), "#t");
    assert_eq!(eval_last(&vm, "(eq? (cons 1 2) (cons 1 2))"), "#f");
    assert_eq!(eval_last(&vm, "(eq? 'a 'b)"), "#f");
    assert_eq!(eval_last(&vm, "(eq? 1 #\\a)"), "#f");
}

#[test]
fn conversion_round_trips() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "(char->integer #\\a)"), "97");
    assert_eq!(eval_last(&vm, "(integer->char 97)"), "#\\a");
    assert_eq!(eval_last(&vm, "(char->integer (integer->char 200))"), "200");
    assert_eq!(eval_last(&vm, "(number->string -42)"), "\"-42\"");
    assert_eq!(eval_last(&vm, "(string->number \"-42\")"), "-42");
    assert_eq!(eval_last(&vm, "(string->number \"nope\")"), "#f");
    assert_eq!(eval_last(&vm, "(symbol->string 'abc)"), "\"abc\"");
    assert_eq!(eval_last(&vm, "(string->symbol \"abc\")"), "abc");
    // string->symbol of symbol->string is the identical symbol.
    assert_eq!(
        eval_last(&vm, "(eq? (string->symbol (symbol->string 'zig)) 'zig)"),
        "#t"
    );
}

//===----------------------------------------------------------------------===//
// Tail calls and GC
//===----------------------------------------------------------------------===//

#[test]
fn deep_tail_recursion_runs_in_constant_stack() {
    let vm = Vm::new();
    let out = eval_all(
        &vm,
        "(define (countdown n) (if (= n 0) 'done (countdown (- n 1))))
         (countdown 200000)",
    );
    assert_eq!(out.last().unwrap(), "done");
}

#[test]
fn gc_stress_conses_without_unbounded_growth() {
    let vm = Vm::new();
    let out = eval_all(
        &vm,
        "(define (churn n) (if (= n 0) 'done (begin (cons n n) (churn (- n 1)))))
         (churn 100000)",
    );
    assert_eq!(out.last().unwrap(), "done");
    // The collector must have run, and the discarded pairs must be gone.
    assert!(vm.heap.collections() > 0);
    vm.heap.collect();
    assert!(vm.heap.live() < 10_000);
}

#[test]
fn collection_preserves_reachable_results() {
    let vm = Vm::new();
    eval_all(&vm, "(define keep (list 1 (list 2 3) (cons 4 5)))");
    for _ in 0..3 {
        vm.heap.collect();
    }
    assert_eq!(eval_last(&vm, "keep"), "(1 (2 3) (4 . 5))");
}

//===----------------------------------------------------------------------===//
// Errors at the boundary
//===----------------------------------------------------------------------===//

#[test]
fn explicit_error_aborts() {
    let vm = Vm::new();
    assert!(matches!(
        eval_err(&vm, "(error \"boom\" 42)"),
        Error::User(msg) if msg == "\"boom\" 42"
    ));
}

#[test]
fn unbound_variable_reports_name() {
    let vm = Vm::new();
    assert!(matches!(
        eval_err(&vm, "nope"),
        Error::UnboundVariable(name) if name == "nope"
    ));
}

#[test]
fn failed_form_leaves_earlier_definitions_intact() {
    let vm = Vm::new();
    eval_all(&vm, "(define survivor 11)");
    let _ = eval_err(&vm, "(car 1)");
    assert_eq!(eval_last(&vm, "survivor"), "11");
}

#[test]
fn procedures_print_opaquely() {
    let vm = Vm::new();
    assert_eq!(eval_last(&vm, "car"), "#<primitive-procedure>");
    assert_eq!(eval_last(&vm, "(lambda (x) x)"), "#<compound-procedure>");
}

//===----------------------------------------------------------------------===//
// Files and ports
//===----------------------------------------------------------------------===//

#[test]
fn load_evaluates_a_file_and_returns_the_last_result() {
    let vm = Vm::new();
    let path = temp_file("load.scm", "(define loaded 33)\n(+ loaded 1)\n");
    let source = format!("(load \"{}\")", path.display());
    assert_eq!(eval_last(&vm, &source), "34");
    assert_eq!(eval_last(&vm, "loaded"), "33");
    let _ = fs::remove_file(path);
}

#[test]
fn input_ports_read_data_then_eof() {
    let vm = Vm::new();
    let path = temp_file("port.scm", "(1 2) x");
    let source = format!(
        "(define p (open-input-port \"{}\"))
         (read p)
         (read p)
         (eof-object? (read p))
         (close-input-port p)",
        path.display()
    );
    let out = eval_all(&vm, &source);
    assert_eq!(out, vec!["ok", "(1 2)", "x", "#t", "ok"]);
    let _ = fs::remove_file(path);
}

#[test]
fn read_char_and_peek_char_follow_the_stream() {
    let vm = Vm::new();
    let path = temp_file("chars.txt", "ab");
    let source = format!(
        "(define p (open-input-port \"{}\"))
         (peek-char p)
         (read-char p)
         (read-char p)
         (eof-object? (read-char p))",
        path.display()
    );
    let out = eval_all(&vm, &source);
    assert_eq!(out, vec!["ok", "#\\a", "#\\a", "#\\b", "#t"]);
    let _ = fs::remove_file(path);
}

#[test]
fn output_ports_round_trip_through_write() {
    let vm = Vm::new();
    let path = temp_file("out.scm", "");
    let source = format!(
        "(define out (open-output-port \"{}\"))
         (write '(1 \"two\" #\\c) out)
         (close-output-port out)",
        path.display()
    );
    assert_eq!(eval_all(&vm, &source), vec!["ok", "ok", "ok"]);

    let source = format!(
        "(define in (open-input-port \"{}\")) (read in)",
        path.display()
    );
    assert_eq!(eval_last(&vm, &source), "(1 \"two\" #\\c)");
    let _ = fs::remove_file(path);
}

#[test]
fn closed_ports_refuse_io() {
    let vm = Vm::new();
    let path = temp_file("closed.scm", "1 2 3");
    let source = format!(
        "(define p (open-input-port \"{}\")) (close-input-port p) (read p)",
        path.display()
    );
    assert!(matches!(eval_err(&vm, &source), Error::Io(_)));
    let _ = fs::remove_file(path);
}

#[test]
fn current_time_millis_is_a_fixnum() {
    let vm = Vm::new();
    let out = eval_last(&vm, "(integer? (current-time-millis))");
    assert_eq!(out, "#t");
}
