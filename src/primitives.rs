use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use itertools::Itertools;

use crate::env;
use crate::error::Error;
use crate::heap::{Heap, PrimFn, Tag, Value};
use crate::ports::{self, ByteStream};
use crate::printer;
use crate::reader;
use crate::vm::Vm;

//===----------------------------------------------------------------------===//
// Registry
//===----------------------------------------------------------------------===//

/// The built-in library, registered into every fresh environment created by
/// [`make_environment`]. `eval` and `apply` are listed here like everything
/// else but are intercepted by the evaluator; their bodies never run.
pub const PRIMITIVES: &[(&str, PrimFn)] = &[
    // Type predicates
    ("null?", is_null),
    ("boolean?", is_boolean),
    ("symbol?", is_symbol),
    ("integer?", is_integer),
    ("char?", is_char),
    ("string?", is_string),
    ("pair?", is_pair),
    ("procedure?", is_procedure),
    ("eof-object?", is_eof_object),
    ("input-port?", is_input_port),
    ("output-port?", is_output_port),
    // Conversions
    ("char->integer", char_to_integer),
    ("integer->char", integer_to_char),
    ("number->string", number_to_string),
    ("string->number", string_to_number),
    ("symbol->string", symbol_to_string),
    ("string->symbol", string_to_symbol),
    // Arithmetic
    ("+", add),
    ("-", sub),
    ("*", mul),
    ("quotient", quotient),
    ("remainder", remainder),
    ("=", num_eq),
    ("<", num_less),
    (">", num_greater),
    // Pairs and lists
    ("cons", cons),
    ("car", car),
    ("cdr", cdr),
    ("set-car!", set_car),
    ("set-cdr!", set_cdr),
    ("list", list),
    // Equality
    ("eq?", is_eq),
    // Control (intercepted)
    ("apply", apply_proc),
    ("eval", eval_proc),
    // Environments
    ("interaction-environment", interaction_environment),
    ("null-environment", null_environment),
    ("environment", environment),
    // I/O
    ("load", load),
    ("open-input-port", open_input_port),
    ("close-input-port", close_input_port),
    ("open-output-port", open_output_port),
    ("close-output-port", close_output_port),
    ("read", read),
    ("read-char", read_char),
    ("peek-char", peek_char),
    ("write", write),
    ("write-char", write_char),
    // Misc
    ("error", error_proc),
    ("current-time-millis", current_time_millis),
];

/// Builds a fresh environment of one frame holding every primitive. Used for
/// the global environment at startup and by the `environment` primitive.
pub fn make_environment(heap: &Heap) -> Value {
    let scope = heap.scope();
    let env = scope.keep(env::extend(heap, heap.nil(), heap.nil(), heap.nil()));
    for &(name, f) in PRIMITIVES {
        let sym = heap.intern_symbol(name);
        let proc = heap.prim_proc(f);
        env::define(heap, sym, proc, env).expect("fresh environment has a frame");
    }
    env
}

//===----------------------------------------------------------------------===//
// Argument helpers
//===----------------------------------------------------------------------===//

fn args_vec(vm: &Vm, args: Value) -> Vec<Value> {
    let heap = &vm.heap;
    let mut out = Vec::new();
    let mut cur = args;
    while heap.tag(cur) == Tag::Cell {
        out.push(heap.car(cur).unwrap());
        cur = heap.cdr(cur).unwrap();
    }
    out
}

fn expect_args(vm: &Vm, args: Value, n: usize) -> Result<Vec<Value>, Error> {
    let argv = args_vec(vm, args);
    if argv.len() != n {
        return Err(Error::Arity { expected: n, got: argv.len() });
    }
    Ok(argv)
}

fn type_error(vm: &Vm, expected: &'static str, v: Value) -> Error {
    Error::Type { expected, actual: vm.heap.type_name(v).to_string() }
}

fn fixnum_arg(vm: &Vm, v: Value) -> Result<i64, Error> {
    vm.heap.as_fixnum(v).ok_or_else(|| type_error(vm, "fixnum", v))
}

fn string_arg(vm: &Vm, v: Value) -> Result<std::rc::Rc<str>, Error> {
    if vm.heap.tag(v) != Tag::Str {
        return Err(type_error(vm, "string", v));
    }
    Ok(vm.heap.text(v).unwrap())
}

fn predicate(vm: &Vm, args: Value, pred: fn(Tag) -> bool) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    Ok(vm.heap.bool_value(pred(vm.heap.tag(argv[0]))))
}

//===----------------------------------------------------------------------===//
// Type predicates
//===----------------------------------------------------------------------===//

pub fn is_null(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::Nil)
}

pub fn is_boolean(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::Bool)
}

pub fn is_symbol(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::Symbol)
}

pub fn is_integer(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::Fixnum)
}

pub fn is_char(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::Char)
}

pub fn is_string(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::Str)
}

pub fn is_pair(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::Cell)
}

pub fn is_procedure(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| matches!(t, Tag::PrimProc | Tag::CompProc))
}

pub fn is_eof_object(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::Eof)
}

pub fn is_input_port(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::InputPort)
}

pub fn is_output_port(vm: &Vm, args: Value) -> Result<Value, Error> {
    predicate(vm, args, |t| t == Tag::OutputPort)
}

//===----------------------------------------------------------------------===//
// Conversions
//===----------------------------------------------------------------------===//

pub fn char_to_integer(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    let c = vm.heap.as_char(argv[0]).ok_or_else(|| type_error(vm, "character", argv[0]))?;
    Ok(vm.heap.fixnum(c as i64))
}

pub fn integer_to_char(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    let n = fixnum_arg(vm, argv[0])?;
    if !(0..=255).contains(&n) {
        return Err(Error::User(format!("integer->char: {} is not a byte value", n)));
    }
    Ok(vm.heap.char_value(n as u8))
}

pub fn number_to_string(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    let n = fixnum_arg(vm, argv[0])?;
    Ok(vm.heap.intern_string(&n.to_string()))
}

/// `(string->number s)` — the fixnum the text denotes, or `#f` when it does
/// not parse as one.
pub fn string_to_number(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    let text = string_arg(vm, argv[0])?;
    match text.parse::<i64>() {
        Ok(n) => Ok(vm.heap.fixnum(n)),
        Err(_) => Ok(vm.heap.bool_value(false)),
    }
}

pub fn symbol_to_string(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    if vm.heap.tag(argv[0]) != Tag::Symbol {
        return Err(type_error(vm, "symbol", argv[0]));
    }
    let name = vm.heap.text(argv[0]).unwrap();
    Ok(vm.heap.intern_string(&name))
}

pub fn string_to_symbol(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    let text = string_arg(vm, argv[0])?;
    Ok(vm.heap.intern_symbol(&text))
}

//===----------------------------------------------------------------------===//
// Arithmetic
//===----------------------------------------------------------------------===//
//
// Overflow policy: checked arithmetic, failing with a fixnum-overflow error.

/// `(+ n...)` — sum; the empty sum is 0.
pub fn add(vm: &Vm, args: Value) -> Result<Value, Error> {
    let mut acc: i64 = 0;
    for v in args_vec(vm, args) {
        acc = acc.checked_add(fixnum_arg(vm, v)?).ok_or(Error::Overflow)?;
    }
    Ok(vm.heap.fixnum(acc))
}

/// `(- n)` negates; `(- a b...)` subtracts left to right. At least one
/// argument.
pub fn sub(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = args_vec(vm, args);
    if argv.is_empty() {
        return Err(Error::Arity { expected: 1, got: 0 });
    }
    let first = fixnum_arg(vm, argv[0])?;
    if argv.len() == 1 {
        return Ok(vm.heap.fixnum(first.checked_neg().ok_or(Error::Overflow)?));
    }
    let mut acc = first;
    for &v in &argv[1..] {
        acc = acc.checked_sub(fixnum_arg(vm, v)?).ok_or(Error::Overflow)?;
    }
    Ok(vm.heap.fixnum(acc))
}

/// `(* n...)` — product; the empty product is 1.
pub fn mul(vm: &Vm, args: Value) -> Result<Value, Error> {
    let mut acc: i64 = 1;
    for v in args_vec(vm, args) {
        acc = acc.checked_mul(fixnum_arg(vm, v)?).ok_or(Error::Overflow)?;
    }
    Ok(vm.heap.fixnum(acc))
}

pub fn quotient(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 2)?;
    let a = fixnum_arg(vm, argv[0])?;
    let b = fixnum_arg(vm, argv[1])?;
    if b == 0 {
        return Err(Error::DivisionByZero);
    }
    Ok(vm.heap.fixnum(a.checked_div(b).ok_or(Error::Overflow)?))
}

pub fn remainder(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 2)?;
    let a = fixnum_arg(vm, argv[0])?;
    let b = fixnum_arg(vm, argv[1])?;
    if b == 0 {
        return Err(Error::DivisionByZero);
    }
    Ok(vm.heap.fixnum(a.checked_rem(b).ok_or(Error::Overflow)?))
}

/// Strictly monotonic chain comparison shared by `=`, `<`, and `>`.
fn compare_chain(
    vm: &Vm,
    args: Value,
    holds: fn(i64, i64) -> bool,
) -> Result<Value, Error> {
    let argv = args_vec(vm, args);
    if argv.is_empty() {
        return Err(Error::Arity { expected: 1, got: 0 });
    }
    let mut nums = Vec::with_capacity(argv.len());
    for v in argv {
        nums.push(fixnum_arg(vm, v)?);
    }
    let ok = nums.iter().tuple_windows().all(|(a, b)| holds(*a, *b));
    Ok(vm.heap.bool_value(ok))
}

pub fn num_eq(vm: &Vm, args: Value) -> Result<Value, Error> {
    compare_chain(vm, args, |a, b| a == b)
}

pub fn num_less(vm: &Vm, args: Value) -> Result<Value, Error> {
    compare_chain(vm, args, |a, b| a < b)
}

pub fn num_greater(vm: &Vm, args: Value) -> Result<Value, Error> {
    compare_chain(vm, args, |a, b| a > b)
}

//===----------------------------------------------------------------------===//
// Pairs and lists
//===----------------------------------------------------------------------===//

pub fn cons(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 2)?;
    Ok(vm.heap.cons(argv[0], argv[1]))
}

pub fn car(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    vm.heap.car(argv[0]).ok_or_else(|| type_error(vm, "pair", argv[0]))
}

pub fn cdr(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    vm.heap.cdr(argv[0]).ok_or_else(|| type_error(vm, "pair", argv[0]))
}

pub fn set_car(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 2)?;
    vm.heap
        .set_car(argv[0], argv[1])
        .ok_or_else(|| type_error(vm, "pair", argv[0]))?;
    Ok(vm.syms.ok)
}

pub fn set_cdr(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 2)?;
    vm.heap
        .set_cdr(argv[0], argv[1])
        .ok_or_else(|| type_error(vm, "pair", argv[0]))?;
    Ok(vm.syms.ok)
}

/// `(list a...)` — the evaluated argument list is already exactly the result.
pub fn list(_vm: &Vm, args: Value) -> Result<Value, Error> {
    Ok(args)
}

//===----------------------------------------------------------------------===//
// Equality
//===----------------------------------------------------------------------===//

/// `eq?` — by value for fixnums and characters, by identity for everything
/// else. Interned strings and symbols make textual equality coincide with
/// identity.
pub fn is_eq(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 2)?;
    let heap = &vm.heap;
    let (a, b) = (argv[0], argv[1]);
    let same = match (heap.tag(a), heap.tag(b)) {
        (Tag::Fixnum, Tag::Fixnum) => heap.as_fixnum(a) == heap.as_fixnum(b),
        (Tag::Char, Tag::Char) => heap.as_char(a) == heap.as_char(b),
        _ => a == b,
    };
    Ok(heap.bool_value(same))
}

//===----------------------------------------------------------------------===//
// Control
//===----------------------------------------------------------------------===//

/// Placeholder body: `apply` is intercepted in application dispatch so the
/// target runs in tail position.
pub fn apply_proc(_vm: &Vm, _args: Value) -> Result<Value, Error> {
    unreachable!("apply is intercepted by the evaluator")
}

/// Placeholder body: `eval` is intercepted in application dispatch.
pub fn eval_proc(_vm: &Vm, _args: Value) -> Result<Value, Error> {
    unreachable!("eval is intercepted by the evaluator")
}

//===----------------------------------------------------------------------===//
// Environments
//===----------------------------------------------------------------------===//

pub fn interaction_environment(vm: &Vm, args: Value) -> Result<Value, Error> {
    expect_args(vm, args, 0)?;
    Ok(vm.global_env())
}

/// An environment with one empty frame and no bindings.
pub fn null_environment(vm: &Vm, args: Value) -> Result<Value, Error> {
    expect_args(vm, args, 0)?;
    Ok(env::extend(&vm.heap, vm.heap.nil(), vm.heap.nil(), vm.heap.nil()))
}

/// A fresh environment prepopulated with the primitives.
pub fn environment(vm: &Vm, args: Value) -> Result<Value, Error> {
    expect_args(vm, args, 0)?;
    Ok(make_environment(&vm.heap))
}

//===----------------------------------------------------------------------===//
// I/O
//===----------------------------------------------------------------------===//

pub fn load(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    let path = string_arg(vm, argv[0])?;
    vm.load_path(Path::new(&*path))
}

pub fn open_input_port(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    let path = string_arg(vm, argv[0])?;
    let stream = ByteStream::open(Path::new(&*path))?;
    Ok(vm.heap.input_port(stream))
}

pub fn close_input_port(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    vm.heap
        .close_input(argv[0])
        .ok_or_else(|| type_error(vm, "input port", argv[0]))?;
    Ok(vm.syms.ok)
}

pub fn open_output_port(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    let path = string_arg(vm, argv[0])?;
    let sink = ports::open_output(Path::new(&*path))?;
    Ok(vm.heap.output_port(sink))
}

pub fn close_output_port(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = expect_args(vm, args, 1)?;
    vm.heap
        .close_output(argv[0])
        .ok_or_else(|| type_error(vm, "output port", argv[0]))?;
    Ok(vm.syms.ok)
}

/// Runs `f` on the port named by the first argument, or on standard input
/// when there is none. The port's stream is moved out for the duration so
/// the heap stays borrowable while reading.
fn with_input<R>(
    vm: &Vm,
    argv: &[Value],
    f: impl FnOnce(&Vm, &mut ByteStream) -> Result<R, Error>,
) -> Result<R, Error> {
    match argv.first() {
        None => vm.with_stdin(|stream| f(vm, stream)),
        Some(&port) => {
            let mut stream = vm
                .heap
                .take_input(port)
                .ok_or_else(|| type_error(vm, "input port", port))?
                .ok_or_else(|| Error::Io("input port is closed".to_string()))?;
            let result = f(vm, &mut stream);
            vm.heap.restore_input(port, stream);
            result
        }
    }
}

fn with_output(
    vm: &Vm,
    port: Option<Value>,
    f: impl FnOnce(&mut dyn Write) -> io::Result<()>,
) -> Result<Value, Error> {
    match port {
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            f(&mut out)?;
            out.flush()?;
            Ok(vm.syms.ok)
        }
        Some(port) => {
            let mut sink = vm
                .heap
                .take_output(port)
                .ok_or_else(|| type_error(vm, "output port", port))?
                .ok_or_else(|| Error::Io("output port is closed".to_string()))?;
            let result = f(&mut *sink);
            vm.heap.restore_output(port, sink);
            result?;
            Ok(vm.syms.ok)
        }
    }
}

/// `(read [port])` — the next datum from the port (standard input when
/// absent), or the EOF object at end of input.
pub fn read(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = args_vec(vm, args);
    if argv.len() > 1 {
        return Err(Error::Arity { expected: 1, got: argv.len() });
    }
    let datum = with_input(vm, &argv, |vm, stream| reader::read(&vm.heap, stream))?;
    Ok(datum.unwrap_or_else(|| vm.heap.eof()))
}

/// `(read-char [port])` — the next character, or the EOF object when the
/// stream is exhausted.
pub fn read_char(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = args_vec(vm, args);
    if argv.len() > 1 {
        return Err(Error::Arity { expected: 1, got: argv.len() });
    }
    let byte = with_input(vm, &argv, |_, stream| Ok(stream.next()?))?;
    Ok(match byte {
        Some(b) => vm.heap.char_value(b),
        None => vm.heap.eof(),
    })
}

/// `(peek-char [port])` — like `read-char` without consuming.
pub fn peek_char(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = args_vec(vm, args);
    if argv.len() > 1 {
        return Err(Error::Arity { expected: 1, got: argv.len() });
    }
    let byte = with_input(vm, &argv, |_, stream| Ok(stream.peek()?))?;
    Ok(match byte {
        Some(b) => vm.heap.char_value(b),
        None => vm.heap.eof(),
    })
}

/// `(write obj [port])` — the external representation, to standard output
/// when no port is given.
pub fn write(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = args_vec(vm, args);
    if argv.is_empty() || argv.len() > 2 {
        return Err(Error::Arity { expected: 1, got: argv.len() });
    }
    let obj = argv[0];
    with_output(vm, argv.get(1).copied(), |out| {
        printer::write_value(&vm.heap, obj, out)
    })
}

/// `(write-char ch [port])` — the character itself, not its external form.
pub fn write_char(vm: &Vm, args: Value) -> Result<Value, Error> {
    let argv = args_vec(vm, args);
    if argv.is_empty() || argv.len() > 2 {
        return Err(Error::Arity { expected: 1, got: argv.len() });
    }
    let c = vm.heap.as_char(argv[0]).ok_or_else(|| type_error(vm, "character", argv[0]))?;
    with_output(vm, argv.get(1).copied(), |out| out.write_all(&[c]))
}

//===----------------------------------------------------------------------===//
// Misc
//===----------------------------------------------------------------------===//

/// `(error msg...)` — renders the arguments and aborts the current iteration.
pub fn error_proc(vm: &Vm, args: Value) -> Result<Value, Error> {
    let parts: Vec<String> = args_vec(vm, args)
        .into_iter()
        .map(|v| printer::to_string(&vm.heap, v))
        .collect();
    Err(Error::User(parts.join(" ")))
}

pub fn current_time_millis(vm: &Vm, args: Value) -> Result<Value, Error> {
    expect_args(vm, args, 0)?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(vm.heap.fixnum(millis))
}
