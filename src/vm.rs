use std::cell::RefCell;
use std::path::Path;

use crate::env;
use crate::error::Error;
use crate::heap::{Heap, Value};
use crate::ports::ByteStream;
use crate::primitives;
use crate::reader;

//===----------------------------------------------------------------------===//
// Syms
//===----------------------------------------------------------------------===//

/// The special-form keywords and the `ok` result symbol, interned once at VM
/// construction. The evaluator recognizes forms by handle identity against
/// these, never by name comparison.
pub struct Syms {
    pub quote: Value,
    pub define: Value,
    pub set: Value,
    pub ok: Value,
    pub if_: Value,
    pub lambda: Value,
    pub begin: Value,
    pub cond: Value,
    pub else_: Value,
    pub let_: Value,
    pub and: Value,
    pub or: Value,
}

impl Syms {
    fn new(heap: &Heap) -> Self {
        Syms {
            quote: heap.intern_symbol("quote"),
            define: heap.intern_symbol("define"),
            set: heap.intern_symbol("set!"),
            ok: heap.intern_symbol("ok"),
            if_: heap.intern_symbol("if"),
            lambda: heap.intern_symbol("lambda"),
            begin: heap.intern_symbol("begin"),
            cond: heap.intern_symbol("cond"),
            else_: heap.intern_symbol("else"),
            let_: heap.intern_symbol("let"),
            and: heap.intern_symbol("and"),
            or: heap.intern_symbol("or"),
        }
    }
}

//===----------------------------------------------------------------------===//
// Vm
//===----------------------------------------------------------------------===//

/// One interpreter instance: the heap, the pre-resolved special-form
/// symbols, and the global environment. Single-threaded; a `Vm` is never
/// shared or re-entered.
pub struct Vm {
    pub heap: Heap,
    pub syms: Syms,
    global_env: Value,
    eval_prim: Value,
    apply_prim: Value,
    stdin: RefCell<Option<ByteStream>>,
}

impl Vm {
    pub fn new() -> Self {
        let heap = Heap::new();
        let syms = Syms::new(&heap);

        let global_env = primitives::make_environment(&heap);
        heap.make_permanent(global_env);

        // `eval` and `apply` are registered like any other primitive but are
        // intercepted by the evaluator; keep their handles for the identity
        // check in application dispatch.
        let eval_prim = env::lookup(&heap, heap.intern_symbol("eval"), global_env)
            .expect("eval is registered at startup");
        let apply_prim = env::lookup(&heap, heap.intern_symbol("apply"), global_env)
            .expect("apply is registered at startup");

        Vm {
            heap,
            syms,
            global_env,
            eval_prim,
            apply_prim,
            stdin: RefCell::new(None),
        }
    }

    pub fn global_env(&self) -> Value {
        self.global_env
    }

    pub fn eval_prim(&self) -> Value {
        self.eval_prim
    }

    pub fn apply_prim(&self) -> Value {
        self.apply_prim
    }

    /// Evaluates one expression in the global environment.
    pub fn eval_in_global(&self, expr: Value) -> Result<Value, Error> {
        self.eval(expr, self.global_env)
    }

    /// Reads successive forms from a file and evaluates each in the global
    /// environment. Returns the last result; an empty file yields `ok`.
    /// The first failing form aborts the load.
    pub fn load_path(&self, path: &Path) -> Result<Value, Error> {
        let mut src = ByteStream::open(path)?;
        let scope = self.heap.scope();
        let mut result = self.syms.ok;
        while let Some(expr) = reader::read(&self.heap, &mut src)? {
            scope.reset();
            scope.keep(expr);
            result = scope.keep(self.eval(expr, self.global_env)?);
        }
        Ok(result)
    }

    /// Runs `f` against the shared standard-input stream, creating it on
    /// first use. Serves the port primitives' stdin fallback.
    pub fn with_stdin<R>(&self, f: impl FnOnce(&mut ByteStream) -> R) -> R {
        let mut guard = self.stdin.borrow_mut();
        let stream = guard.get_or_insert_with(ByteStream::stdin);
        f(stream)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer;

    #[test]
    fn global_env_has_primitives() {
        let vm = Vm::new();
        let plus = env::lookup(&vm.heap, vm.heap.intern_symbol("+"), vm.global_env());
        assert!(plus.is_ok());
    }

    #[test]
    fn eval_in_global_runs_a_form() {
        let vm = Vm::new();
        let mut src = ByteStream::from_str("(+ 1 2 3)");
        let expr = reader::read(&vm.heap, &mut src).unwrap().unwrap();
        let scope = vm.heap.scope_with(&[expr]);
        let result = vm.eval_in_global(expr).unwrap();
        assert_eq!(printer::to_string(&vm.heap, result), "6");
        drop(scope);
    }
}
