use crate::error::Error;
use crate::heap::{Heap, Tag, Value};

//===----------------------------------------------------------------------===//
// Environments
//===----------------------------------------------------------------------===//
//
// An environment is a list of frames, innermost first; the empty environment
// is `()`. A frame is a single cell holding the list of bound symbols in its
// head and the parallel list of values in its tail. New bindings are
// prepended, so lookup sees the most recent binding first.

/// Prepends a frame binding `vars` (a symbol list) to `vals` onto `base`.
pub fn extend(heap: &Heap, vars: Value, vals: Value, base: Value) -> Value {
    let frame = heap.cons(vars, vals);
    heap.cons(frame, base)
}

/// Innermost-first search by symbol identity.
pub fn lookup(heap: &Heap, sym: Value, env: Value) -> Result<Value, Error> {
    let mut env = env;
    while heap.tag(env) == Tag::Cell {
        let frame = heap.car(env).unwrap_or(env);
        let mut vars = heap.car(frame).unwrap_or_else(|| heap.nil());
        let mut vals = heap.cdr(frame).unwrap_or_else(|| heap.nil());
        while heap.tag(vars) == Tag::Cell && heap.tag(vals) == Tag::Cell {
            if heap.car(vars) == Some(sym) {
                return Ok(heap.car(vals).unwrap_or_else(|| heap.nil()));
            }
            vars = heap.cdr(vars).unwrap_or_else(|| heap.nil());
            vals = heap.cdr(vals).unwrap_or_else(|| heap.nil());
        }
        env = heap.cdr(env).unwrap_or_else(|| heap.nil());
    }
    Err(unbound(heap, sym))
}

/// Binds `var` in the innermost frame: replaces an existing binding's value
/// slot, otherwise prepends a fresh binding.
pub fn define(heap: &Heap, var: Value, val: Value, env: Value) -> Result<(), Error> {
    let frame = match heap.car(env) {
        Some(frame) => frame,
        None => {
            return Err(Error::BadForm(
                "define in the empty environment".to_string(),
            ))
        }
    };
    let mut vars = heap.car(frame).unwrap_or_else(|| heap.nil());
    let mut vals = heap.cdr(frame).unwrap_or_else(|| heap.nil());
    while heap.tag(vars) == Tag::Cell && heap.tag(vals) == Tag::Cell {
        if heap.car(vars) == Some(var) {
            heap.set_car(vals, val);
            return Ok(());
        }
        vars = heap.cdr(vars).unwrap_or_else(|| heap.nil());
        vals = heap.cdr(vals).unwrap_or_else(|| heap.nil());
    }

    // Prepend. `val` must stay rooted across the first cons, which can
    // trigger a collection before the second one captures it.
    let scope = heap.scope_with(&[val]);
    let old_vars = heap.car(frame).unwrap_or_else(|| heap.nil());
    let old_vals = heap.cdr(frame).unwrap_or_else(|| heap.nil());
    heap.set_car(frame, heap.cons(var, old_vars));
    heap.set_cdr(frame, heap.cons(val, old_vals));
    drop(scope);
    Ok(())
}

/// Mutates the nearest existing binding of `var`; unbound-variable error if
/// no frame binds it.
pub fn set(heap: &Heap, var: Value, val: Value, env: Value) -> Result<(), Error> {
    let mut env = env;
    while heap.tag(env) == Tag::Cell {
        let frame = heap.car(env).unwrap_or(env);
        let mut vars = heap.car(frame).unwrap_or_else(|| heap.nil());
        let mut vals = heap.cdr(frame).unwrap_or_else(|| heap.nil());
        while heap.tag(vars) == Tag::Cell && heap.tag(vals) == Tag::Cell {
            if heap.car(vars) == Some(var) {
                heap.set_car(vals, val);
                return Ok(());
            }
            vars = heap.cdr(vars).unwrap_or_else(|| heap.nil());
            vals = heap.cdr(vals).unwrap_or_else(|| heap.nil());
        }
        env = heap.cdr(env).unwrap_or_else(|| heap.nil());
    }
    Err(unbound(heap, var))
}

fn unbound(heap: &Heap, sym: Value) -> Error {
    let name = heap
        .text(sym)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "?".to_string());
    Error::UnboundVariable(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_env(heap: &Heap) -> Value {
        extend(heap, heap.nil(), heap.nil(), heap.nil())
    }

    #[test]
    fn define_then_lookup() {
        let heap = Heap::new();
        let scope = heap.scope();
        let env = scope.keep(new_env(&heap));
        let x = heap.intern_symbol("x");

        define(&heap, x, heap.fixnum(10), env).unwrap();
        assert_eq!(heap.as_fixnum(lookup(&heap, x, env).unwrap()), Some(10));

        // Redefinition replaces the value in place.
        define(&heap, x, heap.fixnum(20), env).unwrap();
        assert_eq!(heap.as_fixnum(lookup(&heap, x, env).unwrap()), Some(20));
    }

    #[test]
    fn lookup_is_innermost_first() {
        let heap = Heap::new();
        let scope = heap.scope();
        let x = heap.intern_symbol("x");

        let outer = scope.keep(new_env(&heap));
        define(&heap, x, heap.fixnum(1), outer).unwrap();

        let vars = scope.keep(heap.list(&[x]));
        let vals = scope.keep(heap.list(&[heap.fixnum(2)]));
        let inner = scope.keep(extend(&heap, vars, vals, outer));

        assert_eq!(heap.as_fixnum(lookup(&heap, x, inner).unwrap()), Some(2));
        assert_eq!(heap.as_fixnum(lookup(&heap, x, outer).unwrap()), Some(1));
    }

    #[test]
    fn set_walks_to_enclosing_frame() {
        let heap = Heap::new();
        let scope = heap.scope();
        let x = heap.intern_symbol("x");

        let outer = scope.keep(new_env(&heap));
        define(&heap, x, heap.fixnum(1), outer).unwrap();
        let inner = scope.keep(extend(&heap, heap.nil(), heap.nil(), outer));

        set(&heap, x, heap.fixnum(9), inner).unwrap();
        assert_eq!(heap.as_fixnum(lookup(&heap, x, outer).unwrap()), Some(9));
    }

    #[test]
    fn unbound_variable_errors() {
        let heap = Heap::new();
        let scope = heap.scope();
        let env = scope.keep(new_env(&heap));
        let ghost = heap.intern_symbol("ghost");

        assert!(matches!(
            lookup(&heap, ghost, env),
            Err(Error::UnboundVariable(name)) if name == "ghost"
        ));
        assert!(matches!(
            set(&heap, ghost, heap.nil(), env),
            Err(Error::UnboundVariable(_))
        ));
    }
}
