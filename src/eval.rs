use crate::env;
use crate::error::Error;
use crate::heap::{Scope, Tag, Value};
use crate::printer;
use crate::vm::Vm;

//===----------------------------------------------------------------------===//
// Evaluator
//===----------------------------------------------------------------------===//
//
// A single trampoline loop. Tail positions (if branches, the last expression
// of begin/and/or, desugared cond and let, compound procedure bodies, and
// the intercepted eval/apply primitives) update the current expression and
// environment and re-enter the loop instead of recursing, so iterative
// programs run in constant native stack. Non-tail positions (argument
// evaluation, non-final begin expressions) recurse ordinarily.
//
// Rooting discipline: every loop iteration starts by resetting the local
// root scope and re-rooting the current expression and environment; every
// intermediate that must survive a sub-evaluation or allocation is pushed
// into the same scope.

impl Vm {
    pub fn eval(&self, expr: Value, env: Value) -> Result<Value, Error> {
        let heap = &self.heap;
        let scope = heap.scope();
        let mut expr = expr;
        let mut env = env;

        loop {
            scope.reset();
            scope.keep(expr);
            scope.keep(env);

            match heap.tag(expr) {
                // Self-evaluating.
                Tag::Bool | Tag::Fixnum | Tag::Char | Tag::Str => return Ok(expr),
                Tag::Symbol => return env::lookup(heap, expr, env),
                Tag::Cell => {}
                _ => {
                    return Err(Error::CannotEvaluate(printer::to_string(heap, expr)))
                }
            }

            let head = heap.car(expr).unwrap();
            let rest = heap.cdr(expr).unwrap();

            if heap.tag(head) == Tag::Symbol {
                let syms = &self.syms;

                if head == syms.quote {
                    return self.one_form(expr, rest);
                }
                if head == syms.set {
                    return self.eval_assignment(rest, env, &scope);
                }
                if head == syms.define {
                    return self.eval_definition(rest, env, &scope);
                }
                if head == syms.if_ {
                    expr = self.pick_if_branch(rest, env)?;
                    continue;
                }
                if head == syms.cond {
                    expr = self.expand_cond(rest, &scope)?;
                    continue;
                }
                if head == syms.let_ {
                    expr = self.expand_let(expr, rest, &scope)?;
                    continue;
                }
                if head == syms.and {
                    match self.eval_tests(rest, env, true)? {
                        Tests::Done(v) => return Ok(v),
                        Tests::Tail(last) => {
                            expr = last;
                            continue;
                        }
                    }
                }
                if head == syms.or {
                    match self.eval_tests(rest, env, false)? {
                        Tests::Done(v) => return Ok(v),
                        Tests::Tail(last) => {
                            expr = last;
                            continue;
                        }
                    }
                }
                if head == syms.lambda {
                    return self.make_lambda(expr, rest, env);
                }
                if head == syms.begin {
                    expr = self.eval_sequence(expr, rest, env)?;
                    continue;
                }
            }

            // Application: evaluate the operator, then the operands left to
            // right into a fresh (rooted) list, then dispatch on the
            // procedure kind.
            let mut f = scope.keep(self.eval(head, env)?);
            let mut args = scope.keep(self.eval_args(rest, env, &scope)?);

            loop {
                match heap.tag(f) {
                    Tag::PrimProc => {
                        if f == self.eval_prim() {
                            // (eval expr env): both become the next tail
                            // position.
                            let (e, en) = self.eval_arguments(args)?;
                            expr = e;
                            env = en;
                            break;
                        }
                        if f == self.apply_prim() {
                            // (apply f a... rest-list): splice and
                            // re-dispatch on the target procedure.
                            let (target, spliced) = self.splice_apply(args, &scope)?;
                            f = target;
                            args = spliced;
                            continue;
                        }
                        let func = heap.prim_fn(f).unwrap();
                        return func(self, args);
                    }
                    Tag::CompProc => {
                        let (params, body, proc_env) = heap.comp_parts(f).unwrap();
                        let expected = list_len(self, params);
                        let got = list_len(self, args);
                        if expected != got {
                            return Err(Error::Arity { expected, got });
                        }
                        env = scope.keep(env::extend(heap, params, args, proc_env));
                        expr = heap.cons(self.syms.begin, body);
                        break;
                    }
                    _ => {
                        return Err(Error::NotApplicable(printer::to_string(heap, f)))
                    }
                }
            }
        }
    }

    //===------------------------------------------------------------------===//
    // Special forms
    //===------------------------------------------------------------------===//

    /// `(quote x)`: exactly one sub-form, returned unevaluated.
    fn one_form(&self, whole: Value, rest: Value) -> Result<Value, Error> {
        let heap = &self.heap;
        match (heap.car(rest), heap.cdr(rest)) {
            (Some(x), Some(tail)) if heap.tag(tail) == Tag::Nil => Ok(x),
            _ => Err(self.bad_form(whole)),
        }
    }

    /// `(set! v e)`: mutates an existing binding; `ok` on success.
    fn eval_assignment(
        &self,
        rest: Value,
        env: Value,
        scope: &Scope,
    ) -> Result<Value, Error> {
        let heap = &self.heap;
        let var = self.nth_form(rest, 0)?;
        let value_expr = self.nth_form(rest, 1)?;
        if heap.tag(var) != Tag::Symbol {
            return Err(self.bad_form(rest));
        }
        let val = scope.keep(self.eval(value_expr, env)?);
        env::set(heap, var, val, env)?;
        Ok(self.syms.ok)
    }

    /// `(define v e)` or the procedure shorthand `(define (f p...) body...)`.
    fn eval_definition(
        &self,
        rest: Value,
        env: Value,
        scope: &Scope,
    ) -> Result<Value, Error> {
        let heap = &self.heap;
        let target = self.nth_form(rest, 0)?;
        match heap.tag(target) {
            Tag::Symbol => {
                let value_expr = self.nth_form(rest, 1)?;
                let val = scope.keep(self.eval(value_expr, env)?);
                env::define(heap, target, val, env)?;
                Ok(self.syms.ok)
            }
            Tag::Cell => {
                // (define (f p...) body...) is (define f (lambda (p...) body...)).
                let name = heap.car(target).unwrap();
                if heap.tag(name) != Tag::Symbol {
                    return Err(self.bad_form(rest));
                }
                let params = heap.cdr(target).unwrap();
                let body = heap.cdr(rest).unwrap_or_else(|| heap.nil());
                if heap.tag(body) != Tag::Cell {
                    return Err(self.bad_form(rest));
                }
                let proc = scope.keep(heap.comp_proc(params, body, env));
                env::define(heap, name, proc, env)?;
                Ok(self.syms.ok)
            }
            _ => Err(self.bad_form(rest)),
        }
    }

    /// `(if p c)` / `(if p c a)`. The predicate is evaluated here; the
    /// chosen branch is returned for tail evaluation. The test is strict
    /// identity with `#t`; a missing alternative yields `#f`.
    fn pick_if_branch(&self, rest: Value, env: Value) -> Result<Value, Error> {
        let heap = &self.heap;
        let pred = self.nth_form(rest, 0)?;
        let conseq = self.nth_form(rest, 1)?;
        let tested = self.eval(pred, env)?;
        if tested == heap.bool_value(true) {
            Ok(conseq)
        } else {
            // The omitted branch of the two-arm form is #f.
            Ok(self.nth_form(rest, 2).unwrap_or_else(|_| heap.bool_value(false)))
        }
    }

    /// Desugars `(cond (p body...)... [(else body...)])` into nested `if`s. An
    /// `else` clause is legal only in final position; an exhausted cond is
    /// `#f`.
    fn expand_cond(&self, clauses: Value, scope: &Scope) -> Result<Value, Error> {
        let heap = &self.heap;
        match heap.tag(clauses) {
            Tag::Nil => return Ok(heap.bool_value(false)),
            Tag::Cell => {}
            _ => return Err(self.bad_form(clauses)),
        }

        let clause = heap.car(clauses).unwrap();
        let rest = heap.cdr(clauses).unwrap();
        if heap.tag(clause) != Tag::Cell {
            return Err(self.bad_form(clause));
        }
        let pred = heap.car(clause).unwrap();
        let actions = heap.cdr(clause).unwrap();

        if pred == self.syms.else_ {
            if heap.tag(rest) != Tag::Nil {
                return Err(self.bad_form(clauses));
            }
            return self.make_begin(actions, scope);
        }

        let alt = scope.keep(self.expand_cond(rest, scope)?);
        let conseq = scope.keep(self.make_begin(actions, scope)?);
        Ok(scope.keep(heap.list(&[self.syms.if_, pred, conseq, alt])))
    }

    /// Desugars `(let ((v e)...) body...)` into `((lambda (v...) body...) e...)`,
    /// which the main loop then applies in tail position.
    fn expand_let(&self, whole: Value, rest: Value, scope: &Scope) -> Result<Value, Error> {
        let heap = &self.heap;
        let bindings = self.nth_form(rest, 0)?;
        let body = heap.cdr(rest).unwrap_or_else(|| heap.nil());
        if heap.tag(body) != Tag::Cell {
            return Err(self.bad_form(whole));
        }

        let mut params = Vec::new();
        let mut args = Vec::new();
        let mut cur = bindings;
        while heap.tag(cur) == Tag::Cell {
            let binding = heap.car(cur).unwrap();
            let var = self.nth_form(binding, 0)?;
            let init = self.nth_form(binding, 1)?;
            if heap.tag(var) != Tag::Symbol {
                return Err(self.bad_form(binding));
            }
            params.push(var);
            args.push(init);
            cur = heap.cdr(cur).unwrap();
        }
        if heap.tag(cur) != Tag::Nil {
            return Err(self.bad_form(whole));
        }

        let param_list = scope.keep(heap.list(&params));
        let lambda_tail = scope.keep(heap.cons(param_list, body));
        let lambda = scope.keep(heap.cons(self.syms.lambda, lambda_tail));
        let arg_list = scope.keep(heap.list(&args));
        Ok(scope.keep(heap.cons(lambda, arg_list)))
    }

    /// Shared body of `and`/`or`: evaluates tests left to right, returning
    /// early on the short-circuit value, and hands the final test back for
    /// tail evaluation. `stop_on_false` selects `and` semantics.
    fn eval_tests(
        &self,
        tests: Value,
        env: Value,
        stop_on_false: bool,
    ) -> Result<Tests, Error> {
        let heap = &self.heap;
        if heap.tag(tests) == Tag::Nil {
            return Ok(Tests::Done(heap.bool_value(stop_on_false)));
        }

        let mut cur = tests;
        loop {
            if heap.tag(cur) != Tag::Cell {
                return Err(self.bad_form(tests));
            }
            let test = heap.car(cur).unwrap();
            let next = heap.cdr(cur).unwrap();
            if heap.tag(next) == Tag::Nil {
                return Ok(Tests::Tail(test));
            }
            let v = self.eval(test, env)?;
            let is_false = v == heap.bool_value(false);
            if is_false == stop_on_false {
                return Ok(Tests::Done(v));
            }
            cur = next;
        }
    }

    /// `(lambda (p...) body...)` captures the current environment.
    fn make_lambda(&self, whole: Value, rest: Value, env: Value) -> Result<Value, Error> {
        let heap = &self.heap;
        if heap.tag(rest) != Tag::Cell {
            return Err(self.bad_form(whole));
        }
        let params = heap.car(rest).unwrap();
        let body = heap.cdr(rest).unwrap();
        if heap.tag(body) != Tag::Cell {
            return Err(self.bad_form(whole));
        }
        Ok(heap.comp_proc(params, body, env))
    }

    /// Evaluates every expression of a `begin` body but the last, which is
    /// returned for tail evaluation.
    fn eval_sequence(&self, whole: Value, body: Value, env: Value) -> Result<Value, Error> {
        let heap = &self.heap;
        let mut cur = body;
        loop {
            if heap.tag(cur) != Tag::Cell {
                return Err(self.bad_form(whole));
            }
            let e = heap.car(cur).unwrap();
            let next = heap.cdr(cur).unwrap();
            if heap.tag(next) == Tag::Nil {
                return Ok(e);
            }
            self.eval(e, env)?;
            cur = next;
        }
    }

    //===------------------------------------------------------------------===//
    // Application support
    //===------------------------------------------------------------------===//

    /// Evaluates an operand list left to right into a freshly allocated
    /// list. Every evaluated value is rooted in the caller's scope before
    /// the next sub-evaluation can trigger a collection.
    fn eval_args(&self, exprs: Value, env: Value, scope: &Scope) -> Result<Value, Error> {
        let heap = &self.heap;
        let mut vals = Vec::new();
        let mut cur = exprs;
        while heap.tag(cur) == Tag::Cell {
            let operand = heap.car(cur).unwrap();
            vals.push(scope.keep(self.eval(operand, env)?));
            cur = heap.cdr(cur).unwrap();
        }
        if heap.tag(cur) != Tag::Nil {
            return Err(self.bad_form(exprs));
        }
        Ok(heap.list(&vals))
    }

    /// Destructures the intercepted `(eval expression environment)` call.
    fn eval_arguments(&self, args: Value) -> Result<(Value, Value), Error> {
        let got = list_len(self, args);
        if got != 2 {
            return Err(Error::Arity { expected: 2, got });
        }
        let heap = &self.heap;
        let expr = heap.car(args).unwrap();
        let env = heap.car(heap.cdr(args).unwrap()).unwrap();
        Ok((expr, env))
    }

    /// Destructures the intercepted `apply`: the final argument must be a
    /// proper list, which is spliced behind the preceding arguments.
    fn splice_apply(&self, args: Value, scope: &Scope) -> Result<(Value, Value), Error> {
        let heap = &self.heap;
        if heap.tag(args) != Tag::Cell {
            return Err(Error::Arity { expected: 2, got: 0 });
        }
        let target = heap.car(args).unwrap();
        let rest = heap.cdr(args).unwrap();
        if heap.tag(rest) != Tag::Cell {
            return Err(Error::Arity { expected: 2, got: 1 });
        }

        let mut prefix = Vec::new();
        let mut cur = rest;
        loop {
            let elem = heap.car(cur).unwrap();
            let next = heap.cdr(cur).unwrap();
            if heap.tag(next) == Tag::Nil {
                if !is_proper_list(self, elem) {
                    return Err(Error::Type {
                        expected: "argument list",
                        actual: heap.type_name(elem).to_string(),
                    });
                }
                let mut out = elem;
                for &p in prefix.iter().rev() {
                    out = scope.keep(heap.cons(p, out));
                }
                return Ok((target, out));
            }
            prefix.push(elem);
            cur = next;
        }
    }

    //===------------------------------------------------------------------===//
    // Helpers
    //===------------------------------------------------------------------===//

    /// `(begin e...)` for a multi-expression body, or the expression itself
    /// when there is exactly one.
    fn make_begin(&self, actions: Value, scope: &Scope) -> Result<Value, Error> {
        let heap = &self.heap;
        if heap.tag(actions) != Tag::Cell {
            return Err(self.bad_form(actions));
        }
        if heap.tag(heap.cdr(actions).unwrap()) == Tag::Nil {
            return Ok(heap.car(actions).unwrap());
        }
        Ok(scope.keep(heap.cons(self.syms.begin, actions)))
    }

    /// The `n`th element of a form's sub-list, or a bad-form error.
    fn nth_form(&self, list: Value, n: usize) -> Result<Value, Error> {
        let heap = &self.heap;
        let mut cur = list;
        for _ in 0..n {
            match heap.cdr(cur) {
                Some(next) => cur = next,
                None => return Err(self.bad_form(list)),
            }
        }
        heap.car(cur).ok_or_else(|| self.bad_form(list))
    }

    fn bad_form(&self, form: Value) -> Error {
        Error::BadForm(printer::to_string(&self.heap, form))
    }
}

/// Outcome of evaluating an `and`/`or` test chain.
enum Tests {
    /// Short-circuited (or the chain was empty).
    Done(Value),
    /// The final test, to be evaluated in tail position.
    Tail(Value),
}

/// Proper-list length; an improper tail ends the count.
fn list_len(vm: &Vm, list: Value) -> usize {
    let heap = &vm.heap;
    let mut n = 0;
    let mut cur = list;
    while heap.tag(cur) == Tag::Cell {
        n += 1;
        cur = heap.cdr(cur).unwrap();
    }
    n
}

/// True when the chain of tails ends in nil.
fn is_proper_list(vm: &Vm, list: Value) -> bool {
    let heap = &vm.heap;
    let mut cur = list;
    while heap.tag(cur) == Tag::Cell {
        cur = heap.cdr(cur).unwrap();
    }
    heap.tag(cur) == Tag::Nil
}
