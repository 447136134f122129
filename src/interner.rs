use rustc_hash::FxHashMap;
use std::rc::Rc;

use crate::heap::Value;

/// Canonical storage for strings and symbols.
///
/// Maps interned text to the unique heap value carrying it, so textual
/// equality reduces to handle equality everywhere else in the interpreter.
/// The tables are scanned as GC roots: an interned value lives until VM
/// teardown.
pub struct Interner {
    strings: FxHashMap<Rc<str>, Value>,
    symbols: FxHashMap<Rc<str>, Value>,
}

impl Interner {
    pub fn new() -> Self {
        Self { strings: FxHashMap::default(), symbols: FxHashMap::default() }
    }

    pub fn lookup_string(&self, text: &str) -> Option<Value> {
        self.strings.get(text).copied()
    }

    pub fn insert_string(&mut self, text: Rc<str>, v: Value) {
        self.strings.insert(text, v);
    }

    pub fn lookup_symbol(&self, name: &str) -> Option<Value> {
        self.symbols.get(name).copied()
    }

    pub fn insert_symbol(&mut self, name: Rc<str>, v: Value) {
        self.symbols.insert(name, v);
    }

    /// All interned values, for the mark phase.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.strings.values().copied().chain(self.symbols.values().copied())
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}
