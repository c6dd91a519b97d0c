// Datastructure to manage lexical scoping. Generic over the entry type so
// this module stays a leaf with no knowledge of what a symbol actually is;
// see `ast::SymEntry` for the concrete entries stored in this language's
// scopes.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub struct Scope<T> {
    entries: RefCell<HashMap<String, T>>,
    parent: Option<Rc<Scope<T>>>,
    level: u32,
    next_offset: Rc<Cell<u32>>,
    // Names referenced before their defining declaration was seen, as
    // happens with mutually recursive procedures.
    pending: RefCell<Vec<String>>,
}

impl<T> fmt::Debug for Scope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("level", &self.level)
            .field("pending", &self.pending.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: Clone> Scope<T> {
    // The scope for the main program: no parent, level 1.
    #[must_use]
    pub fn root(frame_reserved: u32) -> Rc<Scope<T>> {
        Rc::new(Scope {
            entries: RefCell::new(HashMap::new()),
            parent: None,
            level: 1,
            next_offset: Rc::new(Cell::new(frame_reserved)),
            pending: RefCell::new(Vec::new()),
        })
    }

    // A nested scope for a new call frame (a procedure body), one level
    // deeper than `parent` with its own offset counter.
    #[must_use]
    pub fn child(parent: &Rc<Scope<T>>, frame_reserved: u32) -> Rc<Scope<T>> {
        Rc::new(Scope {
            entries: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            level: parent.level + 1,
            next_offset: Rc::new(Cell::new(frame_reserved)),
            pending: RefCell::new(Vec::new()),
        })
    }

    // A nested scope that shares its parent's call frame: same level, same
    // offset counter, so allocations made here are visible in
    // `parent.local_size()` too.
    #[must_use]
    pub fn nested_frame(parent: &Rc<Scope<T>>) -> Rc<Scope<T>> {
        Rc::new(Scope {
            entries: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            level: parent.level,
            next_offset: parent.next_offset.clone(),
            pending: RefCell::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn define(&self, name: &str, entry: T) {
        self.entries.borrow_mut().insert(name.to_string(), entry);
        self.pending.borrow_mut().retain(|p| p != name);
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<T> {
        if let Some(entry) = self.entries.borrow().get(name) {
            return Some(entry.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn alloc_variable_space(&self, n: u32) -> u32 {
        let offset = self.next_offset.get();
        self.next_offset.set(offset + n);
        offset
    }

    #[must_use]
    pub fn local_size(&self) -> u32 {
        self.next_offset.get()
    }

    pub fn declare_forward(&self, name: &str) {
        if self.entries.borrow().get(name).is_none() {
            self.pending.borrow_mut().push(name.to_string());
        }
    }

    pub fn resolve_scope(&self) -> Result<(), Vec<String>> {
        let pending = self.pending.borrow().clone();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parent_chain() {
        let root: Rc<Scope<i32>> = Scope::root(2);
        root.define("x", 1);
        let child = Scope::child(&root, 2);
        child.define("y", 2);
        assert_eq!(child.lookup("x"), Some(1));
        assert_eq!(child.lookup("y"), Some(2));
        assert_eq!(root.lookup("y"), None);
    }

    #[test]
    fn shadowing_prefers_inner_scope() {
        let root: Rc<Scope<i32>> = Scope::root(2);
        root.define("x", 1);
        let child = Scope::child(&root, 2);
        child.define("x", 99);
        assert_eq!(child.lookup("x"), Some(99));
        assert_eq!(root.lookup("x"), Some(1));
    }

    #[test]
    fn variable_space_allocates_sequentially_from_frame_reserved() {
        let scope: Rc<Scope<i32>> = Scope::root(3);
        assert_eq!(scope.alloc_variable_space(1), 3);
        assert_eq!(scope.alloc_variable_space(2), 4);
        assert_eq!(scope.local_size(), 6);
    }

    #[test]
    fn levels_increment_on_nesting() {
        let root: Rc<Scope<i32>> = Scope::root(0);
        let child = Scope::child(&root, 0);
        let grandchild = Scope::child(&child, 0);
        assert_eq!(root.level(), 1);
        assert_eq!(child.level(), 2);
        assert_eq!(grandchild.level(), 3);
    }

    #[test]
    fn nested_frame_shares_level_and_offset_counter_with_parent() {
        let root: Rc<Scope<i32>> = Scope::root(3);
        root.alloc_variable_space(2);
        let for_scope = Scope::nested_frame(&root);
        assert_eq!(for_scope.level(), root.level());
        assert_eq!(for_scope.alloc_variable_space(1), 5);
        assert_eq!(root.local_size(), 6);
    }

    #[test]
    fn forward_reference_must_resolve_before_scope_closes() {
        let scope: Rc<Scope<i32>> = Scope::root(0);
        scope.declare_forward("later");
        assert_eq!(scope.resolve_scope(), Err(vec!["later".to_string()]));
        scope.define("later", 7);
        assert_eq!(scope.resolve_scope(), Ok(()));
    }
}
