// Binding contexts.
//
// A context is one link in a scope chain: either a module scope that
// owns its own symbol-to-cell map, or a frame scope that views the
// argument slots of a running (or specializing) varlist through its
// keylist. Words carry a context reference as their binding; lookup
// walks the chain outward.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::action::VarList;
use crate::error::Raised;
use crate::symbol::Symbol;
use crate::value::Cell;


pub enum Scope {
    Module(RefCell<HashMap<Symbol, Cell>>),
    Frame(Rc<VarList>),
}


pub struct Context {
    scope: Scope,
    parent: Option<Rc<Context>>,
}


impl Context {
    pub fn module() -> Rc<Context> {
        Rc::new(Context {
            scope: Scope::Module(RefCell::new(HashMap::new())),
            parent: None,
        })
    }

    pub fn module_chained(parent: &Rc<Context>) -> Rc<Context> {
        Rc::new(Context {
            scope: Scope::Module(RefCell::new(HashMap::new())),
            parent: Some(parent.clone()),
        })
    }

    pub fn frame(varlist: Rc<VarList>, parent: Option<Rc<Context>>) -> Rc<Context> {
        Rc::new(Context { scope: Scope::Frame(varlist), parent })
    }

    pub fn parent(&self) -> Option<&Rc<Context>> {
        self.parent.as_ref()
    }

    pub fn varlist(&self) -> Option<&Rc<VarList>> {
        match &self.scope {
            Scope::Frame(varlist) => Some(varlist),
            Scope::Module(_) => None,
        }
    }

    // Does this single link own the symbol, chain aside?
    pub fn owns(&self, sym: &Symbol) -> bool {
        match &self.scope {
            Scope::Module(map) => map.borrow().contains_key(sym),
            Scope::Frame(varlist) => varlist.index_of(sym).is_some(),
        }
    }

    // Look up a word from anywhere in the scope chain.
    pub fn get(&self, sym: &Symbol) -> Option<Cell> {
        match &self.scope {
            Scope::Module(map) => {
                if let Some(cell) = map.borrow().get(sym) {
                    return Some(cell.clone());
                }
            }
            Scope::Frame(varlist) => {
                if let Some(index) = varlist.index_of(sym) {
                    return Some(varlist.slot(index));
                }
            }
        }
        self.parent.as_ref().and_then(|p| p.get(sym))
    }

    // Assign through the chain: the nearest link that owns the symbol
    // receives the value; otherwise the nearest module scope defines it.
    pub fn set(self: &Rc<Context>, sym: &Symbol, cell: Cell) -> Raised<()> {
        let mut cursor = self.clone();
        loop {
            if cursor.owns(sym) {
                return cursor.set_here(sym, cell);
            }
            match cursor.parent.clone() {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        let mut cursor = self.clone();
        loop {
            if let Scope::Module(_) = cursor.scope {
                return cursor.set_here(sym, cell);
            }
            match cursor.parent.clone() {
                Some(parent) => cursor = parent,
                None => return Ok(()),
            }
        }
    }

    fn set_here(&self, sym: &Symbol, cell: Cell) -> Raised<()> {
        match &self.scope {
            Scope::Module(map) => {
                map.borrow_mut().insert(sym.clone(), cell);
                Ok(())
            }
            Scope::Frame(varlist) => {
                let index = varlist
                    .index_of(sym)
                    .expect("set_here called without ownership");
                varlist.set_slot(index, cell)
            }
        }
    }

    // Define directly in this link's scope, shadowing any outer binding.
    pub fn define(&self, sym: &Symbol, cell: Cell) -> Raised<()> {
        match &self.scope {
            Scope::Module(map) => {
                map.borrow_mut().insert(sym.clone(), cell);
                Ok(())
            }
            Scope::Frame(_) => self.set_here(sym, cell),
        }
    }
}


impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.scope {
            Scope::Module(map) => {
                write!(f, "Context::Module({} words", map.borrow().len())?;
            }
            Scope::Frame(varlist) => {
                write!(f, "Context::Frame({} slots", varlist.len())?;
            }
        }
        if self.parent.is_some() {
            write!(f, ", chained")?;
        }
        write!(f, ")")
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    #[test]
    fn test_lookup_walks_chain() {
        let mut symbols = SymbolTable::new();
        let foo = symbols.intern("foo");
        let root = Context::module();
        root.define(&foo, Cell::integer(1)).unwrap();
        let inner = Context::module_chained(&root);
        assert_eq!(inner.get(&foo), Some(Cell::integer(1)));
    }

    #[test]
    fn test_set_prefers_owner() {
        let mut symbols = SymbolTable::new();
        let foo = symbols.intern("foo");
        let root = Context::module();
        root.define(&foo, Cell::integer(1)).unwrap();
        let inner = Context::module_chained(&root);
        inner.set(&foo, Cell::integer(2)).unwrap();
        // The outer scope owned foo, so the write landed there.
        assert_eq!(root.get(&foo), Some(Cell::integer(2)));
    }

    #[test]
    fn test_unowned_set_defines_in_nearest_module() {
        let mut symbols = SymbolTable::new();
        let bar = symbols.intern("bar");
        let root = Context::module();
        let inner = Context::module_chained(&root);
        inner.set(&bar, Cell::integer(3)).unwrap();
        assert_eq!(inner.get(&bar), Some(Cell::integer(3)));
        assert_eq!(root.get(&bar), None);
    }
}
