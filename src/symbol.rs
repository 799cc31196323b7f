// Interned symbols.
//
// Words compare case-insensitively but remember the spelling they were
// first seen with. Keylists compare entries by identity, so every word
// spelling is interned once per interpreter through a SymbolTable.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;


#[derive(Clone)]
pub struct Symbol(Rc<SymbolData>);

struct SymbolData {
    text: String,
    folded: String,
}


impl Symbol {
    pub fn text(&self) -> &str {
        &self.0.text
    }

    pub fn folded(&self) -> &str {
        &self.0.folded
    }

    pub fn same(&self, other: &Symbol) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}


impl PartialEq for Symbol {
    fn eq(&self, other: &Symbol) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0.folded == other.0.folded
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.folded.hash(state)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Symbol({})", self.0.text)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.text)
    }
}


pub struct SymbolTable {
    interned: HashMap<String, Symbol>,
}


impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable { interned: HashMap::new() }
    }

    pub fn intern(&mut self, spelling: &str) -> Symbol {
        let folded = spelling.to_lowercase();
        if let Some(sym) = self.interned.get(&folded) {
            return sym.clone();
        }
        let sym = Symbol(Rc::new(SymbolData {
            text: String::from(spelling),
            folded: folded.clone(),
        }));
        self.interned.insert(folded, sym.clone());
        sym
    }

    pub fn len(&self) -> usize {
        self.interned.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_case_insensitive() {
        let mut table = SymbolTable::new();
        let a = table.intern("Append");
        let b = table.intern("APPEND");
        assert!(a.same(&b));
        assert_eq!(a.text(), "Append");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_distinct_words_differ() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo");
        let b = table.intern("bar");
        assert!(!a.same(&b));
        assert_ne!(a, b);
    }
}
