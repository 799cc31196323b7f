// Stubs: heap-backed variable-length storage.
//
// An Array holds cells, a Binary holds bytes. Both carry a flavor tag
// saying what role the storage plays, plus flags. Source-flavored
// arrays are the list backing of block/group/fence values, and those
// refuse antiform cells outright; the bookkeeping flavors (paramlists,
// partials, details) hold whatever their owner defines.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::error::{ErrorId, ErrorValue, Raised};
use crate::value::Cell;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flavor {
    Source,
    ParamList,
    KeyList,
    Partials,
    Details,
    Instruction,
    Handles,
}


#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum FlexFlag {
    Managed   = 0b0001,
    FixedSize = 0b0010,
    Frozen    = 0b0100,
}

pub type FlexFlags = BitFlags<FlexFlag>;


pub struct Array {
    cells: RefCell<Vec<Cell>>,
    flavor: Flavor,
    flags: RefCell<FlexFlags>,
}


impl Array {
    pub fn new(flavor: Flavor) -> Rc<Array> {
        Rc::new(Array {
            cells: RefCell::new(Vec::new()),
            flavor,
            flags: RefCell::new(BitFlags::empty()),
        })
    }

    pub fn with_flavor(flavor: Flavor, cells: Vec<Cell>) -> Rc<Array> {
        Rc::new(Array {
            cells: RefCell::new(cells),
            flavor,
            flags: RefCell::new(BitFlags::empty()),
        })
    }

    // Source arrays check their contents; use push() to build one from
    // unvetted cells.
    pub fn source_from(cells: Vec<Cell>) -> Rc<Array> {
        debug_assert!(cells.iter().all(|c| c.is_element()));
        Array::with_flavor(Flavor::Source, cells)
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Cell> {
        self.cells.borrow().get(index).cloned()
    }

    pub fn cells_from(&self, index: usize) -> Vec<Cell> {
        let cells = self.cells.borrow();
        if index >= cells.len() {
            return Vec::new();
        }
        cells[index..].to_vec()
    }

    fn check_store(&self, cell: &Cell) -> Raised<()> {
        if self.flags.borrow().contains(FlexFlag::Frozen) {
            return Err(ErrorValue::new(
                ErrorId::Internal,
                "attempt to modify a frozen array",
            ));
        }
        if self.flavor == Flavor::Source && cell.is_antiform() {
            return Err(ErrorValue::bare(ErrorId::AntiformInArray));
        }
        Ok(())
    }

    pub fn push(&self, cell: Cell) -> Raised<()> {
        self.check_store(&cell)?;
        self.cells.borrow_mut().push(cell);
        Ok(())
    }

    pub fn set(&self, index: usize, cell: Cell) -> Raised<()> {
        self.check_store(&cell)?;
        let mut cells = self.cells.borrow_mut();
        if index >= cells.len() {
            return Err(ErrorValue::new(ErrorId::Internal, "array index out of range"));
        }
        cells[index] = cell;
        Ok(())
    }

    pub fn truncate(&self, len: usize) -> Raised<()> {
        if self.flags.borrow().contains(FlexFlag::Frozen) {
            return Err(ErrorValue::new(
                ErrorId::Internal,
                "attempt to modify a frozen array",
            ));
        }
        self.cells.borrow_mut().truncate(len);
        Ok(())
    }

    pub fn set_flag(&self, flag: FlexFlag) {
        self.flags.borrow_mut().insert(flag);
    }

    pub fn clear_flag(&self, flag: FlexFlag) {
        self.flags.borrow_mut().remove(flag);
    }

    pub fn has_flag(&self, flag: FlexFlag) -> bool {
        self.flags.borrow().contains(flag)
    }
}


impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Array({:?}, {} cells)", self.flavor, self.len())
    }
}


pub struct Binary {
    bytes: RefCell<Vec<u8>>,
    flags: RefCell<FlexFlags>,
}


impl Binary {
    pub fn from_vec(bytes: Vec<u8>) -> Rc<Binary> {
        Rc::new(Binary {
            bytes: RefCell::new(bytes),
            flags: RefCell::new(BitFlags::empty()),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.bytes.borrow())
    }

    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.bytes.borrow_mut())
    }

    pub fn set_flag(&self, flag: FlexFlag) {
        self.flags.borrow_mut().insert(flag);
    }

    pub fn has_flag(&self, flag: FlexFlag) -> bool {
        self.flags.borrow().contains(flag)
    }
}


impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Binary({} bytes)", self.len())
    }
}


// Stubs tracked by the interpreter's manual list until they become
// managed or the owning level rolls back.
#[derive(Clone, Debug)]
pub enum ManualFlex {
    Cells(Rc<Array>),
    Bytes(Rc<Binary>),
}
