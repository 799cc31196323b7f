// The cell model.
//
// Every first-class datum lives in a Cell: a heart (the base datatype
// with its payload), a lift byte (quoting depth and antiform status),
// hint flags, and a binding slot for the hearts that resolve words.
//
// *Lift byte*
//
// The encoding is a ladder. 0 marks an antiform. 2 is a plain element.
// 3 is a quasiform. Each quote level adds 2, with parity carrying the
// quasi status, so 4 is a quoted plain element and 5 a quoted quasiform.
// Lifting moves an antiform to its quasiform and quotes anything else;
// unlifting reverses the move and fails on a plain element.
//
// *Stability*
//
// Antiforms are never legal inside list arrays. The stable ones (null,
// ok, void, splice, action, tripwire) may be stored in variables; the
// unstable ones (pack, error, ghost) exist only in in-flight evaluation
// slots and must be decayed before storage.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::action::{Action, VarList};
use crate::env::Context;
use crate::error::{ErrorId, ErrorValue, Raised, invalid_lift};
use crate::feed::Feed;
use crate::flex::{Array, Binary};
use crate::symbol::Symbol;


// Lift byte landmarks.
pub const LIFT_ANTIFORM: u8 = 0;
pub const LIFT_PLAIN: u8 = 2;
pub const LIFT_QUASI: u8 = 3;


// Cell-specific hint flags.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum CellFlag {
    NewlineBefore       = 0b0000001,
    OutHintUnsurprising = 0b0000010,
    ThrowMark           = 0b0000100,
}

pub type CellFlags = BitFlags<CellFlag>;


// Base-datatype tags, used by parameter type-constraint sets.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u32)]
pub enum TypeTag {
    Blank      = 0x00000001,
    Space      = 0x00000002,
    Comma      = 0x00000004,
    Logic      = 0x00000008,
    Integer    = 0x00000010,
    Decimal    = 0x00000020,
    Rune       = 0x00000040,
    Text       = 0x00000080,
    Blob       = 0x00000100,
    Word       = 0x00000200,
    SetWord    = 0x00000400,
    GetWord    = 0x00000800,
    Block      = 0x00001000,
    Group      = 0x00002000,
    Fence      = 0x00004000,
    Frame      = 0x00008000,
    Parameter  = 0x00010000,
    Handle     = 0x00020000,
    Warning    = 0x00040000,
    Keyword    = 0x00080000,
    Varargs    = 0x00100000,
    // Antiform acceptance bits, used only in parameter specs.
    NullAnti   = 0x00200000,
    OkAnti     = 0x00400000,
    VoidAnti   = 0x00800000,
    SpliceAnti = 0x01000000,
    ActionAnti = 0x02000000,
}

pub type TypeSet = BitFlags<TypeTag>;

pub fn any_element() -> TypeSet {
    TypeTag::Blank | TypeTag::Space | TypeTag::Comma | TypeTag::Logic
        | TypeTag::Integer | TypeTag::Decimal | TypeTag::Rune | TypeTag::Text
        | TypeTag::Blob | TypeTag::Word | TypeTag::SetWord | TypeTag::GetWord
        | TypeTag::Block | TypeTag::Group | TypeTag::Fence | TypeTag::Frame
        | TypeTag::Parameter | TypeTag::Handle | TypeTag::Warning
        | TypeTag::Keyword
}

// Everything assignable to a variable: elements plus the stable
// antiforms.
pub fn any_stable() -> TypeSet {
    any_element()
        | TypeTag::NullAnti | TypeTag::OkAnti | TypeTag::VoidAnti
        | TypeTag::SpliceAnti | TypeTag::ActionAnti
}


// The word-like keywords whose antiforms are built into the evaluator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Null,
    Ok,
    Void,
}

impl Keyword {
    pub fn spelling(self) -> &'static str {
        match self {
            Keyword::Null => "null",
            Keyword::Ok => "ok",
            Keyword::Void => "void",
        }
    }

    pub fn from_spelling(text: &str) -> Option<Keyword> {
        match text {
            "null" => Some(Keyword::Null),
            "ok" => Some(Keyword::Ok),
            "void" => Some(Keyword::Void),
            _ => None,
        }
    }
}


// A position into a shared cell array.
#[derive(Clone, Debug)]
pub struct Series {
    pub array: Rc<Array>,
    pub index: usize,
}

impl Series {
    pub fn head(array: Rc<Array>) -> Series {
        Series { array, index: 0 }
    }

    pub fn len(&self) -> usize {
        self.array.len().saturating_sub(self.index)
    }

    pub fn at(&self, offset: usize) -> Option<Cell> {
        self.array.get(self.index + offset)
    }

    pub fn cells(&self) -> Vec<Cell> {
        self.array.cells_from(self.index)
    }
}


// Host data carried by handle values; the cleaner runs when the last
// reference goes away.
pub struct HandleStub {
    pub bytes: RefCell<Vec<u8>>,
    pub cleaner: Option<fn(&mut Vec<u8>)>,
}

impl Drop for HandleStub {
    fn drop(&mut self) {
        if let Some(cleaner) = self.cleaner {
            cleaner(&mut self.bytes.borrow_mut());
        }
    }
}

impl fmt::Debug for HandleStub {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HandleStub({} bytes)", self.bytes.borrow().len())
    }
}


// The frame payload: which action, and (once reified) which varlist.
#[derive(Clone, Debug)]
pub struct FramePayload {
    pub action: Action,
    pub varlist: Option<Rc<VarList>>,
}


// All base datatypes, payload included.
#[derive(Clone, Debug)]
pub enum Heart {
    Erased,
    Blank,
    Space,
    Comma,
    Keyword(Keyword),
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Rune(char),
    Text(Rc<String>),
    Blob(Rc<Binary>),
    Word(Symbol),
    SetWord(Symbol),
    GetWord(Symbol),
    Block(Series),
    Group(Series),
    Fence(Series),
    Frame(FramePayload),
    Parameter(Rc<crate::action::Param>),
    Handle(Rc<HandleStub>),
    Warning(Rc<ErrorValue>),
    Varargs(Rc<Feed>),
}


#[derive(Clone, Debug)]
pub struct Cell {
    pub heart: Heart,
    pub lift: u8,
    pub flags: CellFlags,
    pub binding: Option<Rc<Context>>,
}

// An in-flight cell that may hold unstable antiforms.
pub type Atom = Cell;
// A cell known to be storable in a variable.
pub type Value = Cell;
// A cell known to be storable in a list (lift >= plain).
pub type Element = Cell;


// The semantic classification of an antiform cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Anti {
    Null,
    Ok,
    Void,
    Ghost,
    Splice,
    Pack,
    Error,
    Action,
    Tripwire,
}


impl Default for Cell {
    fn default() -> Cell {
        Cell::erased()
    }
}


impl Cell {
    fn plain(heart: Heart) -> Cell {
        Cell { heart, lift: LIFT_PLAIN, flags: BitFlags::empty(), binding: None }
    }

    fn anti(heart: Heart) -> Cell {
        Cell { heart, lift: LIFT_ANTIFORM, flags: BitFlags::empty(), binding: None }
    }

    // -- construction: elements

    pub fn erased() -> Cell {
        Cell {
            heart: Heart::Erased,
            lift: 0,
            flags: BitFlags::empty(),
            binding: None,
        }
    }

    pub fn blank() -> Cell { Cell::plain(Heart::Blank) }
    pub fn space() -> Cell { Cell::plain(Heart::Space) }
    pub fn comma() -> Cell { Cell::plain(Heart::Comma) }
    pub fn logic(v: bool) -> Cell { Cell::plain(Heart::Logic(v)) }
    pub fn integer(v: i64) -> Cell { Cell::plain(Heart::Integer(v)) }
    pub fn decimal(v: f64) -> Cell { Cell::plain(Heart::Decimal(v)) }
    pub fn rune(v: char) -> Cell { Cell::plain(Heart::Rune(v)) }

    pub fn text(v: impl Into<String>) -> Cell {
        Cell::plain(Heart::Text(Rc::new(v.into())))
    }

    pub fn blob(bytes: Rc<Binary>) -> Cell {
        Cell::plain(Heart::Blob(bytes))
    }

    pub fn word(sym: Symbol) -> Cell { Cell::plain(Heart::Word(sym)) }
    pub fn set_word(sym: Symbol) -> Cell { Cell::plain(Heart::SetWord(sym)) }
    pub fn get_word(sym: Symbol) -> Cell { Cell::plain(Heart::GetWord(sym)) }

    pub fn block(series: Series) -> Cell { Cell::plain(Heart::Block(series)) }
    pub fn group(series: Series) -> Cell { Cell::plain(Heart::Group(series)) }
    pub fn fence(series: Series) -> Cell { Cell::plain(Heart::Fence(series)) }

    pub fn frame(action: Action, varlist: Option<Rc<VarList>>) -> Cell {
        Cell::plain(Heart::Frame(FramePayload { action, varlist }))
    }

    pub fn parameter(param: Rc<crate::action::Param>) -> Cell {
        Cell::anti(Heart::Parameter(param))
    }

    pub fn handle(stub: Rc<HandleStub>) -> Cell {
        Cell::plain(Heart::Handle(stub))
    }

    pub fn warning(err: ErrorValue) -> Cell {
        Cell::plain(Heart::Warning(Rc::new(err)))
    }

    pub fn varargs(feed: Rc<Feed>) -> Cell {
        Cell::plain(Heart::Varargs(feed))
    }

    // -- construction: antiforms

    pub fn null() -> Cell { Cell::anti(Heart::Keyword(Keyword::Null)) }
    pub fn ok() -> Cell { Cell::anti(Heart::Keyword(Keyword::Ok)) }
    pub fn void() -> Cell { Cell::anti(Heart::Keyword(Keyword::Void)) }
    pub fn ghost() -> Cell { Cell::anti(Heart::Comma) }

    pub fn splice(series: Series) -> Cell {
        Cell::anti(Heart::Group(series))
    }

    // Pack elements are stored lifted so unstable contents survive.
    pub fn pack(items: Vec<Cell>) -> Cell {
        let lifted: Vec<Cell> = items.into_iter().map(|c| c.lifted()).collect();
        let array = Array::source_from(lifted);
        Cell::anti(Heart::Block(Series::head(array)))
    }

    pub fn error(err: ErrorValue) -> Cell {
        Cell::anti(Heart::Warning(Rc::new(err)))
    }

    pub fn action(action: Action) -> Cell {
        Cell::anti(Heart::Frame(FramePayload { action, varlist: None }))
    }

    pub fn tripwire(message: impl Into<String>) -> Cell {
        Cell::anti(Heart::Text(Rc::new(message.into())))
    }

    // -- state queries

    pub fn is_erased(&self) -> bool {
        matches!(self.heart, Heart::Erased)
    }

    pub fn is_readable(&self) -> bool {
        !self.is_erased()
    }

    pub fn erase(&mut self) {
        *self = Cell::erased();
    }

    pub fn is_antiform(&self) -> bool {
        self.is_readable() && self.lift == LIFT_ANTIFORM
    }

    pub fn is_quasiform(&self) -> bool {
        self.lift == LIFT_QUASI
    }

    pub fn is_quoted(&self) -> bool {
        self.lift >= LIFT_PLAIN + 2
    }

    // Elements are quotable: they can appear inside source arrays.
    pub fn is_element(&self) -> bool {
        self.is_readable() && self.lift >= LIFT_PLAIN
    }

    pub fn antiform_kind(&self) -> Option<Anti> {
        if !self.is_antiform() {
            return None;
        }
        Some(match &self.heart {
            Heart::Keyword(Keyword::Null) => Anti::Null,
            Heart::Keyword(Keyword::Ok) => Anti::Ok,
            Heart::Keyword(Keyword::Void) => Anti::Void,
            Heart::Comma => Anti::Ghost,
            Heart::Group(_) => Anti::Splice,
            Heart::Block(_) => Anti::Pack,
            Heart::Warning(_) => Anti::Error,
            Heart::Frame(_) => Anti::Action,
            Heart::Text(_) => Anti::Tripwire,
            Heart::Parameter(_) => return None,
            _ => return None,
        })
    }

    pub fn is_stable(&self) -> bool {
        match self.antiform_kind() {
            Some(Anti::Pack) | Some(Anti::Error) | Some(Anti::Ghost) => false,
            _ => self.is_readable(),
        }
    }

    pub fn is_ghost(&self) -> bool {
        self.antiform_kind() == Some(Anti::Ghost)
    }

    pub fn is_null(&self) -> bool {
        self.antiform_kind() == Some(Anti::Null)
    }

    pub fn is_void(&self) -> bool {
        self.antiform_kind() == Some(Anti::Void)
    }

    pub fn is_action(&self) -> bool {
        self.antiform_kind() == Some(Anti::Action)
    }

    pub fn is_tripwire(&self) -> bool {
        self.antiform_kind() == Some(Anti::Tripwire)
    }

    pub fn is_unspecialized_param(&self) -> bool {
        self.is_antiform() && matches!(self.heart, Heart::Parameter(_))
    }

    // -- lift ladder

    // Lifting never fails: antiforms become quasiforms, everything
    // else gains a quote level.
    pub fn lifted(&self) -> Cell {
        let mut out = self.clone();
        out.lift = if self.lift == LIFT_ANTIFORM {
            LIFT_QUASI
        } else {
            self.lift + 2
        };
        out
    }

    pub fn unlifted(&self) -> Raised<Cell> {
        let mut out = self.clone();
        out.lift = match self.lift {
            LIFT_QUASI => LIFT_ANTIFORM,
            n if n >= LIFT_PLAIN + 2 => n - 2,
            _ => return Err(invalid_lift()),
        };
        Ok(out)
    }

    pub fn quoted(&self) -> Cell {
        let mut out = self.clone();
        out.lift = self.lift.saturating_add(2).max(LIFT_PLAIN + 2);
        out
    }

    pub fn unquoted(&self) -> Raised<Cell> {
        if !self.is_quoted() {
            return Err(invalid_lift());
        }
        let mut out = self.clone();
        out.lift -= 2;
        Ok(out)
    }

    // -- copying

    // A full copy carries heart, lift, payload and binding, but masks
    // the transient hint flags.
    pub fn copied(&self) -> Cell {
        let mut out = self.clone();
        out.flags.remove(CellFlag::OutHintUnsurprising | CellFlag::ThrowMark);
        out
    }

    // -- decay

    // Normalize an in-flight atom into a stable value. Single-element
    // packs collapse to their element; empty packs collapse to void;
    // raised errors surface; ghosts are not a value at all.
    pub fn decay(&self) -> Raised<Cell> {
        match self.antiform_kind() {
            Some(Anti::Pack) => {
                let series = match &self.heart {
                    Heart::Block(s) => s,
                    _ => unreachable!(),
                };
                match series.at(0) {
                    None => Ok(Cell::void()),
                    Some(first) => first.unlifted()?.decay(),
                }
            }
            Some(Anti::Error) => match &self.heart {
                Heart::Warning(err) => Err((**err).clone()),
                _ => unreachable!(),
            },
            Some(Anti::Ghost) => {
                Err(ErrorValue::bare(ErrorId::NeedValue))
            }
            _ => {
                if self.is_readable() {
                    Ok(self.clone())
                } else {
                    Err(ErrorValue::bare(ErrorId::Internal))
                }
            }
        }
    }

    // -- truthiness

    pub fn is_truthy(&self) -> Raised<bool> {
        match self.antiform_kind() {
            Some(Anti::Null) => return Ok(false),
            Some(Anti::Void) | Some(Anti::Ghost) => {
                return Err(ErrorValue::bare(ErrorId::NeedValue));
            }
            Some(Anti::Error) => return Err(self.decay().unwrap_err()),
            _ => {}
        }
        match &self.heart {
            Heart::Logic(v) => Ok(*v),
            Heart::Erased => Err(ErrorValue::bare(ErrorId::Internal)),
            _ => Ok(true),
        }
    }

    // -- typecheck support

    pub fn type_tag(&self) -> Option<TypeTag> {
        Some(match &self.heart {
            Heart::Erased => return None,
            Heart::Blank => TypeTag::Blank,
            Heart::Space => TypeTag::Space,
            Heart::Comma => TypeTag::Comma,
            Heart::Keyword(_) => TypeTag::Keyword,
            Heart::Logic(_) => TypeTag::Logic,
            Heart::Integer(_) => TypeTag::Integer,
            Heart::Decimal(_) => TypeTag::Decimal,
            Heart::Rune(_) => TypeTag::Rune,
            Heart::Text(_) => TypeTag::Text,
            Heart::Blob(_) => TypeTag::Blob,
            Heart::Word(_) => TypeTag::Word,
            Heart::SetWord(_) => TypeTag::SetWord,
            Heart::GetWord(_) => TypeTag::GetWord,
            Heart::Block(_) => TypeTag::Block,
            Heart::Group(_) => TypeTag::Group,
            Heart::Fence(_) => TypeTag::Fence,
            Heart::Frame(_) => TypeTag::Frame,
            Heart::Parameter(_) => TypeTag::Parameter,
            Heart::Handle(_) => TypeTag::Handle,
            Heart::Warning(_) => TypeTag::Warning,
            Heart::Varargs(_) => TypeTag::Varargs,
        })
    }

    // -- payload accessors

    pub fn as_integer(&self) -> Option<i64> {
        match self.heart {
            Heart::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> Option<bool> {
        match self.heart {
            Heart::Logic(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self.heart {
            Heart::Decimal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_rune(&self) -> Option<char> {
        match self.heart {
            Heart::Rune(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<Rc<String>> {
        match &self.heart {
            Heart::Text(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&Series> {
        match &self.heart {
            Heart::Block(s) | Heart::Group(s) | Heart::Fence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<&Symbol> {
        match &self.heart {
            Heart::Word(s) | Heart::SetWord(s) | Heart::GetWord(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<&FramePayload> {
        match &self.heart {
            Heart::Frame(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<Action> {
        match (&self.heart, self.is_antiform()) {
            (Heart::Frame(p), true) => Some(p.action.clone()),
            _ => None,
        }
    }

    pub fn as_param(&self) -> Option<Rc<crate::action::Param>> {
        match &self.heart {
            Heart::Parameter(p) => Some(p.clone()),
            _ => None,
        }
    }
}


// Structural equality: heart plus lift. Hint flags and bindings do not
// take part.
impl PartialEq for Cell {
    fn eq(&self, other: &Cell) -> bool {
        if self.lift != other.lift {
            return false;
        }
        match (&self.heart, &other.heart) {
            (Heart::Erased, Heart::Erased) => true,
            (Heart::Blank, Heart::Blank) => true,
            (Heart::Space, Heart::Space) => true,
            (Heart::Comma, Heart::Comma) => true,
            (Heart::Keyword(a), Heart::Keyword(b)) => a == b,
            (Heart::Logic(a), Heart::Logic(b)) => a == b,
            (Heart::Integer(a), Heart::Integer(b)) => a == b,
            (Heart::Decimal(a), Heart::Decimal(b)) => a == b,
            (Heart::Rune(a), Heart::Rune(b)) => a == b,
            (Heart::Text(a), Heart::Text(b)) => a == b,
            (Heart::Blob(a), Heart::Blob(b)) => a.bytes() == b.bytes(),
            (Heart::Word(a), Heart::Word(b)) => a == b,
            (Heart::SetWord(a), Heart::SetWord(b)) => a == b,
            (Heart::GetWord(a), Heart::GetWord(b)) => a == b,
            (Heart::Block(a), Heart::Block(b))
            | (Heart::Group(a), Heart::Group(b))
            | (Heart::Fence(a), Heart::Fence(b)) => a.cells() == b.cells(),
            (Heart::Frame(a), Heart::Frame(b)) => {
                Rc::ptr_eq(&a.action, &b.action)
                    && match (&a.varlist, &b.varlist) {
                        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (Heart::Parameter(a), Heart::Parameter(b)) => Rc::ptr_eq(a, b),
            (Heart::Handle(a), Heart::Handle(b)) => Rc::ptr_eq(a, b),
            (Heart::Warning(a), Heart::Warning(b)) => a == b,
            (Heart::Varargs(a), Heart::Varargs(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}


// Readable rendering, used for error "near" context and text extraction.
pub fn form_cell(cell: &Cell) -> String {
    let mut out = String::new();
    form_into(&mut out, cell);
    out
}

pub fn form_into(out: &mut String, cell: &Cell) {
    match cell.lift {
        LIFT_ANTIFORM => {
            if cell.is_readable() {
                out.push('~');
                form_heart(out, &cell.heart);
                out.push('~');
            } else {
                out.push_str("\\\\erased\\\\");
            }
            return;
        }
        LIFT_QUASI => out.push('~'),
        n if n >= LIFT_PLAIN + 2 => {
            for _ in 0..(n - LIFT_PLAIN) / 2 {
                out.push('\'');
            }
        }
        _ => {}
    }
    form_heart(out, &cell.heart);
    if cell.lift == LIFT_QUASI {
        out.push('~');
    }
}

fn form_heart(out: &mut String, heart: &Heart) {
    match heart {
        Heart::Erased => out.push_str("\\\\erased\\\\"),
        Heart::Blank => out.push('_'),
        Heart::Space => out.push(' '),
        Heart::Comma => out.push(','),
        Heart::Keyword(k) => out.push_str(k.spelling()),
        Heart::Logic(v) => out.push_str(if *v { "true" } else { "false" }),
        Heart::Integer(v) => out.push_str(&v.to_string()),
        Heart::Decimal(v) => out.push_str(&v.to_string()),
        Heart::Rune(v) => {
            out.push('#');
            out.push(*v);
        }
        Heart::Text(v) => {
            out.push('"');
            out.push_str(v);
            out.push('"');
        }
        Heart::Blob(v) => {
            out.push_str(&format!("#{{{} bytes}}", v.len()));
        }
        Heart::Word(s) => out.push_str(s.text()),
        Heart::SetWord(s) => {
            out.push_str(s.text());
            out.push(':');
        }
        Heart::GetWord(s) => {
            out.push(':');
            out.push_str(s.text());
        }
        Heart::Block(s) => form_list(out, s, '[', ']'),
        Heart::Group(s) => form_list(out, s, '(', ')'),
        Heart::Fence(s) => form_list(out, s, '{', '}'),
        Heart::Frame(p) => {
            out.push_str("#[frame ");
            match &p.action.label {
                Some(label) => out.push_str(label.text()),
                None => out.push_str("anonymous"),
            }
            out.push(']');
        }
        Heart::Parameter(_) => out.push_str("#[parameter]"),
        Heart::Handle(_) => out.push_str("#[handle]"),
        Heart::Warning(e) => {
            out.push_str("make warning! \"");
            out.push_str(&e.message);
            out.push('"');
        }
        Heart::Varargs(_) => out.push_str("#[varargs]"),
    }
}

fn form_list(out: &mut String, series: &Series, open: char, close: char) {
    out.push(open);
    let cells = series.cells();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        form_into(out, cell);
    }
    out.push(close);
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::flex::Array;
    use pretty_assertions::assert_eq;

    fn blk(items: &[Cell]) -> Cell {
        Cell::block(Series::head(Array::source_from(items.to_vec())))
    }

    #[test]
    fn test_lift_ladder() {
        let v = Cell::integer(3);
        assert_eq!(v.lift, LIFT_PLAIN);
        let lifted = v.lifted();
        assert_eq!(lifted.lift, LIFT_PLAIN + 2);
        assert_eq!(lifted.unlifted().unwrap(), v);

        let null = Cell::null();
        let quasi = null.lifted();
        assert!(quasi.is_quasiform());
        assert_eq!(quasi.unlifted().unwrap(), null);
    }

    #[test]
    fn test_unlift_plain_fails() {
        let err = Cell::integer(1).unlifted().unwrap_err();
        assert_eq!(err.id, ErrorId::InvalidLift);
    }

    #[test]
    fn test_lift_unlift_roundtrip_for_stable_values() {
        let samples = vec![
            Cell::integer(42),
            Cell::text("hi"),
            Cell::logic(false),
            Cell::null(),
            Cell::void(),
            blk(&[Cell::integer(1), Cell::text("nested")]),
        ];
        for v in samples {
            assert!(v.is_stable());
            assert_eq!(v.lifted().unlifted().unwrap(), v);
        }
    }

    #[test]
    fn test_antiform_taxonomy() {
        assert_eq!(Cell::null().antiform_kind(), Some(Anti::Null));
        assert_eq!(Cell::ok().antiform_kind(), Some(Anti::Ok));
        assert_eq!(Cell::void().antiform_kind(), Some(Anti::Void));
        assert_eq!(Cell::ghost().antiform_kind(), Some(Anti::Ghost));
        assert_eq!(
            Cell::pack(vec![Cell::integer(1)]).antiform_kind(),
            Some(Anti::Pack)
        );
        assert_eq!(
            Cell::error(ErrorValue::bare(ErrorId::Overflow)).antiform_kind(),
            Some(Anti::Error)
        );
        assert_eq!(Cell::tripwire("unset!").antiform_kind(), Some(Anti::Tripwire));
    }

    #[test]
    fn test_stability_partition() {
        assert!(Cell::null().is_stable());
        assert!(Cell::ok().is_stable());
        assert!(Cell::void().is_stable());
        assert!(Cell::tripwire("x").is_stable());
        assert!(!Cell::ghost().is_stable());
        assert!(!Cell::pack(vec![]).is_stable());
        assert!(!Cell::error(ErrorValue::bare(ErrorId::Overflow)).is_stable());
    }

    #[test]
    fn test_decay_single_pack_collapses() {
        let pack = Cell::pack(vec![Cell::integer(7)]);
        assert_eq!(pack.decay().unwrap(), Cell::integer(7));
    }

    #[test]
    fn test_decay_empty_pack_is_void() {
        let pack = Cell::pack(vec![]);
        assert_eq!(pack.decay().unwrap(), Cell::void());
    }

    #[test]
    fn test_decay_error_surfaces() {
        let e = Cell::error(ErrorValue::bare(ErrorId::Overflow));
        assert_eq!(e.decay().unwrap_err().id, ErrorId::Overflow);
    }

    #[test]
    fn test_decay_ghost_raises() {
        assert_eq!(Cell::ghost().decay().unwrap_err().id, ErrorId::NeedValue);
    }

    #[test]
    fn test_copy_masks_hints() {
        let mut v = Cell::integer(9);
        v.flags.insert(CellFlag::OutHintUnsurprising);
        v.flags.insert(CellFlag::NewlineBefore);
        let copy = v.copied();
        assert!(copy.flags.contains(CellFlag::NewlineBefore));
        assert!(!copy.flags.contains(CellFlag::OutHintUnsurprising));
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(Cell::logic(true).is_truthy().unwrap(), true);
        assert_eq!(Cell::logic(false).is_truthy().unwrap(), false);
        assert_eq!(Cell::null().is_truthy().unwrap(), false);
        assert_eq!(Cell::integer(0).is_truthy().unwrap(), true);
        assert!(Cell::void().is_truthy().is_err());
    }

    #[test]
    fn test_erased_cells_are_unreadable() {
        let mut v = Cell::integer(3);
        v.erase();
        assert!(!v.is_readable());
        assert!(!v.is_stable());
    }
}
