// The embedding surface.
//
// Interp bundles every thread-global the evaluator core relies on: the
// level stack, data stack, mold buffer, guarded stubs, manual
// allocations, signal flags, the symbol table, and the user context.
// One Interp belongs to one thread; it is !Send by construction.
//
// Variadic runners take a splice of text chunks, value handles, and
// one-shot instructions, build a feed, and drive the trampoline with
// the top level as root. Every value handle handed out is attached to
// the current top level and released when that level drops, unless the
// caller manages, unmanages, or releases it first.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::action::{ActionDef, HostFn, InfixMode, KeyList, Param};
use crate::config::Tunables;
use crate::env::Context;
use crate::error::{ErrorId, ErrorValue, Raised};
use crate::feed::{Feed, Splice};
use crate::flex::{Array, Flavor, FlexFlag, ManualFlex};
use crate::level::{Level, LevelFlag, LevelKind, OutDest};
use crate::natives;
use crate::symbol::SymbolTable;
use crate::trampoline::{SigFlags, Thrown};
use crate::value::{
    any_stable, form_into, Cell, HandleStub, Heart, Series,
};


// A value handle held by the host. Releasing renders the underlying
// cell unreadable; releasing twice is a no-op.
#[derive(Clone)]
pub struct ApiHandle(Rc<RefCell<HandleSlot>>);

struct HandleSlot {
    cell: Cell,
    released: bool,
}

impl ApiHandle {
    fn new(cell: Cell) -> ApiHandle {
        ApiHandle(Rc::new(RefCell::new(HandleSlot { cell, released: false })))
    }

    pub fn cell(&self) -> Cell {
        self.0.borrow().cell.clone()
    }

    pub fn is_released(&self) -> bool {
        self.0.borrow().released
    }

    pub fn release(&self) {
        let mut slot = self.0.borrow_mut();
        if !slot.released {
            slot.released = true;
            slot.cell.erase();
        }
    }

    fn same(&self, other: &ApiHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ApiHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let slot = self.0.borrow();
        if slot.released {
            write!(f, "ApiHandle(released)")
        } else {
            write!(f, "ApiHandle({:?})", slot.cell)
        }
    }
}


// One element of a variadic runner call.
pub enum Item<'a> {
    Text(&'a str),
    Val(&'a ApiHandle),
    // Splice the handle's value with one more quote level.
    Quote(&'a ApiHandle),
    // Splice the handle's value with one quote level removed.
    Unquote(&'a ApiHandle),
    // Splice the value, then release the handle when the feed is done.
    Releasing(ApiHandle),
    // Splice a block's elements inline.
    Inline(&'a ApiHandle),
    // Splice a frame as an invokable action.
    Run(&'a ApiHandle),
}


pub(crate) enum ManualEntry {
    Flex(ManualFlex),
    Raw(usize),
}

impl ManualEntry {
    pub(crate) fn raw_index(&self) -> Option<usize> {
        match self {
            ManualEntry::Raw(index) => Some(*index),
            ManualEntry::Flex(_) => None,
        }
    }
}


pub struct Interp {
    pub(crate) symbols: SymbolTable,
    pub(crate) levels: Vec<Rc<RefCell<Level>>>,
    pub(crate) kept: Vec<Rc<RefCell<Level>>>,
    pub(crate) data_stack: Vec<Cell>,
    pub(crate) mold: String,
    pub(crate) guarded: Vec<Rc<Array>>,
    pub(crate) manual: Vec<ManualEntry>,
    pub(crate) indefinite: Vec<ApiHandle>,
    pub(crate) thrown: Option<Thrown>,
    pub(crate) signals: SigFlags,
    pub(crate) countdown: i64,
    pub(crate) tunables: Tunables,
    pub(crate) tick: u64,
    pub(crate) serial_gen: u64,
    pub(crate) recycles: u64,
    pub(crate) registry: Vec<Option<crate::mem::RawAlloc>>,
    user: Rc<Context>,
}


fn host_panic(err: ErrorValue) -> ! {
    panic!("reverie: {}", err)
}


impl Interp {
    // -- lifecycle

    pub fn startup(tunables: Tunables) -> Interp {
        let mut ix = Interp {
            symbols: SymbolTable::new(),
            levels: Vec::new(),
            kept: Vec::new(),
            data_stack: Vec::new(),
            mold: String::with_capacity(tunables.mold_reserve),
            guarded: Vec::new(),
            manual: Vec::new(),
            indefinite: Vec::new(),
            thrown: None,
            signals: BitFlags::empty(),
            countdown: tunables.eval_period as i64,
            tunables,
            tick: 0,
            serial_gen: 0,
            recycles: 0,
            registry: Vec::new(),
            user: Context::module(),
        };
        let feed = ix.empty_feed();
        let sentinel = ix.push_level(Level::sentinel(feed));
        sentinel.borrow_mut().flags.insert(LevelFlag::Uninterruptible);
        if let Err(err) = natives::boot(&mut ix) {
            host_panic(err);
        }
        sentinel.borrow_mut().flags.remove(LevelFlag::Uninterruptible);
        log::info!("interpreter started, {} symbols interned", ix.symbols.len());
        ix
    }

    pub fn shutdown(mut self, clean: bool) -> Raised<()> {
        while self.levels.len() > 1 {
            self.rollback_top_level();
        }
        self.rollback_top_level();
        if clean {
            let leaked_allocs = self.registry.iter().filter(|e| e.is_some()).count();
            if !self.manual.is_empty() || leaked_allocs > 0 || !self.kept.is_empty() {
                return Err(ErrorValue::new(
                    ErrorId::Internal,
                    "unreclaimed resources at shutdown",
                ));
            }
        }
        log::info!("interpreter shut down");
        Ok(())
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn recycle_count(&self) -> u64 {
        self.recycles
    }

    pub fn user_context(&self) -> Rc<Context> {
        self.user.clone()
    }

    pub fn empty_feed(&self) -> Rc<Feed> {
        Feed::array(
            Series::head(Array::source_from(Vec::new())),
            Some(self.user.clone()),
        )
    }

    // -- feed access (the symbol table rides along for scanning)

    pub(crate) fn feed_current(&mut self, feed: &Rc<Feed>) -> Raised<Option<Cell>> {
        feed.current(&mut self.symbols)
    }

    pub(crate) fn feed_advance(&mut self, feed: &Rc<Feed>) -> Raised<()> {
        feed.advance(&mut self.symbols)
    }

    pub(crate) fn feed_take(&mut self, feed: &Rc<Feed>) -> Raised<Option<Cell>> {
        feed.take(&mut self.symbols)
    }

    pub(crate) fn feed_take_verbatim(
        &mut self,
        feed: &Rc<Feed>,
    ) -> Raised<Option<Cell>> {
        feed.take_verbatim(&mut self.symbols)
    }

    pub(crate) fn feed_at_end(&mut self, feed: &Rc<Feed>) -> Raised<bool> {
        feed.is_at_end(&mut self.symbols)
    }

    // -- handle lifecycle

    pub(crate) fn attach(&mut self, cell: Cell) -> ApiHandle {
        let handle = ApiHandle::new(cell);
        self.top().borrow_mut().handles.push(handle.clone());
        handle
    }

    // Tie the handle to the parent of the level that owns it now.
    pub fn manage(&mut self, handle: &ApiHandle) {
        let depth = self.levels.len();
        for i in (0..depth).rev() {
            let owned = {
                let level = self.levels[i].borrow();
                level.handles.iter().any(|h| h.same(handle))
            };
            if owned {
                self.levels[i]
                    .borrow_mut()
                    .handles
                    .retain(|h| !h.same(handle));
                if i > 0 {
                    self.levels[i - 1].borrow_mut().handles.push(handle.clone());
                } else {
                    self.indefinite.push(handle.clone());
                }
                return;
            }
        }
    }

    // Detach entirely: the handle lives until released explicitly.
    pub fn unmanage(&mut self, handle: &ApiHandle) {
        for level in &self.levels {
            level.borrow_mut().handles.retain(|h| !h.same(handle));
        }
        self.indefinite.push(handle.clone());
    }

    pub fn release(&mut self, handle: &ApiHandle) {
        handle.release();
        self.indefinite.retain(|h| !h.same(handle));
    }

    // -- manual stubs

    pub fn manual_array(&mut self, flavor: Flavor) -> Rc<Array> {
        let array = Array::new(flavor);
        self.manual
            .push(ManualEntry::Flex(ManualFlex::Cells(array.clone())));
        array
    }

    pub fn manage_array(&mut self, array: &Rc<Array>) {
        array.set_flag(FlexFlag::Managed);
        self.manual.retain(|entry| match entry {
            ManualEntry::Flex(ManualFlex::Cells(a)) => !Rc::ptr_eq(a, array),
            _ => true,
        });
    }

    // -- value construction

    pub fn null_value(&mut self) -> ApiHandle {
        self.attach(Cell::null())
    }

    pub fn tripwire_value(&mut self, note: &str) -> ApiHandle {
        self.attach(Cell::tripwire(note))
    }

    pub fn space_value(&mut self) -> ApiHandle {
        self.attach(Cell::space())
    }

    pub fn blank_value(&mut self) -> ApiHandle {
        self.attach(Cell::blank())
    }

    pub fn logic_value(&mut self, v: bool) -> ApiHandle {
        self.attach(Cell::logic(v))
    }

    pub fn char_value(&mut self, v: char) -> ApiHandle {
        self.attach(Cell::rune(v))
    }

    pub fn integer_value(&mut self, v: i64) -> ApiHandle {
        self.attach(Cell::integer(v))
    }

    pub fn decimal_value(&mut self, v: f64) -> ApiHandle {
        self.attach(Cell::decimal(v))
    }

    pub fn blob_value(&mut self, bytes: &[u8]) -> ApiHandle {
        self.attach(Cell::blob(crate::flex::Binary::from_vec(bytes.to_vec())))
    }

    pub fn text_value(&mut self, text: &str) -> ApiHandle {
        self.attach(Cell::text(text))
    }

    pub fn handle_value(
        &mut self,
        bytes: Vec<u8>,
        cleaner: Option<fn(&mut Vec<u8>)>,
    ) -> ApiHandle {
        self.attach(Cell::handle(Rc::new(HandleStub {
            bytes: RefCell::new(bytes),
            cleaner,
        })))
    }

    // -- variadic feeds

    pub(crate) fn make_feed(&mut self, items: &[Item]) -> Raised<Rc<Feed>> {
        let mut splices = Vec::new();
        let mut releasing = Vec::new();
        for item in items {
            match item {
                Item::Text(text) => {
                    splices.push(Splice::Text(String::from(*text)));
                }
                Item::Val(handle) => {
                    splices.push(Splice::Cell(handle.cell()));
                }
                Item::Quote(handle) => {
                    splices.push(Splice::Cell(handle.cell().lifted()));
                }
                Item::Unquote(handle) => {
                    splices.push(Splice::Cell(handle.cell().unlifted()?));
                }
                Item::Releasing(handle) => {
                    splices.push(Splice::Cell(handle.cell()));
                    releasing.push(handle.clone());
                }
                Item::Inline(handle) => {
                    let cell = handle.cell();
                    let series = cell
                        .as_series()
                        .ok_or_else(|| ErrorValue::bare(ErrorId::TypeCheck))?;
                    for inner in series.cells() {
                        splices.push(Splice::Cell(inner));
                    }
                }
                Item::Run(handle) => {
                    let cell = handle.cell();
                    let action = crate::action::to_action(&cell)?;
                    splices.push(Splice::Cell(Cell::action(action)));
                }
            }
        }
        Feed::variadic(splices, releasing, Some(self.user.clone()))
    }

    // -- runners

    pub(crate) fn run_items(&mut self, items: &[Item]) -> Raised<Cell> {
        let feed = self.make_feed(items)?;
        self.run_root(Level::evaluator(feed, OutDest::Root))
    }

    // Convenience for a single text chunk.
    pub fn eval_text(&mut self, text: &str) -> Raised<Cell> {
        self.run_items(&[Item::Text(text)])
    }

    // Evaluate and return a stable value handle; null comes back as
    // None. Raised errors panic the host.
    pub fn value(&mut self, items: &[Item]) -> Option<ApiHandle> {
        match self.run_items(items).and_then(|v| v.decay()) {
            Ok(v) => {
                if v.is_null() {
                    None
                } else {
                    Some(self.attach(v))
                }
            }
            Err(err) => host_panic(err),
        }
    }

    // Evaluate and lift; the result handle is never null.
    pub fn lift_value(&mut self, items: &[Item]) -> ApiHandle {
        match self.run_items(items) {
            Ok(v) => {
                let lifted = v.lifted();
                self.attach(lifted)
            }
            Err(err) => host_panic(err),
        }
    }

    // Evaluate; a raised error comes back as a plain warning value, a
    // success comes back lifted.
    pub fn enrescue(&mut self, items: &[Item]) -> ApiHandle {
        match self.run_items(items) {
            Ok(v) => {
                let lifted = v.lifted();
                self.attach(lifted)
            }
            Err(err) => self.attach(Cell::warning(err)),
        }
    }

    // Split error from result; Ok carries the lifted success.
    pub fn rescue2(&mut self, items: &[Item]) -> Result<ApiHandle, ApiHandle> {
        match self.run_items(items) {
            Ok(v) => {
                let lifted = v.lifted();
                Ok(self.attach(lifted))
            }
            Err(err) => Err(self.attach(Cell::warning(err))),
        }
    }

    // Like rescue2 without lifting the success.
    pub fn recover(&mut self, items: &[Item]) -> Result<Option<ApiHandle>, ApiHandle> {
        match self.run_items(items).and_then(|v| v.decay()) {
            Ok(v) => {
                if v.is_null() {
                    Ok(None)
                } else {
                    Ok(Some(self.attach(v)))
                }
            }
            Err(err) => Err(self.attach(Cell::warning(err))),
        }
    }

    // Evaluate for effect only.
    pub fn elide(&mut self, items: &[Item]) {
        if let Err(err) = self.run_items(items) {
            host_panic(err);
        }
    }

    // Evaluate something expected to divert control.
    pub fn jumps(&mut self, items: &[Item]) {
        match self.run_items(items) {
            Ok(_) => host_panic(ErrorValue::new(
                ErrorId::Internal,
                "evaluation was expected to divert control",
            )),
            Err(_) => {}
        }
    }

    pub fn did(&mut self, items: &[Item]) -> bool {
        match self.run_items(items).and_then(|v| v.decay()) {
            Ok(v) => match v.is_truthy() {
                Ok(t) => t,
                Err(err) => host_panic(err),
            },
            Err(err) => host_panic(err),
        }
    }

    pub fn didnt(&mut self, items: &[Item]) -> bool {
        !self.did(items)
    }

    // -- extraction

    fn extract(&mut self, items: &[Item]) -> Cell {
        match self.run_items(items).and_then(|v| v.decay()) {
            Ok(v) => v,
            Err(err) => host_panic(err),
        }
    }

    pub fn unbox_integer(&mut self, items: &[Item]) -> i64 {
        match self.extract(items).as_integer() {
            Some(v) => v,
            None => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    pub fn unbox_logic(&mut self, items: &[Item]) -> bool {
        match self.extract(items).as_logic() {
            Some(v) => v,
            None => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    pub fn unbox_decimal(&mut self, items: &[Item]) -> f64 {
        match self.extract(items).as_decimal() {
            Some(v) => v,
            None => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    pub fn unbox_char(&mut self, items: &[Item]) -> char {
        match self.extract(items).as_rune() {
            Some(v) => v,
            None => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    pub fn unbox_handle_bytes(&mut self, items: &[Item]) -> Vec<u8> {
        match self.extract(items).heart {
            Heart::Handle(stub) => stub.bytes.borrow().clone(),
            _ => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    pub fn spell(&mut self, items: &[Item]) -> String {
        match self.spell_opt(items) {
            Some(text) => text,
            None => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    pub fn spell_opt(&mut self, items: &[Item]) -> Option<String> {
        let v = self.extract(items);
        if v.is_null() {
            return None;
        }
        match &v.heart {
            Heart::Text(text) => Some((**text).clone()),
            Heart::Word(sym) | Heart::SetWord(sym) | Heart::GetWord(sym) => {
                Some(String::from(sym.text()))
            }
            Heart::Rune(c) => Some(c.to_string()),
            _ => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    pub fn bytes_opt(&mut self, items: &[Item]) -> Option<Vec<u8>> {
        let v = self.extract(items);
        if v.is_null() {
            return None;
        }
        match &v.heart {
            Heart::Blob(bin) => Some(bin.bytes()),
            Heart::Text(text) => Some(text.as_bytes().to_vec()),
            _ => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    pub fn bytes(&mut self, items: &[Item]) -> Vec<u8> {
        match self.bytes_opt(items) {
            Some(bytes) => bytes,
            None => host_panic(ErrorValue::bare(ErrorId::TypeCheck)),
        }
    }

    // Render a value through the mold buffer.
    pub fn mold_value(&mut self, cell: &Cell) -> String {
        let base = self.mold.len();
        form_into(&mut self.mold, cell);
        let text = self.mold[base..].to_string();
        self.mold.truncate(base);
        text
    }

    // -- host function registration

    pub fn function(
        &mut self,
        name: &str,
        spec: &str,
        body: impl Fn(&mut Interp) -> crate::trampoline::Bounce + 'static,
    ) -> Raised<ApiHandle> {
        let action = self.build_host_action(name, spec, Rc::new(body))?;
        let sym = self.symbols.intern(name);
        self.user.define(&sym, Cell::action(action.clone()))?;
        Ok(self.attach(Cell::action(action)))
    }

    fn build_host_action(
        &mut self,
        name: &str,
        spec: &str,
        hostfn: HostFn,
    ) -> Raised<crate::action::Action> {
        let mut cells = crate::scan::scan_chunk(&mut self.symbols, spec)?;
        if cells.len() == 1 {
            if let Some(series) = cells[0].as_series() {
                cells = series.cells();
            }
        }
        let mut params = Vec::new();
        for cell in &cells {
            match &cell.heart {
                Heart::Word(sym) => {
                    params.push(Param::normal(sym.clone(), any_stable()));
                }
                _ => {
                    return Err(ErrorValue::new(
                        ErrorId::TypeCheck,
                        "host function specs list argument words",
                    ));
                }
            }
        }
        let sym = self.symbols.intern(name);
        let keylist = Rc::new(KeyList {
            keys: params.iter().map(|p| p.name.clone()).collect(),
        });
        let cells = params.into_iter().map(Cell::parameter).collect();
        let paramlist = Array::with_flavor(Flavor::ParamList, cells);
        Ok(Rc::new(ActionDef {
            dispatcher: host_dispatcher,
            keylist,
            paramlist,
            partials: None,
            details: Vec::new(),
            hostfn: Some(hostfn),
            infix: InfixMode::Prefix,
            label: Some(sym),
            returns: BitFlags::empty(),
        }))
    }

    // Read an argument of the running host function's frame by name.
    pub fn frame_field(&self, name: &str) -> Option<Cell> {
        let top = self.top();
        let level = top.borrow();
        match &level.kind {
            LevelKind::Action(state) => state
                .varlist
                .keylist()
                .index_of_text(name)
                .map(|i| state.varlist.slot(i)),
            _ => None,
        }
    }

    // -- extension collation

    pub fn load_collated(&mut self, collator: &Collator) -> Raised<Rc<Context>> {
        let module = Context::module_chained(&self.user);
        for (name, spec, hostfn) in &collator.natives {
            let action = self.build_host_action(name, spec, hostfn.clone())?;
            let sym = self.symbols.intern(name);
            module.define(&sym, Cell::action(action))?;
        }
        let cells = crate::scan::scan_chunk(&mut self.symbols, &collator.script)?;
        let feed = Feed::array(
            Series::head(Array::source_from(cells)),
            Some(module.clone()),
        );
        self.run_root(Level::evaluator(feed, OutDest::Root))?;
        Ok(module)
    }
}


fn host_dispatcher(ix: &mut Interp) -> crate::trampoline::Bounce {
    let hostfn = {
        let top = ix.top();
        let mut level = top.borrow_mut();
        level.action_state().action.hostfn.clone()
    };
    match hostfn {
        Some(hostfn) => hostfn(ix),
        None => crate::trampoline::Bounce::Panic(ErrorValue::bare(ErrorId::Internal)),
    }
}


// A bundle of script source plus named host natives that the loader
// turns into a module context.
pub struct Collator {
    pub script: String,
    pub natives: Vec<(String, String, HostFn)>,
}

impl Collator {
    pub fn new(script: &str) -> Collator {
        Collator { script: String::from(script), natives: Vec::new() }
    }

    pub fn with_native(
        mut self,
        name: &str,
        spec: &str,
        hostfn: impl Fn(&mut Interp) -> crate::trampoline::Bounce + 'static,
    ) -> Collator {
        self.natives
            .push((String::from(name), String::from(spec), Rc::new(hostfn)));
        self
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorId;
    use crate::specialize::{first_unspecialized_param, last_unspecialized_param};
    use crate::trampoline::{Bounce, TrampolineOut};
    use crate::value::Anti;
    use pretty_assertions::assert_eq;

    fn interp() -> Interp {
        Interp::startup(Tunables::default())
    }

    fn block_cells(cell: &Cell) -> Vec<Cell> {
        cell.as_series().expect("block").cells()
    }

    #[test]
    fn test_value_and_unbox() {
        let mut ix = interp();
        let v = ix.value(&[Item::Text("1 + 2")]).unwrap();
        assert_eq!(v.cell(), Cell::integer(3));
        assert_eq!(ix.unbox_integer(&[Item::Text("2 * 4")]), 8);
        assert_eq!(ix.unbox_logic(&[Item::Text("1 < 2")]), true);
        assert_eq!(ix.spell(&[Item::Text("\"hello\"")]), "hello");
    }

    #[test]
    fn test_value_splices_handles() {
        let mut ix = interp();
        let seven = ix.integer_value(7);
        let v = ix
            .value(&[Item::Text("1 +"), Item::Val(&seven)])
            .unwrap();
        assert_eq!(v.cell(), Cell::integer(8));
    }

    #[test]
    fn test_null_result_is_none() {
        let mut ix = interp();
        assert!(ix.value(&[Item::Text("if 2 < 1 [5]")]).is_none());
    }

    #[test]
    fn test_lift_is_never_null() {
        let mut ix = interp();
        let v = ix.lift_value(&[Item::Text("if 2 < 1 [5]")]);
        assert!(v.cell().is_quasiform());
    }

    #[test]
    fn test_did_and_didnt() {
        let mut ix = interp();
        assert!(ix.did(&[Item::Text("1 < 2")]));
        assert!(ix.didnt(&[Item::Text("2 < 1")]));
    }

    // Seed scenario: abrupt panic rescue. Divide-by-zero raises a host
    // panic; enrescue returns it as a plain error value and the
    // interpreter keeps working.
    #[test]
    fn test_enrescue_of_abrupt_panic() {
        let mut ix = interp();
        let v = ix.enrescue(&[Item::Text("1 / 0")]);
        match &v.cell().heart {
            Heart::Warning(err) => assert_eq!(err.id, ErrorId::AbruptPanic),
            other => panic!("expected warning, got {:?}", other),
        }
        assert!(!v.cell().is_antiform());
        assert_eq!(ix.level_depth(), 1);
        assert_eq!(ix.unbox_integer(&[Item::Text("40 + 2")]), 42);
    }

    #[test]
    fn test_rescue2_and_recover_split() {
        let mut ix = interp();
        assert!(ix.rescue2(&[Item::Text("1 + 1")]).is_ok());
        assert!(ix.rescue2(&[Item::Text("nonesuch")]).is_err());
        let ok = ix.recover(&[Item::Text("1 + 1")]).unwrap().unwrap();
        assert_eq!(ok.cell(), Cell::integer(2));
    }

    #[test]
    fn test_release_renders_unreadable() {
        let mut ix = interp();
        let v = ix.integer_value(42);
        ix.release(&v);
        assert!(v.is_released());
        assert!(!v.cell().is_readable());
        // Releasing again is a no-op.
        ix.release(&v);
        assert!(v.is_released());
    }

    #[test]
    fn test_value_constructors() {
        let mut ix = interp();
        assert!(ix.null_value().cell().is_null());
        assert!(ix.tripwire_value("pending").cell().is_tripwire());
        assert_eq!(ix.space_value().cell(), Cell::space());
        assert_eq!(ix.blank_value().cell(), Cell::blank());
        assert_eq!(ix.logic_value(true).cell(), Cell::logic(true));
        assert_eq!(ix.char_value('q').cell(), Cell::rune('q'));
        assert_eq!(ix.integer_value(7).cell(), Cell::integer(7));
        assert_eq!(ix.decimal_value(2.5).cell(), Cell::decimal(2.5));
        assert_eq!(ix.text_value("hi").cell(), Cell::text("hi"));
        let blob = ix.blob_value(&[1, 2, 3]);
        match &blob.cell().heart {
            Heart::Blob(bin) => assert_eq!(bin.bytes(), vec![1, 2, 3]),
            other => panic!("expected blob, got {:?}", other),
        }
        let handle = ix.handle_value(vec![9], None);
        assert!(matches!(handle.cell().heart, Heart::Handle(_)));
    }

    #[test]
    fn test_unbox_extractors_roundtrip() {
        let mut ix = interp();
        let d = ix.decimal_value(1.5);
        assert_eq!(ix.unbox_decimal(&[Item::Val(&d)]), 1.5);
        let c = ix.char_value('z');
        assert_eq!(ix.unbox_char(&[Item::Val(&c)]), 'z');
        let h = ix.handle_value(vec![9, 9], None);
        assert_eq!(ix.unbox_handle_bytes(&[Item::Val(&h)]), vec![9, 9]);
        let b = ix.blob_value(&[4, 5]);
        assert_eq!(ix.bytes(&[Item::Val(&b)]), vec![4, 5]);
        assert_eq!(ix.bytes_opt(&[Item::Text("if 2 < 1 [5]")]), None);
        let t = ix.text_value("word");
        assert_eq!(ix.spell(&[Item::Val(&t)]), "word");
    }

    thread_local! {
        static CLEANED: std::cell::Cell<bool> = std::cell::Cell::new(false);
    }

    fn wipe(bytes: &mut Vec<u8>) {
        bytes.clear();
        CLEANED.with(|c| c.set(true));
    }

    #[test]
    fn test_handle_cleaner_runs_on_release() {
        let mut ix = interp();
        let handle = ix.handle_value(vec![1, 2], Some(wipe));
        CLEANED.with(|c| c.set(false));
        ix.release(&handle);
        assert!(CLEANED.with(|c| c.get()));
    }

    #[test]
    fn test_elide_discards_the_result() {
        let mut ix = interp();
        ix.elide(&[Item::Text("x: 41 x + 1")]);
        assert_eq!(ix.unbox_integer(&[Item::Text("x")]), 41);
    }

    #[test]
    fn test_jumps_accepts_a_divert() {
        let mut ix = interp();
        ix.eval_text("x: 0").unwrap();
        ix.request_halt();
        ix.jumps(&[Item::Text("loop 100000 [x: x + 1]")]);
        assert_eq!(ix.level_depth(), 1);
    }

    #[test]
    fn test_jumps_panics_on_normal_return() {
        let mut ix = interp();
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ix.jumps(&[Item::Text("1 + 1")]);
        }));
        assert!(panicked.is_err());
    }

    #[test]
    fn test_inline_instruction_splices_elements() {
        let mut ix = interp();
        let block = ix.value(&[Item::Text("'[1 + 2]")]).unwrap();
        assert_eq!(ix.unbox_integer(&[Item::Inline(&block)]), 3);
    }

    #[test]
    fn test_run_instruction_invokes_action() {
        let mut ix = interp();
        let add = ix.value(&[Item::Text(":add")]).unwrap();
        assert_eq!(
            ix.unbox_integer(&[Item::Run(&add), Item::Text("20 22")]),
            42
        );
    }

    #[test]
    fn test_mold_value_renders_through_buffer() {
        let mut ix = interp();
        let v = ix.eval_text("'[1 \"two\" three]").unwrap();
        assert_eq!(ix.mold_value(&v), "[1 \"two\" three]");
        assert_eq!(ix.mold.len(), 0);
    }

    #[test]
    fn test_manual_arrays_track_until_managed() {
        let mut ix = interp();
        let array = ix.manual_array(Flavor::Source);
        array.push(Cell::integer(1)).unwrap();
        ix.manage_array(&array);
        assert!(array.has_flag(FlexFlag::Managed));
        ix.shutdown(true).unwrap();

        // A still-manual stub blocks a clean shutdown.
        let mut ix = interp();
        ix.manual_array(Flavor::Source);
        assert!(ix.shutdown(true).is_err());
    }

    #[test]
    fn test_manage_and_unmanage_move_ownership() {
        let mut ix = interp();
        let v = ix.integer_value(1);
        ix.manage(&v);
        ix.unmanage(&v);
        assert!(!v.is_released());
        ix.release(&v);
        assert!(v.is_released());
    }

    #[test]
    fn test_releasing_instruction_runs_once() {
        let mut ix = interp();
        let v = ix.integer_value(5);
        let out = ix
            .value(&[Item::Text("1 +"), Item::Releasing(v.clone())])
            .unwrap();
        assert_eq!(out.cell(), Cell::integer(6));
        assert!(v.is_released());
    }

    #[test]
    fn test_quote_instruction() {
        let mut ix = interp();
        let five = ix.integer_value(5);
        let v = ix.value(&[Item::Quote(&five)]).unwrap();
        // The quote protected the value from evaluation; it comes back
        // with the quote dropped by the stepper.
        assert_eq!(v.cell(), Cell::integer(5));
    }

    #[test]
    fn test_split_token_across_chunks_is_refused() {
        let mut ix = interp();
        let err = ix.run_items(&[Item::Text("1 + fo"), Item::Text("o")]).unwrap_err();
        assert_eq!(err.id, ErrorId::ScanSplitToken);
    }

    // Seed scenario: deep recursion must not grow the host stack. The
    // thread gets 1 MiB; the recursion is 5000 deep.
    #[test]
    fn test_stackless_deep_recursion() {
        let worker = std::thread::Builder::new()
            .stack_size(1 << 20)
            .spawn(|| {
                let mut ix = Interp::startup(Tunables::default());
                let out = ix
                    .eval_text(
                        "sum: func [n] [either n = 0 [0] [n + sum (n - 1)]] sum 5000",
                    )
                    .unwrap();
                assert_eq!(out, Cell::integer(12502500));
            })
            .expect("spawn worker");
        worker.join().expect("deep recursion overflowed the host stack");
    }

    // Seed scenario: specialize then apply.
    #[test]
    fn test_specialize_then_apply() {
        let mut ix = interp();
        let append = ix.eval_text(":append").unwrap();
        let def = ix.eval_text("'[dup: 3]").unwrap();
        let ap = ix.specialize(&append, Some(&def), &[]).unwrap();

        let first = first_unspecialized_param(&crate::action::to_action(&ap).unwrap())
            .expect("has open params");
        assert_eq!(first.name.text(), "series");

        let args = ix.eval_text("'[[1 2 3] 9]").unwrap();
        let out = ix.apply(&ap, &args, false).unwrap();
        assert_eq!(
            block_cells(&out),
            vec![
                Cell::integer(1),
                Cell::integer(2),
                Cell::integer(3),
                Cell::integer(9),
                Cell::integer(9),
                Cell::integer(9)
            ]
        );
    }

    // Seed scenario: partial refinement ordering. With dup at higher
    // priority the duplication happens before the bound is applied.
    #[test]
    fn test_partial_refinement_ordering() {
        let mut ix = interp();
        let append = ix.eval_text(":append").unwrap();
        let dup = ix.symbols.intern("dup");
        let part = ix.symbols.intern("part");

        let apd = ix
            .specialize(&append, None, &[dup.clone(), part.clone()])
            .unwrap();
        let args = ix.eval_text("'[[1 2 3] 9 part: 2 dup: 2]").unwrap();
        let out = ix.apply(&apd, &args, false).unwrap();
        assert_eq!(block_cells(&out), vec![Cell::integer(1), Cell::integer(2)]);

        // Reversed priority: the bound applies first, then dup appends
        // one more copy past it.
        let apd2 = ix.specialize(&append, None, &[part, dup]).unwrap();
        let args2 = ix.eval_text("'[[1 2 3] 9 part: 2 dup: 2]").unwrap();
        let out2 = ix.apply(&apd2, &args2, false).unwrap();
        assert_eq!(
            block_cells(&out2),
            vec![Cell::integer(1), Cell::integer(2), Cell::integer(9)]
        );
    }

    #[test]
    fn test_param_order_queries_walk_effective_order() {
        let mut ix = interp();
        let append = ix.eval_text(":append").unwrap();
        let def = ix.eval_text("'[dup: 3]").unwrap();
        let ap = ix.specialize(&append, Some(&def), &[]).unwrap();
        let action = crate::action::to_action(&ap).unwrap();
        // Open slots in effective order: series, value, part.
        assert_eq!(
            first_unspecialized_param(&action).unwrap().name.text(),
            "series"
        );
        assert_eq!(
            last_unspecialized_param(&action).unwrap().name.text(),
            "part"
        );

        // With every slot filled, both queries come up empty.
        let add = ix.eval_text(":add").unwrap();
        let def = ix.eval_text("'[a: 1 b: 2]").unwrap();
        let filled = ix.specialize(&add, Some(&def), &[]).unwrap();
        let action = crate::action::to_action(&filled).unwrap();
        assert!(first_unspecialized_param(&action).is_none());
        assert!(last_unspecialized_param(&action).is_none());
    }

    #[test]
    fn test_apply_strict_rejects_extras() {
        let mut ix = interp();
        let add = ix.eval_text(":add").unwrap();
        let args = ix.eval_text("'[1 2 3]").unwrap();
        let err = ix.apply(&add, &args, true).unwrap_err();
        assert_eq!(err.id, ErrorId::ApplyTooMany);

        // Relaxed mode evaluates and discards the extras.
        let args = ix.eval_text("'[1 2 3]").unwrap();
        let out = ix.apply(&add, &args, false).unwrap();
        assert_eq!(out, Cell::integer(3));
    }

    #[test]
    fn test_apply_fills_refinements_positionally() {
        let mut ix = interp();
        let append = ix.eval_text(":append").unwrap();
        // Slots in effective order: series, value, dup, part.
        let args = ix.eval_text("'[[1 2] 3 2 4]").unwrap();
        let out = ix.apply(&append, &args, false).unwrap();
        assert_eq!(
            block_cells(&out),
            vec![
                Cell::integer(1),
                Cell::integer(2),
                Cell::integer(3),
                Cell::integer(3)
            ]
        );
    }

    #[test]
    fn test_specializing_infix_operand_demotes_to_prefix() {
        let mut ix = interp();
        let plus = ix.eval_text(":+").unwrap();
        let def = ix.eval_text("'[a: 10]").unwrap();
        let add10 = ix.specialize(&plus, Some(&def), &[]).unwrap();
        let action = crate::action::to_action(&add10).unwrap();
        assert_eq!(action.infix, InfixMode::Prefix);

        // Empty specialization keeps infix mode and behavior.
        let same = ix.specialize(&plus, None, &[]).unwrap();
        assert_eq!(crate::action::to_action(&same).unwrap().infix, InfixMode::Infix);
    }

    #[test]
    fn test_empty_specialization_behaves_like_base() {
        let mut ix = interp();
        let append = ix.eval_text(":append").unwrap();
        let same = ix.specialize(&append, None, &[]).unwrap();
        let args = ix.eval_text("'[[1 2] 7]").unwrap();
        let out = ix.apply(&same, &args, false).unwrap();
        assert_eq!(
            block_cells(&out),
            vec![Cell::integer(1), Cell::integer(2), Cell::integer(7)]
        );
    }

    // Seed scenario: interruptibility. An uninterruptible level defers
    // the halt; an interruptible one turns it into a throw.
    #[test]
    fn test_halt_deferred_while_uninterruptible() {
        let mut ix = interp();
        ix.eval_text("x: 0").unwrap();
        let feed = ix.make_feed(&[Item::Text("loop 500 [x: x + 1] x")]).unwrap();
        let mut level = Level::evaluator(feed, OutDest::Root);
        level.flags.insert(LevelFlag::Uninterruptible);
        ix.request_halt();
        let out = ix.run_root(level).unwrap();
        assert_eq!(out, Cell::integer(500));
        // The signal stayed pending the whole time.
        assert!(ix.take_halt_request());
    }

    #[test]
    fn test_halt_interrupts_interruptible_loop() {
        let mut ix = interp();
        ix.eval_text("x: 0").unwrap();
        ix.request_halt();
        let err = ix.eval_text("loop 100000 [x: x + 1] x").unwrap_err();
        assert_eq!(err.id, ErrorId::Halted);
        assert!(!ix.take_halt_request());
        // The halted loop left nothing above the sentinel.
        assert_eq!(ix.level_depth(), 1);
    }

    #[test]
    fn test_trampoline_reports_thrown_at_root() {
        let mut ix = interp();
        ix.eval_text("x: 0").unwrap();
        let feed = ix.make_feed(&[Item::Text("loop 100000 [x: x + 1]")]).unwrap();
        ix.push_level(Level::evaluator(feed, OutDest::Root));
        ix.request_halt();
        let out = ix.trampoline_with_top_as_root();
        assert_eq!(out, TrampolineOut::Thrown);
        assert!(ix.thrown.is_some());
        ix.thrown = None;
        ix.rollback_top_level();
    }

    #[test]
    fn test_host_function_registration() {
        let mut ix = interp();
        ix.function("triple", "[n]", |ix| {
            let n = ix.frame_field("n").and_then(|c| c.as_integer());
            match n {
                Some(n) => {
                    ix.top().borrow_mut().out = Cell::integer(n * 3);
                    Bounce::Out
                }
                None => Bounce::Panic(ErrorValue::bare(ErrorId::TypeCheck)),
            }
        })
        .unwrap();
        assert_eq!(ix.unbox_integer(&[Item::Text("triple 14")]), 42);
    }

    #[test]
    fn test_collator_builds_module() {
        let mut ix = interp();
        let collator = Collator::new("doubled: twice 21").with_native(
            "twice",
            "[n]",
            |ix| {
                let n = ix
                    .frame_field("n")
                    .and_then(|c| c.as_integer())
                    .unwrap_or(0);
                ix.top().borrow_mut().out = Cell::integer(n * 2);
                Bounce::Out
            },
        );
        let module = ix.load_collated(&collator).unwrap();
        let sym = ix.symbols.intern("doubled");
        assert_eq!(module.get(&sym), Some(Cell::integer(42)));
    }

    #[test]
    fn test_recycle_signal_is_counted() {
        let mut ix = interp();
        ix.request_recycle();
        ix.eval_text("loop 200 [1]").unwrap();
        assert_eq!(ix.recycle_count(), 1);
    }

    #[test]
    fn test_tick_advances() {
        let mut ix = interp();
        let before = ix.tick();
        ix.eval_text("1 + 1").unwrap();
        assert!(ix.tick() > before);
    }

    #[test]
    fn test_shutdown_clean() {
        let ix = interp();
        ix.shutdown(true).unwrap();
    }

    #[test]
    fn test_heavy_null_distinguishes_branch_taken() {
        let mut ix = interp();
        let taken = ix.eval_text("if 1 < 2 [~null~]").unwrap();
        assert_eq!(taken.antiform_kind(), Some(Anti::Pack));
        let skipped = ix.eval_text("if 2 < 1 [~null~]").unwrap();
        assert_eq!(skipped.antiform_kind(), Some(Anti::Null));
    }
}
