// Actions and frames.
//
// An action pairs a keylist (interned parameter names) with a
// paramlist whose slots hold either parameter antiforms (still needing
// an argument) or fixed values (specialized out). Invoking one builds
// a varlist aligned with the keylist and drives the action executor: a
// state machine that fulfills argument slots from the feed (possibly
// interleaved with arbitrary user evaluation), typechecks them, then
// runs the phase's dispatcher and interprets its bounce.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::api::Interp;
use crate::error::{arity_short, type_check, ErrorId, ErrorValue, Raised};
use crate::feed::Feed;
use crate::level::{Level, LevelFlag, LevelKind, OutDest};
use crate::symbol::{Symbol, SymbolTable};
use crate::trampoline::Bounce;
use crate::value::{Anti, Cell, TypeSet, TypeTag};


// The one runtime-dispatched function in the hot path.
pub type Dispatcher = fn(&mut Interp) -> Bounce;

pub type HostFn = Rc<dyn Fn(&mut Interp) -> Bounce>;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InfixMode {
    Prefix,
    Infix,
    Postfix,
    Postpone,
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamClass {
    // Evaluate one expression, decay it into the slot.
    Normal,
    // Evaluate one expression, store it lifted without decay.
    Meta,
    // Copy the next element verbatim.
    Just,
    // Copy the next element, derelativized.
    The,
    // Literal unless the element is a group, which evaluates.
    Soft,
    // Definitional-return local.
    Return,
    // Output local.
    Output,
}


#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum ParamFlag {
    Refinement   = 0b001,
    Variadic     = 0b010,
    LiteralFirst = 0b100,
}


#[derive(Debug)]
pub struct Param {
    pub name: Symbol,
    pub class: ParamClass,
    pub flags: BitFlags<ParamFlag>,
    pub spec: TypeSet,
}


impl Param {
    fn build(
        name: Symbol,
        class: ParamClass,
        flags: BitFlags<ParamFlag>,
        spec: TypeSet,
    ) -> Rc<Param> {
        Rc::new(Param { name, class, flags, spec })
    }

    pub fn normal(name: Symbol, spec: TypeSet) -> Rc<Param> {
        Param::build(name, ParamClass::Normal, BitFlags::empty(), spec)
    }

    pub fn meta(name: Symbol, spec: TypeSet) -> Rc<Param> {
        Param::build(name, ParamClass::Meta, BitFlags::empty(), spec)
    }

    pub fn just(name: Symbol, spec: TypeSet) -> Rc<Param> {
        Param::build(name, ParamClass::Just, BitFlags::empty(), spec)
    }

    pub fn the(name: Symbol, spec: TypeSet) -> Rc<Param> {
        Param::build(name, ParamClass::The, BitFlags::empty(), spec)
    }

    pub fn soft(name: Symbol, spec: TypeSet) -> Rc<Param> {
        Param::build(name, ParamClass::Soft, BitFlags::empty(), spec)
    }

    pub fn variadic(name: Symbol) -> Rc<Param> {
        Param::build(
            name,
            ParamClass::Normal,
            BitFlags::from_flag(ParamFlag::Variadic),
            BitFlags::from_flag(TypeTag::Varargs),
        )
    }

    // A refinement that carries an argument.
    pub fn refinement(name: Symbol, spec: TypeSet) -> Rc<Param> {
        Param::build(
            name,
            ParamClass::Normal,
            BitFlags::from_flag(ParamFlag::Refinement),
            spec | TypeTag::NullAnti,
        )
    }

    // A parameter-less refinement: only OK or null can fill it.
    pub fn refinement_flag(name: Symbol) -> Rc<Param> {
        Param::build(
            name,
            ParamClass::Normal,
            BitFlags::from_flag(ParamFlag::Refinement),
            BitFlags::empty(),
        )
    }

    pub fn return_local(name: Symbol) -> Rc<Param> {
        Param::build(name, ParamClass::Return, BitFlags::empty(), BitFlags::empty())
    }

    pub fn output_local(name: Symbol) -> Rc<Param> {
        Param::build(name, ParamClass::Output, BitFlags::empty(), BitFlags::empty())
    }

    pub fn is_refinement(&self) -> bool {
        self.flags.contains(ParamFlag::Refinement)
    }

    pub fn is_variadic(&self) -> bool {
        self.flags.contains(ParamFlag::Variadic)
    }

    pub fn is_local(&self) -> bool {
        matches!(self.class, ParamClass::Return | ParamClass::Output)
    }

    pub fn takes_arg(&self) -> bool {
        !self.is_local() && !(self.is_refinement() && self.spec.is_empty())
    }
}


pub struct KeyList {
    pub keys: Vec<Symbol>,
}

impl KeyList {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn index_of(&self, sym: &Symbol) -> Option<usize> {
        self.keys.iter().position(|k| k == sym)
    }

    pub fn index_of_text(&self, text: &str) -> Option<usize> {
        let folded = text.to_lowercase();
        self.keys.iter().position(|k| k.folded() == folded)
    }

    pub fn key(&self, index: usize) -> &Symbol {
        &self.keys[index]
    }
}

impl fmt::Debug for KeyList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeyList[")?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", key.text())?;
        }
        write!(f, "]")
    }
}


// The frame storage of one invocation (or one specialization).
pub struct VarList {
    keylist: Rc<KeyList>,
    slots: RefCell<Vec<Cell>>,
    phase: RefCell<Action>,
}

impl VarList {
    pub fn new(keylist: Rc<KeyList>, slots: Vec<Cell>, phase: Action) -> Rc<VarList> {
        debug_assert_eq!(keylist.len(), slots.len());
        Rc::new(VarList {
            keylist,
            slots: RefCell::new(slots),
            phase: RefCell::new(phase),
        })
    }

    pub fn len(&self) -> usize {
        self.keylist.len()
    }

    pub fn keylist(&self) -> &Rc<KeyList> {
        &self.keylist
    }

    pub fn phase(&self) -> Action {
        self.phase.borrow().clone()
    }

    pub fn set_phase(&self, action: Action) {
        *self.phase.borrow_mut() = action;
    }

    pub fn index_of(&self, sym: &Symbol) -> Option<usize> {
        self.keylist.index_of(sym)
    }

    pub fn slot(&self, index: usize) -> Cell {
        self.slots.borrow()[index].clone()
    }

    // Frame slots are variables: unstable antiforms may not be stored.
    pub fn set_slot(&self, index: usize, cell: Cell) -> Raised<()> {
        if !cell.is_stable() && !cell.is_unspecialized_param() {
            return Err(ErrorValue::bare(ErrorId::UnstableAssign));
        }
        self.slots.borrow_mut()[index] = cell;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Cell> {
        self.slots.borrow().clone()
    }
}

impl fmt::Debug for VarList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "VarList({:?})", self.keylist)
    }
}


pub struct ActionDef {
    pub dispatcher: Dispatcher,
    pub keylist: Rc<KeyList>,
    // Parameter antiforms for open slots, fixed values for specialized
    // ones. For a specialized action this doubles as the exemplar.
    pub paramlist: Rc<crate::flex::Array>,
    // Ordered partially-specialized refinements, highest priority last.
    pub partials: Option<Rc<crate::flex::Array>>,
    // Dispatcher-specific cells (body block, base action, ...).
    pub details: Vec<Cell>,
    pub hostfn: Option<HostFn>,
    pub infix: InfixMode,
    pub label: Option<Symbol>,
    pub returns: TypeSet,
}

pub type Action = Rc<ActionDef>;

impl fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ActionDef({}, {:?}, {:?})",
            self.label.as_ref().map_or("anonymous", |l| l.text()),
            self.infix,
            self.keylist,
        )
    }
}


pub fn make_action(
    label: Option<Symbol>,
    params: Vec<Rc<Param>>,
    dispatcher: Dispatcher,
    infix: InfixMode,
    returns: TypeSet,
    details: Vec<Cell>,
) -> Action {
    let keylist = Rc::new(KeyList {
        keys: params.iter().map(|p| p.name.clone()).collect(),
    });
    let cells = params.into_iter().map(Cell::parameter).collect();
    let paramlist = crate::flex::Array::with_flavor(crate::flex::Flavor::ParamList, cells);
    Rc::new(ActionDef {
        dispatcher,
        keylist,
        paramlist,
        partials: None,
        details,
        hostfn: None,
        infix,
        label,
        returns,
    })
}


pub fn to_action(cell: &Cell) -> Raised<Action> {
    if let Some(action) = cell.as_action() {
        return Ok(action);
    }
    if let Some(payload) = cell.as_frame() {
        return Ok(payload.action.clone());
    }
    Err(ErrorValue::bare(ErrorId::NotAnAction))
}


// -- effective parameter orders

fn partial_symbols(action: &Action) -> Vec<Symbol> {
    match &action.partials {
        None => Vec::new(),
        Some(array) => {
            // Iteration tail to head visits highest priority first.
            let mut syms = Vec::new();
            let mut i = array.len();
            while i > 0 {
                i -= 1;
                if let Some(cell) = array.get(i) {
                    if let Some(sym) = cell.as_word() {
                        syms.push(sym.clone());
                    }
                }
            }
            syms
        }
    }
}

pub(crate) fn open_param(action: &Action, index: usize) -> Option<Rc<Param>> {
    let cell = action.paramlist.get(index)?;
    if cell.is_unspecialized_param() {
        cell.as_param()
    } else {
        None
    }
}

// Slots a plain invocation fulfills from its feed: ordinary parameters
// in paramlist order, then partial refinements in priority order.
pub fn invocation_order(action: &Action) -> Vec<usize> {
    let mut order = Vec::new();
    for i in 0..action.keylist.len() {
        if let Some(param) = open_param(action, i) {
            if !param.is_refinement() && !param.is_local() {
                order.push(i);
            }
        }
    }
    for sym in partial_symbols(action) {
        if let Some(i) = action.keylist.index_of(&sym) {
            if open_param(action, i).map_or(false, |p| p.is_refinement()) {
                order.push(i);
            }
        }
    }
    order
}

// The order application (and parameter queries) expose: ordinary
// parameters, then partials, then any untouched argument-bearing
// refinements.
pub fn evars_order(action: &Action) -> Vec<usize> {
    let mut order = invocation_order(action);
    let named: HashSet<usize> = order.iter().cloned().collect();
    for i in 0..action.keylist.len() {
        if named.contains(&i) {
            continue;
        }
        if let Some(param) = open_param(action, i) {
            if param.is_refinement() && param.takes_arg() {
                order.push(i);
            }
        }
    }
    order
}


// -- argument typechecking

pub fn check_acceptance(spec: &TypeSet, value: &Cell) -> bool {
    match value.antiform_kind() {
        None => match value.type_tag() {
            Some(tag) => spec.contains(tag),
            None => false,
        },
        Some(Anti::Null) => spec.contains(TypeTag::NullAnti),
        Some(Anti::Ok) => spec.contains(TypeTag::OkAnti),
        Some(Anti::Void) => spec.contains(TypeTag::VoidAnti),
        Some(Anti::Splice) => spec.contains(TypeTag::SpliceAnti),
        Some(Anti::Action) => spec.contains(TypeTag::ActionAnti),
        _ => false,
    }
}

pub fn typecheck_arg(
    label: Option<&Symbol>,
    key: &Symbol,
    param: &Param,
    value: &Cell,
) -> Raised<()> {
    // Meta parameters receive lifted forms and constrain nothing.
    if param.class == ParamClass::Meta {
        return Ok(());
    }
    if param.is_refinement() {
        // A refinement slot may always be revoked or flagged on.
        if value.is_null() {
            return Ok(());
        }
        if param.spec.is_empty() {
            return match value.antiform_kind() {
                Some(Anti::Ok) => Ok(()),
                _ => Err(type_check(
                    label.map_or("anonymous", |l| l.text()),
                    key.text(),
                    "parameter-less refinement takes only ok or null",
                )),
            };
        }
    }
    if param.is_variadic() {
        return Ok(());
    }
    if check_acceptance(&param.spec, value) {
        return Ok(());
    }
    Err(type_check(
        label.map_or("anonymous", |l| l.text()),
        key.text(),
        &format!("{:?} not accepted", value.type_tag()),
    ))
}


// -- invocation

pub struct ActionState {
    // The phase currently installed (a specializer swaps in its base).
    pub action: Action,
    // The action as invoked; keeps label and partials visible to the
    // dispatcher even after a phase swap.
    pub original: Action,
    pub varlist: Rc<VarList>,
    pub params: Vec<Option<Rc<Param>>>,
    pub order: Vec<usize>,
    pub pos: usize,
    pub left: Option<Cell>,
    pub fulfilling: Option<usize>,
    pub native_state: u8,
}


pub(crate) const ST_INITIAL: u8 = 0;
pub(crate) const ST_FULFILLING: u8 = 1;
pub(crate) const ST_DISPATCHING: u8 = 2;
pub(crate) const ST_REDO_CHECKED: u8 = 3;
pub(crate) const ST_REDO_UNCHECKED: u8 = 4;
pub(crate) const ST_ABRUPT: u8 = 5;


// Build the frame for an invocation: specialized slots are copied,
// locals and unordered refinements take their defaults, open slots
// keep their parameter antiform until fulfilled.
pub fn build_invocation_varlist(
    symbols: &mut SymbolTable,
    action: &Action,
) -> Raised<(Rc<VarList>, Vec<Option<Rc<Param>>>)> {
    let n = action.keylist.len();
    let mut slots = Vec::with_capacity(n);
    let mut params = Vec::with_capacity(n);
    for i in 0..n {
        let cell = action
            .paramlist
            .get(i)
            .ok_or_else(|| ErrorValue::bare(ErrorId::Internal))?;
        if cell.is_unspecialized_param() {
            params.push(cell.as_param());
            slots.push(cell);
        } else {
            params.push(None);
            slots.push(cell.copied());
        }
    }
    let varlist = VarList::new(action.keylist.clone(), slots, action.clone());

    let partials: HashSet<Symbol> = partial_symbols(action).into_iter().collect();
    for i in 0..n {
        let param = match &params[i] {
            Some(param) => param.clone(),
            None => continue,
        };
        match param.class {
            ParamClass::Return => {
                let ret = crate::natives::make_definitional_return(symbols, varlist.clone());
                varlist.set_slot(i, Cell::action(ret))?;
            }
            ParamClass::Output => {
                varlist.set_slot(i, Cell::null())?;
            }
            _ => {
                if param.is_refinement() && !partials.contains(&param.name) {
                    varlist.set_slot(i, Cell::null())?;
                }
            }
        }
    }
    Ok((varlist, params))
}


pub fn push_action_invocation(
    ix: &mut Interp,
    action: Action,
    feed: Rc<Feed>,
    label: Option<Symbol>,
    left: Option<Cell>,
    dest: OutDest,
) -> Raised<()> {
    let (varlist, params) = build_invocation_varlist(&mut ix.symbols, &action)?;
    let order = invocation_order(&action);
    let state = ActionState {
        action: action.clone(),
        original: action,
        varlist,
        params,
        order,
        pos: 0,
        left,
        fulfilling: None,
        native_state: 0,
    };
    let mut level = Level::action(state, feed, dest);
    level.label = label;
    ix.push_level(level);
    Ok(())
}


// -- the executor

pub fn action_executor(ix: &mut Interp) -> Bounce {
    let state = ix.top().borrow().state;
    match state {
        ST_INITIAL => advance_fulfill(ix),
        ST_FULFILLING => match finalize_arg(ix) {
            Err(err) => Bounce::Panic(err),
            Ok(Some(bounce)) => bounce,
            Ok(None) => advance_fulfill(ix),
        },
        ST_DISPATCHING => dispatch(ix),
        ST_REDO_CHECKED => {
            if let Err(err) = typecheck_all(ix) {
                return Bounce::Panic(err);
            }
            dispatch(ix)
        }
        ST_REDO_UNCHECKED => dispatch(ix),
        ST_ABRUPT => {
            // The frame's association with the level ends here; the
            // trampoline rolls the level back as the throw passes.
            Bounce::Thrown
        }
        _ => Bounce::Panic(ErrorValue::new(
            ErrorId::Internal,
            "action executor in impossible state",
        )),
    }
}


fn advance_fulfill(ix: &mut Interp) -> Bounce {
    loop {
        let top = ix.top();
        let snapshot = {
            let mut level = top.borrow_mut();
            let label = level.label.clone();
            let feed = level.feed.clone();
            let st = level.action_state();
            if st.pos >= st.order.len() {
                None
            } else {
                let idx = st.order[st.pos];
                let param = st.params[idx].clone().expect("ordered slot has param");
                let left = if st.pos == 0 { st.left.take() } else { None };
                Some((idx, param, left, label, feed, st.varlist.clone()))
            }
        };

        let (idx, param, left, label, feed, varlist) = match snapshot {
            None => return dispatch_entry(ix),
            Some(parts) => parts,
        };

        if let Some(left_value) = left {
            // Infix: the prior step's product fills the first slot.
            let coerced = match coerce_for_class(&param, left_value, false) {
                Ok(v) => v,
                Err(err) => return Bounce::Panic(err),
            };
            if let Err(err) = accept_arg(&label, &param, idx, coerced, &varlist) {
                return Bounce::Panic(err);
            }
            top.borrow_mut().action_state().pos += 1;
            continue;
        }

        match param.class {
            ParamClass::Just => {
                let elem = match ix.feed_take_verbatim(&feed) {
                    Err(err) => return Bounce::Panic(err),
                    Ok(None) => {
                        return Bounce::Panic(missing_arg(&label, &param));
                    }
                    Ok(Some(elem)) => elem,
                };
                if let Err(err) = accept_arg(&label, &param, idx, elem, &varlist) {
                    return Bounce::Panic(err);
                }
                top.borrow_mut().action_state().pos += 1;
            }
            ParamClass::The => {
                let elem = match ix.feed_take(&feed) {
                    Err(err) => return Bounce::Panic(err),
                    Ok(None) => {
                        return Bounce::Panic(missing_arg(&label, &param));
                    }
                    Ok(Some(elem)) => elem,
                };
                if let Err(err) = accept_arg(&label, &param, idx, elem, &varlist) {
                    return Bounce::Panic(err);
                }
                top.borrow_mut().action_state().pos += 1;
            }
            ParamClass::Soft => {
                let peek = match ix.feed_current(&feed) {
                    Err(err) => return Bounce::Panic(err),
                    Ok(None) => {
                        return Bounce::Panic(missing_arg(&label, &param));
                    }
                    Ok(Some(peek)) => peek,
                };
                if matches!(peek.heart, crate::value::Heart::Group(_)) {
                    if let Err(err) = ix.feed_advance(&feed) {
                        return Bounce::Panic(err);
                    }
                    let series = peek.as_series().expect("group has series").clone();
                    let binding = peek.binding.clone().or_else(|| feed.binding());
                    {
                        let mut level = top.borrow_mut();
                        level.state = ST_FULFILLING;
                        level.action_state().fulfilling = Some(idx);
                    }
                    ix.push_level(Level::evaluator(
                        Feed::array(series, binding),
                        OutDest::ParentSpare,
                    ));
                    return Bounce::Continue;
                }
                let elem = match ix.feed_take(&feed) {
                    Err(err) => return Bounce::Panic(err),
                    Ok(None) => {
                        return Bounce::Panic(missing_arg(&label, &param));
                    }
                    Ok(Some(elem)) => elem,
                };
                if let Err(err) = accept_arg(&label, &param, idx, elem, &varlist) {
                    return Bounce::Panic(err);
                }
                top.borrow_mut().action_state().pos += 1;
            }
            ParamClass::Normal | ParamClass::Meta if param.is_variadic() => {
                let handle = Cell::varargs(feed.clone());
                if let Err(err) = accept_arg(&label, &param, idx, handle, &varlist) {
                    return Bounce::Panic(err);
                }
                top.borrow_mut().action_state().pos += 1;
            }
            ParamClass::Normal | ParamClass::Meta => {
                match ix.feed_at_end(&feed) {
                    Err(err) => return Bounce::Panic(err),
                    Ok(true) => {
                        return Bounce::Panic(missing_arg(&label, &param));
                    }
                    Ok(false) => {}
                }
                {
                    let mut level = top.borrow_mut();
                    level.state = ST_FULFILLING;
                    level.action_state().fulfilling = Some(idx);
                }
                let mut sub = Level::stepper(feed, OutDest::ParentSpare);
                if param.class == ParamClass::Meta {
                    sub.flags.insert(LevelFlag::MetaResult);
                }
                ix.push_level(sub);
                return Bounce::Continue;
            }
            ParamClass::Return | ParamClass::Output => {
                // Locals never appear in the fulfillment order.
                top.borrow_mut().action_state().pos += 1;
            }
        }
    }
}


fn finalize_arg(ix: &mut Interp) -> Raised<Option<Bounce>> {
    let top = ix.top();
    let (idx, param, value, label, feed, varlist) = {
        let mut level = top.borrow_mut();
        let label = level.label.clone();
        let feed = level.feed.clone();
        let value = std::mem::replace(&mut level.spare, Cell::erased());
        let st = level.action_state();
        let idx = st.fulfilling.take().expect("finalize without slot");
        let param = st.params[idx].clone().expect("slot has param");
        (idx, param, value, label, feed, st.varlist.clone())
    };

    if param.class == ParamClass::Normal && value.is_ghost() {
        // The expression vanished (comma, elision); step again.
        if ix.feed_at_end(&feed)? {
            return Err(missing_arg(&label, &param));
        }
        {
            let mut level = top.borrow_mut();
            level.state = ST_FULFILLING;
            level.action_state().fulfilling = Some(idx);
        }
        ix.push_level(Level::stepper(feed, OutDest::ParentSpare));
        return Ok(Some(Bounce::Continue));
    }

    let coerced = coerce_for_class(&param, value, true)?;
    accept_arg(&label, &param, idx, coerced, &varlist)?;
    top.borrow_mut().action_state().pos += 1;
    Ok(None)
}


pub(crate) fn coerce_for_class(param: &Param, value: Cell, lifted_already: bool) -> Raised<Cell> {
    match param.class {
        ParamClass::Normal | ParamClass::Soft => value.decay(),
        ParamClass::Meta => {
            if lifted_already {
                Ok(value)
            } else {
                Ok(value.lifted())
            }
        }
        _ => Ok(value),
    }
}


fn accept_arg(
    label: &Option<Symbol>,
    param: &Param,
    idx: usize,
    value: Cell,
    varlist: &Rc<VarList>,
) -> Raised<()> {
    typecheck_arg(label.as_ref(), &param.name, param, &value)?;
    varlist.set_slot(idx, value)
}


fn missing_arg(label: &Option<Symbol>, param: &Param) -> ErrorValue {
    arity_short(
        label.as_ref().map_or("anonymous", |l| l.text()),
        param.name.text(),
    )
}


fn dispatch_entry(ix: &mut Interp) -> Bounce {
    ix.top().borrow_mut().state = ST_DISPATCHING;
    dispatch(ix)
}

fn dispatch(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let dispatcher = {
        let mut level = top.borrow_mut();
        level.state = ST_DISPATCHING;
        level.action_state().action.dispatcher
    };
    let bounce = dispatcher(ix);
    match bounce {
        Bounce::Out => {
            let returns = {
                let mut level = top.borrow_mut();
                if level.is_just_use_out() {
                    return Bounce::Out;
                }
                level.action_state().action.returns
            };
            if !returns.is_empty() {
                let out = top.borrow().out.clone();
                let stable = match out.decay() {
                    Ok(v) => v,
                    Err(err) => return Bounce::Panic(err),
                };
                if !check_acceptance(&returns, &stable) {
                    return Bounce::Panic(ErrorValue::bare(ErrorId::ReturnTypeCheck));
                }
            }
            Bounce::Out
        }
        Bounce::RedoChecked => {
            top.borrow_mut().state = ST_REDO_CHECKED;
            Bounce::RedoChecked
        }
        Bounce::RedoUnchecked => {
            top.borrow_mut().state = ST_REDO_UNCHECKED;
            Bounce::RedoUnchecked
        }
        other => other,
    }
}


fn typecheck_all(ix: &mut Interp) -> Raised<()> {
    let top = ix.top();
    let (action, varlist, label) = {
        let mut level = top.borrow_mut();
        let label = level.label.clone();
        let st = level.action_state();
        (st.action.clone(), st.varlist.clone(), label)
    };
    for i in 0..action.keylist.len() {
        if let Some(param) = open_param(&action, i) {
            if param.is_local() {
                continue;
            }
            let value = varlist.slot(i);
            if value.is_unspecialized_param() {
                continue;
            }
            typecheck_arg(label.as_ref(), action.keylist.key(i), &param, &value)?;
        }
    }
    Ok(())
}


// -- throw cooperation

pub fn dispatching_mid_throw(level: &Rc<RefCell<Level>>) -> bool {
    let level = level.borrow();
    matches!(level.kind, LevelKind::Action(_)) && level.state == ST_DISPATCHING
}

pub fn note_abrupt_failure(level: &Rc<RefCell<Level>>) {
    let mut level = level.borrow_mut();
    if matches!(level.kind, LevelKind::Action(_)) {
        level.state = ST_ABRUPT;
    }
}


// -- dispatcher helpers

// Push a sublevel whose result is final for the current level.
pub fn delegate_with(ix: &mut Interp, level: Level) -> Bounce {
    ix.top().borrow_mut().become_just_use_out();
    ix.push_level(level);
    Bounce::Delegate
}

pub fn continue_with(ix: &mut Interp, level: Level) -> Bounce {
    ix.push_level(level);
    Bounce::Continue
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;
    use crate::value::any_element;

    fn noop_dispatcher(_: &mut Interp) -> Bounce {
        Bounce::Out
    }

    fn sample_action(symbols: &mut SymbolTable) -> Action {
        make_action(
            Some(symbols.intern("sample")),
            vec![
                Param::normal(symbols.intern("a"), any_element()),
                Param::normal(symbols.intern("b"), any_element()),
                Param::refinement(
                    symbols.intern("dup"),
                    BitFlags::from_flag(TypeTag::Integer),
                ),
                Param::refinement(
                    symbols.intern("part"),
                    BitFlags::from_flag(TypeTag::Integer),
                ),
            ],
            noop_dispatcher,
            InfixMode::Prefix,
            BitFlags::empty(),
            vec![],
        )
    }

    #[test]
    fn test_invocation_order_skips_refinements() {
        let mut symbols = SymbolTable::new();
        let action = sample_action(&mut symbols);
        assert_eq!(invocation_order(&action), vec![0, 1]);
    }

    #[test]
    fn test_evars_order_appends_refinements() {
        let mut symbols = SymbolTable::new();
        let action = sample_action(&mut symbols);
        assert_eq!(evars_order(&action), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_typecheck_rejects_wrong_heart() {
        let mut symbols = SymbolTable::new();
        let param = Param::normal(
            symbols.intern("n"),
            BitFlags::from_flag(TypeTag::Integer),
        );
        let key = symbols.intern("n");
        assert!(typecheck_arg(None, &key, &param, &Cell::integer(3)).is_ok());
        let err = typecheck_arg(None, &key, &param, &Cell::text("no")).unwrap_err();
        assert_eq!(err.id, ErrorId::TypeCheck);
    }

    #[test]
    fn test_refinement_accepts_null_and_ok() {
        let mut symbols = SymbolTable::new();
        let flag = Param::refinement_flag(symbols.intern("only"));
        let key = symbols.intern("only");
        assert!(typecheck_arg(None, &key, &flag, &Cell::null()).is_ok());
        assert!(typecheck_arg(None, &key, &flag, &Cell::ok()).is_ok());
        assert!(typecheck_arg(None, &key, &flag, &Cell::integer(1)).is_err());
    }
}
