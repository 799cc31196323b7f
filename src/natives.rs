// Built-in actions.
//
// Each native is a dispatcher reading its argument slots out of the
// running level's varlist and answering with a bounce. Natives that
// need sub-evaluation push levels and come back through their
// native_state, never by re-entering the trampoline.

use std::rc::Rc;

use enumflags2::BitFlags;

use crate::action::{self, make_action, Action, InfixMode, Param, VarList};
use crate::api::Interp;
use crate::env::Context;
use crate::error::{ErrorId, ErrorValue, Raised};
use crate::feed::Feed;
use crate::level::{Level, LevelFlag, OutDest};
use crate::specialize;
use crate::symbol::SymbolTable;
use crate::trampoline::{Bounce, Thrown};
use crate::value::{
    any_element, any_stable, Anti, Cell, Heart, Series, TypeSet, TypeTag,
};


fn numeric() -> TypeSet {
    TypeTag::Integer | TypeTag::Decimal
}


// -- slot access helpers

fn frame_slot(ix: &Interp, index: usize) -> Cell {
    let top = ix.top();
    let mut level = top.borrow_mut();
    level.action_state().varlist.slot(index)
}

fn two_args(ix: &Interp) -> (Cell, Cell) {
    (frame_slot(ix, 0), frame_slot(ix, 1))
}

fn finish(ix: &mut Interp, value: Cell) -> Bounce {
    ix.top().borrow_mut().out = value;
    Bounce::Out
}

fn branch_feed(ix: &Interp, branch: &Cell) -> Raised<Rc<Feed>> {
    let series = branch
        .as_series()
        .ok_or_else(|| ErrorValue::bare(ErrorId::TypeCheck))?
        .clone();
    let binding = branch
        .binding
        .clone()
        .or_else(|| Some(ix.user_context()));
    Ok(Feed::array(series, binding))
}

fn branch_level(feed: Rc<Feed>, dest: OutDest) -> Level {
    let mut level = Level::evaluator(feed, dest);
    level.flags.insert(LevelFlag::Branch);
    level.flags.insert(LevelFlag::ForceHeavyNulls);
    level
}


// -- arithmetic and comparison

macro_rules! arith {
    ($name:ident, $checked:ident, $op:tt) => {
        fn $name(ix: &mut Interp) -> Bounce {
            let (a, b) = two_args(ix);
            match (&a.heart, &b.heart) {
                (Heart::Integer(x), Heart::Integer(y)) => match x.$checked(*y) {
                    Some(v) => finish(ix, Cell::integer(v)),
                    None => Bounce::Panic(ErrorValue::bare(ErrorId::Overflow)),
                },
                (Heart::Decimal(x), Heart::Decimal(y)) => {
                    finish(ix, Cell::decimal(x $op y))
                }
                _ => Bounce::Panic(ErrorValue::new(
                    ErrorId::TypeCheck,
                    "arithmetic operands must share a numeric type",
                )),
            }
        }
    };
}

arith!(add_dispatcher, checked_add, +);
arith!(subtract_dispatcher, checked_sub, -);
arith!(multiply_dispatcher, checked_mul, *);

// Integer division goes straight to the host operation; a zero divisor
// is an abrupt failure for the rescue boundary, not a checked path.
fn divide_dispatcher(ix: &mut Interp) -> Bounce {
    let (a, b) = two_args(ix);
    match (&a.heart, &b.heart) {
        (Heart::Integer(x), Heart::Integer(y)) => {
            let v = x / y;
            finish(ix, Cell::integer(v))
        }
        (Heart::Decimal(x), Heart::Decimal(y)) => finish(ix, Cell::decimal(x / y)),
        _ => Bounce::Panic(ErrorValue::new(
            ErrorId::TypeCheck,
            "arithmetic operands must share a numeric type",
        )),
    }
}

fn equal_dispatcher(ix: &mut Interp) -> Bounce {
    let (a, b) = two_args(ix);
    finish(ix, Cell::logic(a == b))
}

fn lesser_dispatcher(ix: &mut Interp) -> Bounce {
    let (a, b) = two_args(ix);
    match (&a.heart, &b.heart) {
        (Heart::Integer(x), Heart::Integer(y)) => finish(ix, Cell::logic(x < y)),
        (Heart::Decimal(x), Heart::Decimal(y)) => finish(ix, Cell::logic(x < y)),
        _ => Bounce::Panic(ErrorValue::new(
            ErrorId::TypeCheck,
            "comparison operands must share a numeric type",
        )),
    }
}

fn greater_dispatcher(ix: &mut Interp) -> Bounce {
    let (a, b) = two_args(ix);
    match (&a.heart, &b.heart) {
        (Heart::Integer(x), Heart::Integer(y)) => finish(ix, Cell::logic(x > y)),
        (Heart::Decimal(x), Heart::Decimal(y)) => finish(ix, Cell::logic(x > y)),
        _ => Bounce::Panic(ErrorValue::new(
            ErrorId::TypeCheck,
            "comparison operands must share a numeric type",
        )),
    }
}


// -- control flow

fn if_dispatcher(ix: &mut Interp) -> Bounce {
    let cond = frame_slot(ix, 0);
    let branch = frame_slot(ix, 1);
    match cond.is_truthy() {
        Err(err) => Bounce::Panic(err),
        Ok(false) => finish(ix, Cell::null()),
        Ok(true) => match branch_feed(ix, &branch) {
            Err(err) => Bounce::Panic(err),
            Ok(feed) => {
                action::delegate_with(ix, branch_level(feed, OutDest::ParentOut))
            }
        },
    }
}

fn either_dispatcher(ix: &mut Interp) -> Bounce {
    let cond = frame_slot(ix, 0);
    let picked = match cond.is_truthy() {
        Err(err) => return Bounce::Panic(err),
        Ok(true) => frame_slot(ix, 1),
        Ok(false) => frame_slot(ix, 2),
    };
    match branch_feed(ix, &picked) {
        Err(err) => Bounce::Panic(err),
        Ok(feed) => action::delegate_with(ix, branch_level(feed, OutDest::ParentOut)),
    }
}

fn do_dispatcher(ix: &mut Interp) -> Bounce {
    let block = frame_slot(ix, 0);
    match branch_feed(ix, &block) {
        Err(err) => Bounce::Panic(err),
        Ok(feed) => {
            action::delegate_with(ix, Level::evaluator(feed, OutDest::ParentOut))
        }
    }
}

fn loop_dispatcher(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let native_state = {
        let mut level = top.borrow_mut();
        level.action_state().native_state
    };
    match native_state {
        0 => {
            let count = match frame_slot(ix, 0).as_integer() {
                Some(count) => count,
                None => {
                    return Bounce::Panic(ErrorValue::bare(ErrorId::TypeCheck));
                }
            };
            if count <= 0 {
                return finish(ix, Cell::void());
            }
            let body = frame_slot(ix, 1);
            let feed = match branch_feed(ix, &body) {
                Err(err) => return Bounce::Panic(err),
                Ok(feed) => feed,
            };
            {
                let mut level = top.borrow_mut();
                level.scratch = Cell::integer(count);
                level.action_state().native_state = 1;
            }
            action::continue_with(ix, Level::evaluator(feed, OutDest::Discard))
        }
        1 => {
            let remaining = top
                .borrow()
                .scratch
                .as_integer()
                .expect("loop counter")
                - 1;
            top.borrow_mut().scratch = Cell::integer(remaining);
            if remaining <= 0 {
                return finish(ix, Cell::void());
            }
            let body = frame_slot(ix, 1);
            let feed = match branch_feed(ix, &body) {
                Err(err) => return Bounce::Panic(err),
                Ok(feed) => feed,
            };
            action::continue_with(ix, Level::evaluator(feed, OutDest::Discard))
        }
        _ => Bounce::Panic(ErrorValue::bare(ErrorId::Internal)),
    }
}


// Raise a cooperative panic carrying the given reason.
fn panic_dispatcher(ix: &mut Interp) -> Bounce {
    let reason = frame_slot(ix, 0);
    let message = match reason.as_text() {
        Some(text) => (*text).clone(),
        None => crate::value::form_cell(&reason),
    };
    Bounce::Panic(ErrorValue::new(ErrorId::Internal, message))
}

// Throw to the running level that owns the given frame's varlist.
fn unwind_dispatcher(ix: &mut Interp) -> Bounce {
    let (target_cell, value) = two_args(ix);
    let target = match target_cell.as_frame().and_then(|p| p.varlist.clone()) {
        Some(target) => target,
        None => return Bounce::Panic(ErrorValue::bare(ErrorId::TypeCheck)),
    };
    let mut serial = None;
    for level in ix.levels.iter().rev() {
        let level = level.borrow();
        if let crate::level::LevelKind::Action(state) = &level.kind {
            if Rc::ptr_eq(&state.varlist, &target) {
                serial = Some(level.serial);
                break;
            }
        }
    }
    match serial {
        None => Bounce::Panic(ErrorValue::bare(ErrorId::NoLevelToUnwind)),
        Some(serial) => {
            ix.thrown = Some(Thrown::unwind(serial, value));
            Bounce::Thrown
        }
    }
}

// Test-and-clear the pending halt request.
fn halt_query_dispatcher(ix: &mut Interp) -> Bounce {
    let pending = ix.take_halt_request();
    finish(ix, Cell::logic(pending))
}


// -- user functions

fn func_dispatcher(ix: &mut Interp) -> Bounce {
    let spec = frame_slot(ix, 0);
    let body = frame_slot(ix, 1);
    let spec_series = match spec.as_series() {
        Some(series) => series.clone(),
        None => return Bounce::Panic(ErrorValue::bare(ErrorId::TypeCheck)),
    };
    let mut params = Vec::new();
    for cell in spec_series.cells() {
        match &cell.heart {
            Heart::Word(sym) => {
                params.push(Param::normal(sym.clone(), any_stable()));
            }
            _ => {
                return Bounce::Panic(ErrorValue::new(
                    ErrorId::TypeCheck,
                    "function spec entries must be words",
                ));
            }
        }
    }
    params.push(Param::return_local(ix.symbols.intern("return")));
    let action = make_action(
        None,
        params,
        interpreted_dispatcher,
        InfixMode::Prefix,
        BitFlags::empty(),
        vec![body],
    );
    finish(ix, Cell::action(action))
}

fn interpreted_dispatcher(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let (native_state, body, varlist) = {
        let mut level = top.borrow_mut();
        let state = level.action_state();
        (
            state.native_state,
            state.action.details[0].clone(),
            state.varlist.clone(),
        )
    };
    match native_state {
        0 => {
            let series = match body.as_series() {
                Some(series) => series.clone(),
                None => return Bounce::Panic(ErrorValue::bare(ErrorId::Internal)),
            };
            let parent = body.binding.clone().or_else(|| Some(ix.user_context()));
            let ctx = Context::frame(varlist, parent);
            {
                let mut level = top.borrow_mut();
                level.action_state().native_state = 1;
            }
            action::continue_with(
                ix,
                Level::evaluator(Feed::array(series, Some(ctx)), OutDest::ParentOut),
            )
        }
        1 => Bounce::Out,
        _ => Bounce::Panic(ErrorValue::bare(ErrorId::Internal)),
    }
}


// The definitional return bound into each user function frame: it
// unwinds to whichever running level owns that exact varlist.
pub fn make_definitional_return(
    symbols: &mut SymbolTable,
    target: Rc<VarList>,
) -> Action {
    let value = Param::normal(symbols.intern("value"), any_stable());
    let frame_cell = Cell::frame(target.phase(), Some(target));
    make_action(
        Some(symbols.intern("return")),
        vec![value],
        return_dispatcher,
        InfixMode::Prefix,
        BitFlags::empty(),
        vec![frame_cell],
    )
}

fn return_dispatcher(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let (value, target) = {
        let mut level = top.borrow_mut();
        let state = level.action_state();
        let value = state.varlist.slot(0);
        let target = state.action.details[0]
            .as_frame()
            .and_then(|p| p.varlist.clone());
        (value, target)
    };
    let target = match target {
        Some(target) => target,
        None => return Bounce::Panic(ErrorValue::bare(ErrorId::Internal)),
    };
    let mut serial = None;
    for level in ix.levels.iter().rev() {
        let level = level.borrow();
        if let crate::level::LevelKind::Action(state) = &level.kind {
            if Rc::ptr_eq(&state.varlist, &target) {
                serial = Some(level.serial);
                break;
            }
        }
    }
    match serial {
        None => Bounce::Panic(ErrorValue::bare(ErrorId::NoLevelToUnwind)),
        Some(serial) => {
            ix.thrown = Some(Thrown::unwind(serial, value));
            Bounce::Thrown
        }
    }
}


// -- series

// Appends value to series, then applies /dup and /part in the invoked
// action's partials priority order (paramlist order when no partials).
fn append_dispatcher(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let (series_cell, value, dup, part, original) = {
        let mut level = top.borrow_mut();
        let state = level.action_state();
        (
            state.varlist.slot(0),
            state.varlist.slot(1),
            state.varlist.slot(2),
            state.varlist.slot(3),
            state.original.clone(),
        )
    };
    let series = match series_cell.as_series() {
        Some(series) => series.clone(),
        None => return Bounce::Panic(ErrorValue::bare(ErrorId::TypeCheck)),
    };

    if let Err(err) = append_value(&series, &value) {
        return Bounce::Panic(err);
    }

    let mut order: Vec<&str> = Vec::new();
    if let Some(partials) = &original.partials {
        let mut i = partials.len();
        while i > 0 {
            i -= 1;
            if let Some(cell) = partials.get(i) {
                if let Some(sym) = cell.as_word() {
                    if sym.folded() == "dup" {
                        order.push("dup");
                    } else if sym.folded() == "part" {
                        order.push("part");
                    }
                }
            }
        }
    }
    if !order.contains(&"dup") {
        order.push("dup");
    }
    if !order.contains(&"part") {
        order.push("part");
    }

    for name in order {
        match name {
            "dup" => {
                if let Some(n) = dup.as_integer() {
                    for _ in 1..n {
                        if let Err(err) = append_value(&series, &value) {
                            return Bounce::Panic(err);
                        }
                    }
                }
            }
            "part" => {
                if let Some(n) = part.as_integer() {
                    let bound = series.index + n.max(0) as usize;
                    if let Err(err) = series.array.truncate(bound) {
                        return Bounce::Panic(err);
                    }
                }
            }
            _ => {}
        }
    }
    finish(ix, series_cell)
}

fn append_value(series: &Series, value: &Cell) -> Raised<()> {
    if value.antiform_kind() == Some(Anti::Splice) {
        if let Heart::Group(spliced) = &value.heart {
            for cell in spliced.cells() {
                series.array.push(cell)?;
            }
            return Ok(());
        }
    }
    series.array.push(value.copied())
}


// -- specialization

fn specialize_native_dispatcher(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let native_state = {
        let mut level = top.borrow_mut();
        level.action_state().native_state
    };
    match native_state {
        0 => {
            let base = match action::to_action(&frame_slot(ix, 0)) {
                Ok(base) => base,
                Err(err) => return Bounce::Panic(err),
            };
            let def = frame_slot(ix, 1);
            let series = match def.as_series() {
                Some(series) => series.clone(),
                None => return Bounce::Panic(ErrorValue::bare(ErrorId::TypeCheck)),
            };
            let varlist = match specialize::begin_specialize(&base, &[]) {
                Ok(varlist) => varlist,
                Err(err) => return Bounce::Panic(err),
            };
            let parent = def.binding.clone().or_else(|| Some(ix.user_context()));
            let binder = Context::frame(varlist.clone(), parent);
            {
                let mut level = top.borrow_mut();
                level.scratch = Cell::frame(base, Some(varlist));
                level.action_state().native_state = 1;
            }
            action::continue_with(
                ix,
                Level::evaluator(Feed::array(series, Some(binder)), OutDest::Discard),
            )
        }
        1 => {
            let (base, varlist) = {
                let level = top.borrow();
                let payload = level
                    .scratch
                    .as_frame()
                    .expect("specialize scratch holds frame")
                    .clone();
                (payload.action, payload.varlist.expect("varlist stashed"))
            };
            match specialize::finish_specialize(ix, &base, varlist, &[]) {
                Ok(act) => finish(ix, Cell::action(act)),
                Err(err) => Bounce::Panic(err),
            }
        }
        _ => Bounce::Panic(ErrorValue::bare(ErrorId::Internal)),
    }
}


// -- registration

fn register(
    ix: &mut Interp,
    name: &str,
    infix: InfixMode,
    params: Vec<Rc<Param>>,
    dispatcher: action::Dispatcher,
    returns: TypeSet,
) -> Raised<Action> {
    let sym = ix.symbols.intern(name);
    let act = make_action(Some(sym.clone()), params, dispatcher, infix, returns, vec![]);
    ix.user_context().define(&sym, Cell::action(act.clone()))?;
    Ok(act)
}

pub fn boot(ix: &mut Interp) -> Raised<()> {
    let s = |ix: &mut Interp, t: &str| ix.symbols.intern(t);

    for &(word, dispatcher) in [
        ("add", add_dispatcher as action::Dispatcher),
        ("subtract", subtract_dispatcher),
        ("multiply", multiply_dispatcher),
        ("divide", divide_dispatcher),
    ]
    .iter()
    {
        let a = s(ix, "a");
        let b = s(ix, "b");
        register(
            ix,
            word,
            InfixMode::Prefix,
            vec![Param::normal(a, numeric()), Param::normal(b, numeric())],
            dispatcher,
            numeric(),
        )?;
    }
    for &(word, dispatcher) in [
        ("+", add_dispatcher as action::Dispatcher),
        ("-", subtract_dispatcher),
        ("*", multiply_dispatcher),
        ("/", divide_dispatcher),
    ]
    .iter()
    {
        let a = s(ix, "a");
        let b = s(ix, "b");
        register(
            ix,
            word,
            InfixMode::Infix,
            vec![Param::normal(a, numeric()), Param::normal(b, numeric())],
            dispatcher,
            numeric(),
        )?;
    }

    let a = s(ix, "a");
    let b = s(ix, "b");
    register(
        ix,
        "equal?",
        InfixMode::Prefix,
        vec![Param::normal(a.clone(), any_stable()), Param::normal(b.clone(), any_stable())],
        equal_dispatcher,
        BitFlags::from_flag(TypeTag::Logic),
    )?;
    register(
        ix,
        "=",
        InfixMode::Infix,
        vec![Param::normal(a.clone(), any_stable()), Param::normal(b.clone(), any_stable())],
        equal_dispatcher,
        BitFlags::from_flag(TypeTag::Logic),
    )?;
    register(
        ix,
        "lesser?",
        InfixMode::Prefix,
        vec![Param::normal(a.clone(), numeric()), Param::normal(b.clone(), numeric())],
        lesser_dispatcher,
        BitFlags::from_flag(TypeTag::Logic),
    )?;
    register(
        ix,
        "<",
        InfixMode::Infix,
        vec![Param::normal(a.clone(), numeric()), Param::normal(b.clone(), numeric())],
        lesser_dispatcher,
        BitFlags::from_flag(TypeTag::Logic),
    )?;
    register(
        ix,
        ">",
        InfixMode::Infix,
        vec![Param::normal(a, numeric()), Param::normal(b, numeric())],
        greater_dispatcher,
        BitFlags::from_flag(TypeTag::Logic),
    )?;

    let cond = s(ix, "condition");
    let branch = s(ix, "branch");
    register(
        ix,
        "if",
        InfixMode::Prefix,
        vec![
            Param::normal(cond.clone(), any_stable()),
            Param::normal(branch.clone(), BitFlags::from_flag(TypeTag::Block)),
        ],
        if_dispatcher,
        BitFlags::empty(),
    )?;

    let true_branch = s(ix, "true-branch");
    let false_branch = s(ix, "false-branch");
    register(
        ix,
        "either",
        InfixMode::Prefix,
        vec![
            Param::normal(cond, any_stable()),
            Param::normal(true_branch, BitFlags::from_flag(TypeTag::Block)),
            Param::normal(false_branch, BitFlags::from_flag(TypeTag::Block)),
        ],
        either_dispatcher,
        BitFlags::empty(),
    )?;

    let source = s(ix, "source");
    register(
        ix,
        "do",
        InfixMode::Prefix,
        vec![Param::normal(source.clone(), BitFlags::from_flag(TypeTag::Block))],
        do_dispatcher,
        BitFlags::empty(),
    )?;
    // Stepping over group or frame values is not supported; eval takes
    // the same block-only source do does.
    register(
        ix,
        "eval",
        InfixMode::Prefix,
        vec![Param::normal(source, BitFlags::from_flag(TypeTag::Block))],
        do_dispatcher,
        BitFlags::empty(),
    )?;

    let reason = s(ix, "reason");
    register(
        ix,
        "panic",
        InfixMode::Prefix,
        vec![Param::normal(reason, any_stable())],
        panic_dispatcher,
        BitFlags::empty(),
    )?;

    let target = s(ix, "target");
    let value = s(ix, "value");
    register(
        ix,
        "unwind",
        InfixMode::Prefix,
        vec![
            Param::normal(target, BitFlags::from_flag(TypeTag::Frame)),
            Param::normal(value, any_stable()),
        ],
        unwind_dispatcher,
        BitFlags::empty(),
    )?;

    register(
        ix,
        "halt?",
        InfixMode::Prefix,
        vec![],
        halt_query_dispatcher,
        BitFlags::from_flag(TypeTag::Logic),
    )?;

    let count = s(ix, "count");
    let body = s(ix, "body");
    register(
        ix,
        "loop",
        InfixMode::Prefix,
        vec![
            Param::normal(count, BitFlags::from_flag(TypeTag::Integer)),
            Param::normal(body.clone(), BitFlags::from_flag(TypeTag::Block)),
        ],
        loop_dispatcher,
        BitFlags::empty(),
    )?;

    let spec = s(ix, "spec");
    register(
        ix,
        "func",
        InfixMode::Prefix,
        vec![
            Param::normal(spec, BitFlags::from_flag(TypeTag::Block)),
            Param::normal(body, BitFlags::from_flag(TypeTag::Block)),
        ],
        func_dispatcher,
        BitFlags::from_flag(TypeTag::ActionAnti),
    )?;

    let series = s(ix, "series");
    let value = s(ix, "value");
    let dup = s(ix, "dup");
    let part = s(ix, "part");
    register(
        ix,
        "append",
        InfixMode::Prefix,
        vec![
            Param::normal(series, BitFlags::from_flag(TypeTag::Block)),
            Param::normal(value, any_element() | TypeTag::SpliceAnti),
            Param::refinement(dup, BitFlags::from_flag(TypeTag::Integer)),
            Param::refinement(part, BitFlags::from_flag(TypeTag::Integer)),
        ],
        append_dispatcher,
        BitFlags::from_flag(TypeTag::Block),
    )?;

    let act = s(ix, "action");
    let def = s(ix, "def");
    register(
        ix,
        "specialize",
        InfixMode::Prefix,
        vec![
            Param::normal(act, TypeTag::Frame | TypeTag::ActionAnti),
            Param::normal(def, BitFlags::from_flag(TypeTag::Block)),
        ],
        specialize_native_dispatcher,
        BitFlags::from_flag(TypeTag::ActionAnti),
    )?;

    log::debug!("boot registered {} words", ix.symbols.len());
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tunables;
    use pretty_assertions::assert_eq;

    fn interp() -> Interp {
        Interp::startup(Tunables::default())
    }

    #[test]
    fn test_prefix_arithmetic() {
        let mut ix = interp();
        let out = ix.eval_text("add 1 multiply 2 3").unwrap();
        assert_eq!(out, Cell::integer(7));
    }

    #[test]
    fn test_infix_runs_left_to_right() {
        let mut ix = interp();
        let out = ix.eval_text("1 + 2 * 3").unwrap();
        assert_eq!(out, Cell::integer(9));
    }

    #[test]
    fn test_if_truthy_branch() {
        let mut ix = interp();
        assert_eq!(ix.eval_text("if 1 < 2 [5]").unwrap(), Cell::integer(5));
        assert!(ix.eval_text("if 2 < 1 [5]").unwrap().is_null());
    }

    #[test]
    fn test_branch_null_becomes_heavy() {
        let mut ix = interp();
        let out = ix.eval_text("if 1 < 2 [~null~]").unwrap();
        assert_eq!(out.antiform_kind(), Some(Anti::Pack));
        assert!(out.decay().unwrap().is_null());
    }

    #[test]
    fn test_either_picks_branches() {
        let mut ix = interp();
        assert_eq!(
            ix.eval_text("either 1 < 2 [\"yes\"] [\"no\"]").unwrap(),
            Cell::text("yes")
        );
        assert_eq!(
            ix.eval_text("either 2 < 1 [\"yes\"] [\"no\"]").unwrap(),
            Cell::text("no")
        );
    }

    #[test]
    fn test_set_words_and_do() {
        let mut ix = interp();
        assert_eq!(ix.eval_text("x: 4 do [x + 1]").unwrap(), Cell::integer(5));
    }

    #[test]
    fn test_groups_evaluate_inline() {
        let mut ix = interp();
        assert_eq!(ix.eval_text("2 * (1 + 3)").unwrap(), Cell::integer(8));
    }

    #[test]
    fn test_user_function_with_return() {
        let mut ix = interp();
        let out = ix
            .eval_text("f: func [x] [do [do [do [return x + 1]]]] f 10")
            .unwrap();
        assert_eq!(out, Cell::integer(11));
    }

    #[test]
    fn test_recursive_function() {
        let mut ix = interp();
        let out = ix
            .eval_text(
                "fact: func [n] [either n = 0 [1] [n * fact (n - 1)]] fact 10",
            )
            .unwrap();
        assert_eq!(out, Cell::integer(3628800));
    }

    #[test]
    fn test_append_plain() {
        let mut ix = interp();
        let out = ix.eval_text("append [1 2 3] 9").unwrap();
        let cells = out.as_series().unwrap().cells();
        assert_eq!(
            cells,
            vec![
                Cell::integer(1),
                Cell::integer(2),
                Cell::integer(3),
                Cell::integer(9)
            ]
        );
    }

    #[test]
    fn test_specialize_native() {
        let mut ix = interp();
        let out = ix
            .eval_text("ap: specialize :append [dup: 2] ap [1 2] 9")
            .unwrap();
        let cells = out.as_series().unwrap().cells();
        assert_eq!(
            cells,
            vec![
                Cell::integer(1),
                Cell::integer(2),
                Cell::integer(9),
                Cell::integer(9)
            ]
        );
    }

    #[test]
    fn test_loop_runs_count_times() {
        let mut ix = interp();
        let out = ix
            .eval_text("total: 0 loop 5 [total: total + 2] total")
            .unwrap();
        assert_eq!(out, Cell::integer(10));
    }

    fn echo_dispatcher(ix: &mut Interp) -> Bounce {
        let v = frame_slot(ix, 0);
        finish(ix, v)
    }

    #[test]
    fn test_just_parameter_takes_element_verbatim() {
        let mut ix = interp();
        let x = ix.symbols.intern("x");
        register(
            &mut ix,
            "quote-it",
            InfixMode::Prefix,
            vec![Param::just(x, any_element())],
            echo_dispatcher,
            BitFlags::empty(),
        )
        .unwrap();
        let out = ix.eval_text("quote-it some-word").unwrap();
        assert!(matches!(out.heart, Heart::Word(_)));
    }

    #[test]
    fn test_soft_parameter_evaluates_groups_only() {
        let mut ix = interp();
        let x = ix.symbols.intern("x");
        register(
            &mut ix,
            "softly",
            InfixMode::Prefix,
            vec![Param::soft(x, any_stable())],
            echo_dispatcher,
            BitFlags::empty(),
        )
        .unwrap();
        assert_eq!(ix.eval_text("softly (1 + 2)").unwrap(), Cell::integer(3));
        assert_eq!(ix.eval_text("softly 7").unwrap(), Cell::integer(7));
        assert!(matches!(
            ix.eval_text("softly some-word").unwrap().heart,
            Heart::Word(_)
        ));
    }

    #[test]
    fn test_meta_parameter_stores_lifted() {
        use crate::value::LIFT_PLAIN;

        let mut ix = interp();
        let x = ix.symbols.intern("x");
        register(
            &mut ix,
            "meta-of",
            InfixMode::Prefix,
            vec![Param::meta(x, any_stable())],
            echo_dispatcher,
            BitFlags::empty(),
        )
        .unwrap();
        let out = ix.eval_text("meta-of 3").unwrap();
        assert_eq!(out.lift, LIFT_PLAIN + 2);
        assert_eq!(out.unlifted().unwrap(), Cell::integer(3));
    }

    #[test]
    fn test_divide_by_zero_is_abrupt_but_rescued() {
        let mut ix = interp();
        let err = ix.eval_text("1 / 0").unwrap_err();
        assert_eq!(err.id, ErrorId::AbruptPanic);
        // The next evaluation runs normally.
        assert_eq!(ix.eval_text("1 + 1").unwrap(), Cell::integer(2));
    }

    #[test]
    fn test_panic_native_is_cooperative() {
        let mut ix = interp();
        let err = ix.eval_text("panic \"boom\"").unwrap_err();
        assert!(err.message.contains("boom"));
        // Cooperative panics unwind cleanly; evaluation continues.
        assert_eq!(ix.eval_text("2 + 2").unwrap(), Cell::integer(4));
    }

    #[test]
    fn test_halt_query_tests_and_clears() {
        let mut ix = interp();
        ix.request_halt();
        assert_eq!(ix.eval_text("halt?").unwrap(), Cell::logic(true));
        assert_eq!(ix.eval_text("halt?").unwrap(), Cell::logic(false));
    }

    #[test]
    fn test_eval_is_block_only() {
        let mut ix = interp();
        assert_eq!(ix.eval_text("eval [1 + 2]").unwrap(), Cell::integer(3));
        let err = ix.eval_text("eval 5").unwrap_err();
        assert_eq!(err.id, ErrorId::TypeCheck);
    }

    #[test]
    fn test_unbound_word_errors() {
        let mut ix = interp();
        let err = ix.eval_text("nonesuch").unwrap_err();
        assert_eq!(err.id, ErrorId::NotBound);
    }

    #[test]
    fn test_missing_argument_errors() {
        let mut ix = interp();
        let err = ix.eval_text("add 1").unwrap_err();
        assert_eq!(err.id, ErrorId::ArityShort);
    }
}
