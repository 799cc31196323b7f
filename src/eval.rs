// The stepper and block-evaluator executors.
//
// The stepper evaluates exactly one expression from its feed into its
// out cell: literals self-evaluate, words fetch (invoking action
// antiforms), set-words assign the next evaluated product, get-words
// fetch without invoking, groups push a sub-evaluator, quoted elements
// shed a quote. After each product the stepper peeks ahead for an
// infix action and, finding one, hands the product over as its left
// operand.
//
// The block evaluator runs steppers until the feed is exhausted,
// keeping the last non-ghost product.

use crate::action;
use crate::action::InfixMode;
use crate::api::Interp;
use crate::error::{not_bound, unset, ErrorId, ErrorValue};
use crate::feed::Feed;
use crate::level::{Level, LevelKind, OutDest};
use crate::trampoline::Bounce;
use crate::value::{Cell, Heart, Keyword, LIFT_ANTIFORM, LIFT_QUASI};


const ST_STEP_INITIAL: u8 = 0;
const ST_STEP_AFTER: u8 = 1;
const ST_STEP_SET: u8 = 2;

const ST_EVAL_INITIAL: u8 = 0;
const ST_EVAL_STEPPING: u8 = 1;


pub fn stepper_executor(ix: &mut Interp) -> Bounce {
    let state = ix.top().borrow().state;
    match state {
        ST_STEP_INITIAL => step_begin(ix),
        ST_STEP_AFTER => lookahead(ix),
        ST_STEP_SET => finish_set(ix),
        _ => Bounce::Panic(ErrorValue::new(
            ErrorId::Internal,
            "stepper in impossible state",
        )),
    }
}


fn step_begin(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let feed = top.borrow().feed.clone();

    let elem = match ix.feed_take(&feed) {
        Err(err) => return Bounce::Panic(err),
        Ok(None) => {
            let mut level = top.borrow_mut();
            level.state = ST_STEP_AFTER;
            level.out = Cell::ghost();
            return Bounce::Out;
        }
        Ok(Some(elem)) => elem,
    };

    // Values spliced by the API arrive as antiforms; an action antiform
    // invokes, anything else passes through as-is.
    if elem.is_antiform() {
        if let Some(act) = elem.as_action() {
            top.borrow_mut().state = ST_STEP_AFTER;
            return match action::push_action_invocation(
                ix, act, feed, None, None, OutDest::ParentOut,
            ) {
                Ok(()) => Bounce::Continue,
                Err(err) => Bounce::Panic(err),
            };
        }
        let mut level = top.borrow_mut();
        level.state = ST_STEP_AFTER;
        level.out = elem;
        return Bounce::Out;
    }

    if elem.is_quoted() {
        let mut level = top.borrow_mut();
        level.state = ST_STEP_AFTER;
        level.out = elem.unquoted().expect("quoted cell unquotes");
        drop(level);
        return lookahead(ix);
    }

    if elem.lift == LIFT_QUASI {
        let mut anti = elem.clone();
        anti.lift = LIFT_ANTIFORM;
        // Quasi keywords become the built-in word antiforms.
        if let Heart::Word(sym) = &elem.heart {
            if let Some(keyword) = Keyword::from_spelling(sym.folded()) {
                anti = match keyword {
                    Keyword::Null => Cell::null(),
                    Keyword::Ok => Cell::ok(),
                    Keyword::Void => Cell::void(),
                };
            }
        }
        let mut level = top.borrow_mut();
        level.state = ST_STEP_AFTER;
        level.out = anti;
        drop(level);
        return lookahead(ix);
    }

    match elem.heart.clone() {
        Heart::Comma => {
            let mut level = top.borrow_mut();
            level.state = ST_STEP_AFTER;
            level.out = Cell::ghost();
            Bounce::Out
        }
        Heart::Word(sym) => {
            let binding = elem.binding.clone().or_else(|| feed.binding());
            let looked = binding.and_then(|b| b.get(&sym));
            match looked {
                None => Bounce::Panic(not_bound(sym.text())),
                Some(v) if v.is_tripwire() => Bounce::Panic(unset(sym.text())),
                Some(v) => {
                    if let Some(act) = v.as_action() {
                        top.borrow_mut().state = ST_STEP_AFTER;
                        match action::push_action_invocation(
                            ix,
                            act,
                            feed,
                            Some(sym),
                            None,
                            OutDest::ParentOut,
                        ) {
                            Ok(()) => Bounce::Continue,
                            Err(err) => Bounce::Panic(err),
                        }
                    } else {
                        let mut level = top.borrow_mut();
                        level.state = ST_STEP_AFTER;
                        level.out = v;
                        drop(level);
                        lookahead(ix)
                    }
                }
            }
        }
        Heart::SetWord(_) => {
            {
                let mut level = top.borrow_mut();
                level.state = ST_STEP_SET;
                level.scratch = elem;
            }
            ix.push_level(Level::stepper(feed, OutDest::ParentOut));
            Bounce::Continue
        }
        Heart::GetWord(sym) => {
            let binding = elem.binding.clone().or_else(|| feed.binding());
            match binding.and_then(|b| b.get(&sym)) {
                None => Bounce::Panic(not_bound(sym.text())),
                Some(v) => {
                    let mut level = top.borrow_mut();
                    level.state = ST_STEP_AFTER;
                    level.out = v;
                    drop(level);
                    lookahead(ix)
                }
            }
        }
        Heart::Group(series) => {
            let binding = elem.binding.clone().or_else(|| feed.binding());
            top.borrow_mut().state = ST_STEP_AFTER;
            ix.push_level(Level::evaluator(
                Feed::array(series, binding),
                OutDest::ParentOut,
            ));
            Bounce::Continue
        }
        _ => {
            let mut level = top.borrow_mut();
            level.state = ST_STEP_AFTER;
            level.out = elem;
            drop(level);
            lookahead(ix)
        }
    }
}


// Is this stepper fulfilling an argument of an infix action? Its
// product then takes one step only; chaining resumes at the level
// holding the left operand, which keeps operators left-to-right.
fn fulfilling_infix_arg(ix: &Interp) -> bool {
    let depth = ix.level_depth();
    if depth < 2 {
        return false;
    }
    let parent = ix.levels[depth - 2].borrow();
    if parent.state != action::ST_FULFILLING {
        return false;
    }
    match &parent.kind {
        LevelKind::Action(state) => state.original.infix != InfixMode::Prefix,
        _ => false,
    }
}


// Infix lookahead: if the next element is a word bound to a non-prefix
// action, the product so far becomes that action's left operand.
fn lookahead(ix: &mut Interp) -> Bounce {
    if fulfilling_infix_arg(ix) {
        return Bounce::Out;
    }
    let top = ix.top();
    let feed = top.borrow().feed.clone();

    let peek = match ix.feed_current(&feed) {
        Err(err) => return Bounce::Panic(err),
        Ok(peek) => peek,
    };
    let cell = match peek {
        Some(cell) => cell,
        None => return Bounce::Out,
    };
    if !cell.is_element() || cell.is_quoted() || cell.lift == LIFT_QUASI {
        return Bounce::Out;
    }
    let sym = match &cell.heart {
        Heart::Word(sym) => sym.clone(),
        _ => return Bounce::Out,
    };
    let binding = cell.binding.clone().or_else(|| feed.binding());
    let looked = match binding.and_then(|b| b.get(&sym)) {
        Some(v) => v,
        None => return Bounce::Out,
    };
    let act = match looked.as_action() {
        Some(act) => act,
        None => return Bounce::Out,
    };
    if act.infix == InfixMode::Prefix {
        return Bounce::Out;
    }

    if let Err(err) = ix.feed_advance(&feed) {
        return Bounce::Panic(err);
    }
    let left = {
        let mut level = top.borrow_mut();
        std::mem::replace(&mut level.out, Cell::erased())
    };
    match action::push_action_invocation(
        ix,
        act,
        feed,
        Some(sym),
        Some(left),
        OutDest::ParentOut,
    ) {
        Ok(()) => Bounce::Continue,
        Err(err) => Bounce::Panic(err),
    }
}


fn finish_set(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let (product, setword, feed) = {
        let level = top.borrow();
        (level.out.clone(), level.scratch.clone(), level.feed.clone())
    };
    let value = match product.decay() {
        Err(err) => return Bounce::Panic(err),
        Ok(value) => value,
    };
    let sym = setword.as_word().expect("set-word scratch").clone();
    let binding = setword
        .binding
        .clone()
        .or_else(|| feed.binding())
        .unwrap_or_else(|| ix.user_context());
    if let Err(err) = binding.set(&sym, value.clone()) {
        return Bounce::Panic(err);
    }
    let mut level = top.borrow_mut();
    level.out = value;
    Bounce::Out
}


pub fn evaluator_executor(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let state = top.borrow().state;
    match state {
        ST_EVAL_INITIAL => {
            let feed = top.borrow().feed.clone();
            match ix.feed_at_end(&feed) {
                Err(err) => Bounce::Panic(err),
                Ok(true) => {
                    let mut level = top.borrow_mut();
                    level.state = ST_EVAL_STEPPING;
                    level.out = Cell::ghost();
                    Bounce::Out
                }
                Ok(false) => {
                    top.borrow_mut().state = ST_EVAL_STEPPING;
                    ix.push_level(Level::stepper(feed, OutDest::ParentOut));
                    Bounce::Continue
                }
            }
        }
        ST_EVAL_STEPPING => {
            let (arrived, feed) = {
                let mut level = top.borrow_mut();
                let arrived = level.out.clone();
                if !arrived.is_ghost() {
                    level.spare = arrived.clone();
                }
                (arrived, level.feed.clone())
            };
            match ix.feed_at_end(&feed) {
                Err(err) => Bounce::Panic(err),
                Ok(true) => {
                    let mut level = top.borrow_mut();
                    if arrived.is_ghost() && level.spare.is_readable() {
                        level.out = level.spare.clone();
                    }
                    Bounce::Out
                }
                Ok(false) => {
                    ix.push_level(Level::stepper(feed, OutDest::ParentOut));
                    Bounce::Continue
                }
            }
        }
        _ => Bounce::Panic(ErrorValue::new(
            ErrorId::Internal,
            "evaluator in impossible state",
        )),
    }
}
