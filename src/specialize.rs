// Specialization and application.
//
// Specialization takes a base action plus a definition block assigning
// some of its parameters, and produces a new action exposing only what
// remains. Refinements named on the ordering stack but left unfilled
// become the new action's partials: a priority-ordered list, highest
// priority last, that both invocation and application honor.
//
// Application fills a frame directly from an argument block: one
// positional expression per open slot in effective order, `name:`
// prefixes for out-of-order fills, commas as separators.

use std::rc::Rc;

use crate::action::{
    self, Action, ActionDef, ActionState, InfixMode, Param, VarList,
};
use crate::api::Interp;
use crate::env::Context;
use crate::error::{arity_short, ErrorId, ErrorValue, Raised};
use crate::feed::Feed;
use crate::flex::{Array, Flavor};
use crate::level::{Level, OutDest};
use crate::symbol::Symbol;
use crate::trampoline::Bounce;
use crate::value::{Cell, Heart, LIFT_PLAIN};


// Step 1 of the algorithm: a fresh varlist sharing the base keylist,
// seeded from the base's own (possibly specialized) paramlist, with
// ordered parameter-less refinements turned on immediately.
pub fn begin_specialize(base: &Action, orders: &[Symbol]) -> Raised<Rc<VarList>> {
    let n = base.keylist.len();
    let mut slots = Vec::with_capacity(n);
    for i in 0..n {
        let cell = base
            .paramlist
            .get(i)
            .ok_or_else(|| ErrorValue::bare(ErrorId::Internal))?;
        if !cell.is_unspecialized_param() {
            slots.push(cell.copied());
            continue;
        }
        let param = cell.as_param().expect("param cell");
        let ordered = orders.iter().any(|sym| sym == &param.name);
        if ordered && param.is_refinement() && !param.takes_arg() {
            slots.push(Cell::ok());
        } else {
            slots.push(cell);
        }
    }
    Ok(VarList::new(base.keylist.clone(), slots, base.clone()))
}


// Steps 3-6: typecheck what the definition block filled, gather the
// partials in ordering-stack priority, demote infix if its operand
// slot got fixed, and produce the new action around the exemplar.
pub fn finish_specialize(
    ix: &mut Interp,
    base: &Action,
    varlist: Rc<VarList>,
    orders: &[Symbol],
) -> Raised<Action> {
    let n = base.keylist.len();
    for i in 0..n {
        let param = match action::open_param(base, i) {
            Some(param) => param,
            None => continue,
        };
        let slot = varlist.slot(i);
        if slot.is_unspecialized_param() {
            continue;
        }
        if param.is_local() {
            return Err(ErrorValue::bare(ErrorId::LocalSpecialized));
        }
        action::typecheck_arg(
            base.label.as_ref(),
            base.keylist.key(i),
            &param,
            &slot,
        )?;
    }

    // Partials build through the data stack: lowest priority pushed
    // first so the drained array keeps highest priority last.
    let before = ix.ds_depth();
    for sym in orders.iter().rev() {
        let i = match base.keylist.index_of(sym) {
            Some(i) => i,
            None => {
                return Err(ErrorValue::new(
                    ErrorId::BadRefinement,
                    format!("no parameter named {}", sym.text()),
                ));
            }
        };
        let still_open = varlist.slot(i).is_unspecialized_param();
        let partial_worthy = action::open_param(base, i)
            .map_or(false, |p| p.is_refinement() && p.takes_arg());
        if still_open && partial_worthy {
            ix.ds_push(Cell::word(sym.clone()))?;
        }
    }
    let mut cells = Vec::new();
    while ix.ds_depth() > before {
        cells.push(ix.ds_pop().expect("data stack drained early"));
    }
    cells.reverse();
    let partials = if cells.is_empty() {
        None
    } else {
        Some(Array::with_flavor(Flavor::Partials, cells))
    };

    // Specializing out an infix action's operand demotes it to prefix.
    let mut infix = base.infix;
    if infix != InfixMode::Prefix {
        let operand_fixed = match action::evars_order(base).first() {
            Some(&i) => !varlist.slot(i).is_unspecialized_param(),
            None => true,
        };
        if operand_fixed {
            infix = InfixMode::Prefix;
        }
    }

    let paramlist = Array::with_flavor(Flavor::ParamList, varlist.snapshot());
    Ok(Rc::new(ActionDef {
        dispatcher: specializer_dispatcher,
        keylist: base.keylist.clone(),
        paramlist,
        partials,
        details: vec![Cell::action(base.clone())],
        hostfn: None,
        infix,
        label: base.label.clone(),
        returns: base.returns,
    }))
}


// The synthesized dispatcher of every specialized action: its per-call
// varlist was already seeded from the exemplar, so all that remains is
// installing the base phase and re-entering without a recheck.
pub fn specializer_dispatcher(ix: &mut Interp) -> Bounce {
    let top = ix.top();
    let mut level = top.borrow_mut();
    let state = level.action_state();
    let base = match state.action.details.first().and_then(|c| c.as_action()) {
        Some(base) => base,
        None => {
            return Bounce::Panic(ErrorValue::new(
                ErrorId::Internal,
                "specialized action lost its base",
            ));
        }
    };
    state.varlist.set_phase(base.clone());
    state.action = base;
    Bounce::RedoUnchecked
}


pub fn first_unspecialized_param(action: &Action) -> Option<Rc<Param>> {
    action::evars_order(action)
        .first()
        .and_then(|&i| action::open_param(action, i))
}

pub fn last_unspecialized_param(action: &Action) -> Option<Rc<Param>> {
    action::evars_order(action)
        .last()
        .and_then(|&i| action::open_param(action, i))
}


impl Interp {
    // Specialize from the host: evaluate the definition block with its
    // set-words bound into the fresh varlist, then seal the exemplar.
    pub fn specialize(
        &mut self,
        action_cell: &Cell,
        def: Option<&Cell>,
        orders: &[Symbol],
    ) -> Raised<Cell> {
        let base = action::to_action(action_cell)?;
        let varlist = begin_specialize(&base, orders)?;
        if let Some(block) = def {
            let series = block
                .as_series()
                .ok_or_else(|| ErrorValue::bare(ErrorId::TypeCheck))?
                .clone();
            let parent = block.binding.clone().or_else(|| Some(self.user_context()));
            let binder = Context::frame(varlist.clone(), parent);
            let feed = Feed::array(series, Some(binder));
            self.run_root(Level::evaluator(feed, OutDest::Root))?;
        }
        let action = finish_specialize(self, &base, varlist, orders)?;
        Ok(Cell::action(action))
    }

    // Apply an argument block to a (possibly specialized) action.
    pub fn apply(
        &mut self,
        action_cell: &Cell,
        block: &Cell,
        strict: bool,
    ) -> Raised<Cell> {
        let invoked = action::to_action(action_cell)?;
        let (varlist, params) =
            action::build_invocation_varlist(&mut self.symbols, &invoked)?;
        let evars = action::evars_order(&invoked);

        let series = block
            .as_series()
            .ok_or_else(|| ErrorValue::bare(ErrorId::TypeCheck))?
            .clone();
        let binding = block.binding.clone().or_else(|| Some(self.user_context()));
        let feed = Feed::array(series, binding);

        let mut pos = 0usize;
        loop {
            let cell = match self.feed_current(&feed)? {
                None => break,
                Some(cell) => cell,
            };
            if matches!(cell.heart, Heart::Comma) && cell.lift == LIFT_PLAIN {
                self.feed_advance(&feed)?;
                continue;
            }
            if let Heart::SetWord(sym) = &cell.heart {
                let sym = sym.clone();
                self.feed_advance(&feed)?;
                let index = invoked.keylist.index_of(&sym).ok_or_else(|| {
                    ErrorValue::new(
                        ErrorId::BadRefinement,
                        format!("no parameter named {}", sym.text()),
                    )
                })?;
                let param = params[index].clone().ok_or_else(|| {
                    ErrorValue::new(
                        ErrorId::BadRefinement,
                        format!("{} is already specialized", sym.text()),
                    )
                })?;
                if param.is_local() {
                    return Err(ErrorValue::bare(ErrorId::LocalSpecialized));
                }
                let value = self.eval_one_expression(&feed)?;
                fill_apply_slot(&invoked, &param, index, value, &varlist)?;
                continue;
            }

            let value = self.eval_one_expression(&feed)?;
            if value.is_ghost() {
                continue;
            }
            if pos >= evars.len() {
                if strict {
                    return Err(ErrorValue::bare(ErrorId::ApplyTooMany));
                }
                continue;
            }
            let index = evars[pos];
            pos += 1;
            let param = params[index].clone().expect("open slot has param");
            fill_apply_slot(&invoked, &param, index, value, &varlist)?;
        }

        // Unfilled refinements revoke; unfilled ordinary parameters
        // are an arity error.
        for i in 0..invoked.keylist.len() {
            if !varlist.slot(i).is_unspecialized_param() {
                continue;
            }
            let param = params[i].clone().expect("open slot has param");
            if param.is_refinement() {
                varlist.set_slot(i, Cell::null())?;
            } else if !param.is_local() {
                return Err(arity_short(
                    invoked.label.as_ref().map_or("anonymous", |l| l.text()),
                    param.name.text(),
                ));
            }
        }

        let state = ActionState {
            action: invoked.clone(),
            original: invoked,
            varlist,
            params,
            order: Vec::new(),
            pos: 0,
            left: None,
            fulfilling: None,
            native_state: 0,
        };
        let feed = self.empty_feed();
        self.run_root(Level::action(state, feed, OutDest::Root))
    }

    // Run a single expression from the feed to completion.
    pub(crate) fn eval_one_expression(&mut self, feed: &Rc<Feed>) -> Raised<Cell> {
        self.run_root(Level::stepper(feed.clone(), OutDest::Root))
    }
}


fn fill_apply_slot(
    invoked: &Action,
    param: &Rc<Param>,
    index: usize,
    value: Cell,
    varlist: &Rc<VarList>,
) -> Raised<()> {
    // A parameter-less refinement takes a truthiness toggle.
    if param.is_refinement() && !param.takes_arg() {
        let on = value.is_truthy()?;
        return varlist.set_slot(index, if on { Cell::ok() } else { Cell::null() });
    }
    let coerced = action::coerce_for_class(param, value, false)?;
    action::typecheck_arg(
        invoked.label.as_ref(),
        invoked.keylist.key(index),
        param,
        &coerced,
    )?;
    varlist.set_slot(index, coerced)
}
