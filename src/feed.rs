// Feeds.
//
// A feed is the lazy cursor every level evaluates from. The source is
// either a position in a cell array, or the heterogeneous splice of a
// variadic API call: text chunks (scanned into elements on demand),
// cells, and one-shot instructions. Feeds are reference-counted so a
// sublevel can share its parent's source; dropping the last reference
// runs variadic termination exactly once.
//
// Tokens never span text chunks. Feed creation probes the raw chunk
// boundaries and fails with ScanSplitToken when two adjacent chunks
// would have to be glued to finish a token.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::api::ApiHandle;
use crate::env::Context;
use crate::error::{ErrorId, ErrorValue, Raised};
use crate::scan;
use crate::symbol::SymbolTable;
use crate::value::{Cell, Heart, Series};


// A variadic splice element, already owned by the feed.
#[derive(Debug)]
pub enum Splice {
    Text(String),
    Cell(Cell),
}


enum Source {
    Array { array: Rc<crate::flex::Array>, index: usize },
    Variadic { items: VecDeque<Splice> },
}


struct FeedState {
    source: Source,
    // Elements scanned or spliced but not yet consumed.
    queue: VecDeque<Cell>,
    current: Option<Cell>,
    primed: bool,
    terminated: bool,
}


pub struct Feed {
    binding: RefCell<Option<Rc<Context>>>,
    state: RefCell<FeedState>,
    // Handles the variadic termination must release.
    releasing: RefCell<Vec<ApiHandle>>,
}


impl Feed {
    pub fn array(series: Series, binding: Option<Rc<Context>>) -> Rc<Feed> {
        Rc::new(Feed {
            binding: RefCell::new(binding),
            state: RefCell::new(FeedState {
                source: Source::Array {
                    array: series.array,
                    index: series.index,
                },
                queue: VecDeque::new(),
                current: None,
                primed: false,
                terminated: false,
            }),
            releasing: RefCell::new(Vec::new()),
        })
    }

    pub fn variadic(
        items: Vec<Splice>,
        releasing: Vec<ApiHandle>,
        binding: Option<Rc<Context>>,
    ) -> Raised<Rc<Feed>> {
        // No token may straddle two text chunks.
        for pair in items.windows(2) {
            if let (Splice::Text(a), Splice::Text(b)) = (&pair[0], &pair[1]) {
                if scan::ends_mid_token(a) && scan::starts_mid_token(b) {
                    return Err(ErrorValue::bare(ErrorId::ScanSplitToken));
                }
            }
        }
        Ok(Rc::new(Feed {
            binding: RefCell::new(binding),
            state: RefCell::new(FeedState {
                source: Source::Variadic { items: items.into() },
                queue: VecDeque::new(),
                current: None,
                primed: false,
                terminated: false,
            }),
            releasing: RefCell::new(releasing),
        }))
    }

    pub fn binding(&self) -> Option<Rc<Context>> {
        self.binding.borrow().clone()
    }

    pub fn set_binding(&self, ctx: Option<Rc<Context>>) {
        *self.binding.borrow_mut() = ctx;
    }

    // Make sure `current` reflects the next unconsumed element.
    fn prime(&self, symbols: &mut SymbolTable) -> Raised<()> {
        let mut state = self.state.borrow_mut();
        if state.primed {
            return Ok(());
        }
        loop {
            if let Some(cell) = state.queue.pop_front() {
                state.current = Some(cell);
                state.primed = true;
                return Ok(());
            }
            match &mut state.source {
                Source::Array { array, index } => {
                    match array.get(*index) {
                        Some(cell) => {
                            *index += 1;
                            state.current = Some(cell);
                        }
                        None => {
                            state.current = None;
                            state.terminated = true;
                        }
                    }
                    state.primed = true;
                    return Ok(());
                }
                Source::Variadic { items } => match items.pop_front() {
                    None => {
                        state.current = None;
                        state.primed = true;
                        state.terminated = true;
                        drop(state);
                        self.run_termination();
                        return Ok(());
                    }
                    Some(Splice::Cell(cell)) => {
                        state.current = Some(cell);
                        state.primed = true;
                        return Ok(());
                    }
                    Some(Splice::Text(chunk)) => {
                        let cells = scan::scan_chunk(symbols, &chunk)?;
                        state.queue.extend(cells);
                        // Loop around; the chunk may have been empty.
                    }
                },
            }
        }
    }

    pub fn current(&self, symbols: &mut SymbolTable) -> Raised<Option<Cell>> {
        self.prime(symbols)?;
        Ok(self.state.borrow().current.clone())
    }

    pub fn advance(&self, symbols: &mut SymbolTable) -> Raised<()> {
        self.prime(symbols)?;
        let mut state = self.state.borrow_mut();
        state.current = None;
        state.primed = false;
        Ok(())
    }

    // Consume and return the current element, with the feed's binding
    // attached to anything bindable that arrived unbound.
    pub fn take(&self, symbols: &mut SymbolTable) -> Raised<Option<Cell>> {
        let cell = match self.current(symbols)? {
            None => return Ok(None),
            Some(cell) => cell,
        };
        self.advance(symbols)?;
        Ok(Some(self.derelativize(cell)))
    }

    // Like take, but the element keeps exactly the binding it had.
    pub fn take_verbatim(&self, symbols: &mut SymbolTable) -> Raised<Option<Cell>> {
        let cell = match self.current(symbols)? {
            None => return Ok(None),
            Some(cell) => cell,
        };
        self.advance(symbols)?;
        Ok(Some(cell))
    }

    pub fn derelativize(&self, mut cell: Cell) -> Cell {
        if cell.binding.is_none() && is_bindable(&cell) {
            cell.binding = self.binding();
        }
        cell
    }

    pub fn is_at_end(&self, symbols: &mut SymbolTable) -> Raised<bool> {
        Ok(self.current(symbols)?.is_none())
    }

    fn run_termination(&self) {
        for handle in self.releasing.borrow_mut().drain(..) {
            handle.release();
        }
    }
}


fn is_bindable(cell: &Cell) -> bool {
    matches!(
        cell.heart,
        Heart::Word(_)
            | Heart::SetWord(_)
            | Heart::GetWord(_)
            | Heart::Block(_)
            | Heart::Group(_)
            | Heart::Fence(_)
    )
}


impl Drop for Feed {
    fn drop(&mut self) {
        // Termination runs exactly once, whether the feed drained
        // normally or its consumer aborted.
        self.run_termination();
    }
}


impl fmt::Debug for Feed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.borrow();
        match &state.source {
            Source::Array { array, index } => {
                write!(f, "Feed::Array(at {} of {})", index, array.len())
            }
            Source::Variadic { items } => {
                write!(f, "Feed::Variadic({} items pending)", items.len())
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::flex::Array;
    use pretty_assertions::assert_eq;

    fn symbols() -> SymbolTable {
        SymbolTable::new()
    }

    #[test]
    fn test_array_feed_yields_in_order() {
        let mut syms = symbols();
        let array = Array::source_from(vec![Cell::integer(1), Cell::integer(2)]);
        let feed = Feed::array(Series::head(array), None);
        assert_eq!(feed.take(&mut syms).unwrap(), Some(Cell::integer(1)));
        assert_eq!(feed.take(&mut syms).unwrap(), Some(Cell::integer(2)));
        assert_eq!(feed.take(&mut syms).unwrap(), None);
        // Reading past the end stays at the end.
        assert_eq!(feed.take(&mut syms).unwrap(), None);
    }

    #[test]
    fn test_variadic_scans_text_chunks() {
        let mut syms = symbols();
        let feed = Feed::variadic(
            vec![
                Splice::Text(String::from("1 2 ")),
                Splice::Cell(Cell::integer(3)),
                Splice::Text(String::from(" 4")),
            ],
            Vec::new(),
            None,
        )
        .unwrap();
        let mut got = Vec::new();
        while let Some(cell) = feed.take(&mut syms).unwrap() {
            got.push(cell);
        }
        assert_eq!(
            got,
            vec![
                Cell::integer(1),
                Cell::integer(2),
                Cell::integer(3),
                Cell::integer(4)
            ]
        );
    }

    #[test]
    fn test_split_token_rejected_at_creation() {
        let err = Feed::variadic(
            vec![
                Splice::Text(String::from("fo")),
                Splice::Text(String::from("o")),
            ],
            Vec::new(),
            None,
        )
        .unwrap_err();
        assert_eq!(err.id, ErrorId::ScanSplitToken);
    }

    #[test]
    fn test_slash_does_not_reform_a_path() {
        // The slash is a token character, so gluing is refused rather
        // than re-formed.
        let err = Feed::variadic(
            vec![
                Splice::Text(String::from("a/")),
                Splice::Text(String::from("b")),
            ],
            Vec::new(),
            None,
        )
        .unwrap_err();
        assert_eq!(err.id, ErrorId::ScanSplitToken);
    }

    #[test]
    fn test_delimited_chunks_are_fine() {
        let mut syms = symbols();
        let feed = Feed::variadic(
            vec![
                Splice::Text(String::from("foo ")),
                Splice::Text(String::from("bar")),
            ],
            Vec::new(),
            None,
        )
        .unwrap();
        let mut count = 0;
        while feed.take(&mut syms).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
