// Token scanner.
//
// Variadic feeds splice text chunks between cells; each chunk runs
// through this scanner to become source elements. The grammar is the
// token surface the evaluator core needs: words (operator spellings
// included), set-words, get-words, numbers, strings, runes, blocks,
// groups, fences, commas, quote and quasi prefixes, and blanks.
//
// A token never crosses a chunk boundary. The feed asks this module
// whether a chunk ends mid-token before splicing the next one.

use regex::Regex;

use crate::error::{ErrorId, ErrorValue, Raised};
use crate::flex::Array;
use crate::symbol::SymbolTable;
use crate::value::{Cell, CellFlag, Series, LIFT_QUASI};


lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(
        r"^-?[0-9][0-9]*(\.[0-9]+)?"
    ).unwrap();

    static ref WORD_RE: Regex = Regex::new(
        r"^[A-Za-z+\-*/=<>?!.][A-Za-z0-9+\-*/=<>?!.]*"
    ).unwrap();
}


fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '+' | '-' | '*' | '/' | '=' | '<' | '>' | '?' | '!' | '.' | '_' | '"')
}

// Does this chunk's first token begin at its very first byte?
pub fn starts_mid_token(text: &str) -> bool {
    text.chars().next().map_or(false, is_token_char)
}

// Does this chunk's last token run flush to its end?
pub fn ends_mid_token(text: &str) -> bool {
    text.chars().last().map_or(false, is_token_char)
}


// Scan a whole chunk into source elements.
pub fn scan_chunk(symbols: &mut SymbolTable, text: &str) -> Raised<Vec<Cell>> {
    let mut scanner = Scanner {
        symbols,
        rest: text,
        pending_newline: false,
    };
    let cells = scanner.scan_until(None)?;
    Ok(cells)
}


struct Scanner<'a> {
    symbols: &'a mut SymbolTable,
    rest: &'a str,
    pending_newline: bool,
}


impl<'a> Scanner<'a> {
    fn bump(&mut self, bytes: usize) {
        self.rest = &self.rest[bytes..];
    }

    fn skip_blank(&mut self) {
        loop {
            let mut chars = self.rest.char_indices();
            match chars.next() {
                Some((_, c)) if c == '\n' => {
                    self.pending_newline = true;
                    self.bump(1);
                }
                Some((_, c)) if c.is_whitespace() => self.bump(c.len_utf8()),
                Some((_, ';')) => {
                    // Comment runs to end of line.
                    match self.rest.find('\n') {
                        Some(at) => self.bump(at),
                        None => self.rest = "",
                    }
                }
                _ => return,
            }
        }
    }

    fn take_newline_flag(&mut self) -> bool {
        let flag = self.pending_newline;
        self.pending_newline = false;
        flag
    }

    fn scan_until(&mut self, close: Option<char>) -> Raised<Vec<Cell>> {
        let mut cells = Vec::new();
        loop {
            self.skip_blank();
            let next = match self.rest.chars().next() {
                None => {
                    if close.is_some() {
                        return Err(ErrorValue::bare(ErrorId::MissingClose));
                    }
                    return Ok(cells);
                }
                Some(c) => c,
            };
            if Some(next) == close {
                self.bump(1);
                return Ok(cells);
            }
            if matches!(next, ']' | ')' | '}') {
                return Err(ErrorValue::new(
                    ErrorId::BadToken,
                    format!("unexpected {}", next),
                ));
            }
            let newline = self.take_newline_flag();
            let mut cell = self.scan_one()?;
            if newline {
                cell.flags.insert(CellFlag::NewlineBefore);
            }
            cells.push(cell);
        }
    }

    fn scan_one(&mut self) -> Raised<Cell> {
        let next = self.rest.chars().next().expect("scan_one at end");
        match next {
            '[' => {
                self.bump(1);
                let cells = self.scan_until(Some(']'))?;
                Ok(Cell::block(Series::head(Array::source_from(cells))))
            }
            '(' => {
                self.bump(1);
                let cells = self.scan_until(Some(')'))?;
                Ok(Cell::group(Series::head(Array::source_from(cells))))
            }
            '{' => {
                self.bump(1);
                let cells = self.scan_until(Some('}'))?;
                Ok(Cell::fence(Series::head(Array::source_from(cells))))
            }
            ',' => {
                self.bump(1);
                Ok(Cell::comma())
            }
            '\'' => {
                self.bump(1);
                self.skip_blank();
                if self.rest.is_empty() {
                    return Err(ErrorValue::new(
                        ErrorId::BadToken,
                        "quote with nothing to quote",
                    ));
                }
                Ok(self.scan_one()?.quoted())
            }
            '~' => {
                self.bump(1);
                self.skip_blank();
                let mut inner = self.scan_one()?;
                self.skip_blank();
                if !self.rest.starts_with('~') {
                    return Err(ErrorValue::new(
                        ErrorId::BadToken,
                        "unterminated quasiform",
                    ));
                }
                self.bump(1);
                inner.lift = LIFT_QUASI;
                Ok(inner)
            }
            '"' => self.scan_string(),
            '#' => {
                self.bump(1);
                match self.rest.chars().next() {
                    Some(c) if !c.is_whitespace() => {
                        self.bump(c.len_utf8());
                        Ok(Cell::rune(c))
                    }
                    _ => Err(ErrorValue::new(ErrorId::BadToken, "empty rune")),
                }
            }
            '_' => {
                self.bump(1);
                Ok(Cell::blank())
            }
            ':' => {
                self.bump(1);
                match WORD_RE.find(self.rest) {
                    Some(m) => {
                        let sym = self.symbols.intern(m.as_str());
                        self.bump(m.end());
                        Ok(Cell::get_word(sym))
                    }
                    None => Err(ErrorValue::new(
                        ErrorId::BadToken,
                        "colon with no word",
                    )),
                }
            }
            _ => self.scan_wordlike(),
        }
    }

    fn scan_string(&mut self) -> Raised<Cell> {
        debug_assert!(self.rest.starts_with('"'));
        self.bump(1);
        let mut text = String::new();
        let mut chars = self.rest.char_indices();
        loop {
            match chars.next() {
                None => return Err(ErrorValue::bare(ErrorId::MissingClose)),
                Some((at, '"')) => {
                    self.bump(at + 1);
                    return Ok(Cell::text(text));
                }
                Some((_, c)) => text.push(c),
            }
        }
    }

    fn scan_wordlike(&mut self) -> Raised<Cell> {
        // Numbers first, so -1 is an integer rather than a word.
        if let Some(m) = NUMBER_RE.find(self.rest) {
            let token = m.as_str();
            let cell = if token.contains('.') {
                match token.parse::<f64>() {
                    Ok(v) => Cell::decimal(v),
                    Err(_) => {
                        return Err(ErrorValue::new(
                            ErrorId::BadToken,
                            format!("bad decimal {}", token),
                        ));
                    }
                }
            } else {
                match token.parse::<i64>() {
                    Ok(v) => Cell::integer(v),
                    Err(_) => {
                        return Err(ErrorValue::new(
                            ErrorId::BadToken,
                            format!("integer out of range {}", token),
                        ));
                    }
                }
            };
            self.bump(m.end());
            return Ok(cell);
        }

        let m = match WORD_RE.find(self.rest) {
            Some(m) => m,
            None => {
                let c = self.rest.chars().next().expect("scan_wordlike at end");
                return Err(ErrorValue::new(
                    ErrorId::BadToken,
                    format!("unrecognized token at {}", c),
                ));
            }
        };
        let spelling = m.as_str();
        let sym = self.symbols.intern(spelling);
        self.bump(m.end());
        if self.rest.starts_with(':') {
            self.bump(1);
            return Ok(Cell::set_word(sym));
        }
        Ok(Cell::word(sym))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Heart, LIFT_PLAIN};
    use pretty_assertions::assert_eq;

    fn scan(text: &str) -> Vec<Cell> {
        let mut symbols = SymbolTable::new();
        scan_chunk(&mut symbols, text).unwrap()
    }

    #[test]
    fn test_scalars() {
        let cells = scan("1 -2 3.5 \"hi\" #x _ true");
        assert_eq!(cells[0], Cell::integer(1));
        assert_eq!(cells[1], Cell::integer(-2));
        assert_eq!(cells[2], Cell::decimal(3.5));
        assert_eq!(cells[3], Cell::text("hi"));
        assert_eq!(cells[4], Cell::rune('x'));
        assert_eq!(cells[5], Cell::blank());
        // true is just a word at scan time
        assert!(matches!(cells[6].heart, Heart::Word(_)));
    }

    #[test]
    fn test_word_forms() {
        let cells = scan("x x: :x + = <");
        assert!(matches!(cells[0].heart, Heart::Word(_)));
        assert!(matches!(cells[1].heart, Heart::SetWord(_)));
        assert!(matches!(cells[2].heart, Heart::GetWord(_)));
        for cell in &cells[3..] {
            assert!(matches!(cell.heart, Heart::Word(_)));
        }
    }

    #[test]
    fn test_nesting() {
        let cells = scan("[1 (2 3) {4}]");
        assert_eq!(cells.len(), 1);
        let outer = match &cells[0].heart {
            Heart::Block(s) => s.cells(),
            _ => panic!("expected block"),
        };
        assert_eq!(outer.len(), 3);
        assert!(matches!(outer[1].heart, Heart::Group(_)));
        assert!(matches!(outer[2].heart, Heart::Fence(_)));
    }

    #[test]
    fn test_quote_and_quasi() {
        let cells = scan("'x ~void~");
        assert_eq!(cells[0].lift, LIFT_PLAIN + 2);
        assert_eq!(cells[1].lift, LIFT_QUASI);
    }

    #[test]
    fn test_newline_flag() {
        let cells = scan("1\n2 3");
        assert!(!cells[0].flags.contains(CellFlag::NewlineBefore));
        assert!(cells[1].flags.contains(CellFlag::NewlineBefore));
        assert!(!cells[2].flags.contains(CellFlag::NewlineBefore));
    }

    #[test]
    fn test_comments_run_to_line_end() {
        let cells = scan("1 ; two three\n4");
        assert_eq!(cells, vec![scan("1")[0].clone(), {
            let mut c = Cell::integer(4);
            c.flags.insert(CellFlag::NewlineBefore);
            c
        }]);
    }

    #[test]
    fn test_missing_close() {
        let mut symbols = SymbolTable::new();
        let err = scan_chunk(&mut symbols, "[1 2").unwrap_err();
        assert_eq!(err.id, ErrorId::MissingClose);
    }

    #[test]
    fn test_boundary_probes() {
        assert!(ends_mid_token("1 + fo"));
        assert!(!ends_mid_token("1 + foo "));
        assert!(starts_mid_token("oo bar"));
        assert!(!starts_mid_token(" oo"));
    }
}
