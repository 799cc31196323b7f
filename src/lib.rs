// reverie: the evaluation core of a homoiconic, dynamically typed
// interpreter.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

extern crate regex;
extern crate ron;
extern crate serde;
#[macro_use]
extern crate lazy_static;


pub mod action;
pub mod api;
pub mod config;
pub mod env;
pub mod error;
pub mod eval;
pub mod feed;
pub mod flex;
pub mod level;
pub mod mem;
pub mod natives;
pub mod scan;
pub mod specialize;
pub mod symbol;
pub mod trampoline;
pub mod value;

pub use crate::api::{ApiHandle, Collator, Interp, Item};
pub use crate::config::Tunables;
pub use crate::error::{ErrorId, ErrorValue, Raised};
pub use crate::trampoline::{Bounce, TrampolineOut};
pub use crate::value::Cell;
