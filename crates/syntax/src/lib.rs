//! Reference front-end for the ORE execution core
//!
//! Parses source text with a pest grammar into an [`ast::Ast`], indexes its
//! declarations into an [`Elaboration`] and runs structural checks. The
//! interpreter enforces all resource-safety rules at run time, so no type
//! inference is done here.

pub mod ast;
pub mod checker;
pub mod error;
pub mod parser;
pub mod program;

pub use error::{CheckError, Result, SyntaxError};
pub use parser::{parse_program, OreParser, Rule};
pub use program::{parse_and_check, Elaboration, Program, ProgramMetrics};
