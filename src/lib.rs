// ZAP Assembly Emission Backend
// Turns abstract instruction-emission calls into peephole-optimized ZAP
// routines, and declared objects/tables/globals/vocabulary into a
// binary-layout-correct assembly module.

#[macro_use]
extern crate lazy_static;

pub mod debug_file;
pub mod error;
pub mod game;
pub mod instruction;
pub mod object;
pub mod operand;
pub mod ops;
pub mod peephole;
pub mod routine;
pub mod streams;
pub mod table;

#[cfg(test)]
mod game_tests;
#[cfg(test)]
mod routine_tests;

pub use error::EmitError;
