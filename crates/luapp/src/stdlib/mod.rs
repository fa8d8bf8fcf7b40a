// Runtime library: built-in functions registered as globals.

pub mod basic;
pub mod package;
