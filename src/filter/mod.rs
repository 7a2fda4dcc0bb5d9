//! # Filter Expression Compiler
//!
//! Predicates (`field__op` keys), combinator trees and the compiler that
//! serializes them to store-native filter documents.

mod compiler;
mod node;
mod operator;

pub use compiler::{compile, compile_node};
pub use node::{Filter, Node};
pub use operator::{Operator, Predicate, OPERATOR_SEPARATOR};
