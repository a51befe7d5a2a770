#![warn(missing_docs)]

//! ini-file configuration import helpers, shared by the node binary and its tests.

pub mod ini;
