//! Digest and cipher computation bound to the initialized backend. The
//! factory validates caller input and triggers the lazy backend bootstrap;
//! the context types own one operation in progress each.

pub mod cipher;
pub mod digest;
pub mod factory;
