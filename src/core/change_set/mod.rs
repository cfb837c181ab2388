//! Version-to-version diffing.
//!
//! The storage engine reports a low-level index diff; [`ChangeSetComputer`]
//! validates it and produces the typed [`ChangeDescription`] that listeners
//! receive.

mod change_description;
mod computer;
mod index_set;


pub use change_description::*;
pub use computer::*;
pub use index_set::*;
