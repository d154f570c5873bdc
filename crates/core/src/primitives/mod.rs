//! Store-backed distributed data primitives.
//!
//! Handles are plain serializable keys, so they travel inside workflow values
//! and can be resolved on any worker. Cells, sequences and vectors are
//! immutable once written and may be cached anywhere; atoms are the only
//! mutable primitive and every access goes to the store.

pub mod atom;
pub mod cell;
pub mod sequence;
pub mod vector;

pub use atom::CloudAtom;
pub use cell::CloudCell;
pub use sequence::CloudSequence;
pub use vector::CloudVector;
