//! Message-passing blocks: long-range Ewald and short-range Hadamard, plus
//! the reciprocal-space geometry and reductions they share.

pub mod ewald;
pub mod hadamard;
pub mod kspace;
pub mod scatter;
pub mod update;
