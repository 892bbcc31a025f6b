//! Building blocks shared by the message-passing blocks: dense and residual
//! layers, activations, and named output rescaling.

pub mod activation;
pub mod dense;
pub mod residual;
pub mod scale_factor;
