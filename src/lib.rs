//! Physically mapped $C^1$ elements on triangles.
//!
//! The crate builds, symbolically, the change of basis that turns the raw shape-function
//! coefficients of the quintic Bell reference element into degrees of freedom that
//! conform to the physical geometry. The result is an expression for a downstream compiler
//! to specialize per cell; nothing is evaluated numerically here.
pub mod element;
pub mod error;
pub mod mapping;

pub mod symbolic {
    pub use fenris_symbolic::*;
}

pub extern crate nalgebra;
