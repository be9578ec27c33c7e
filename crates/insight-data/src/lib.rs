//! Derivation core for insight data: the insight state holder and the
//! reactor that derives the authoritative query and the alternate backend
//! classification from it.

pub mod holder;
pub mod reactor;

pub use holder::{InsightListener, InsightStateHolder};
pub use reactor::{DerivedQueryReactor, ReactorEvent};
