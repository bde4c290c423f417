//! Operator implementations. Construct these through the combinator methods
//! on [`Source`](crate::Source).

pub mod all;
pub mod drop;
pub mod publish;
pub mod subscribe_on;

pub use all::AllOp;
pub use drop::DropOp;
pub use publish::{MulticastSource, PublishOp};
pub use subscribe_on::SubscribeOnOp;
