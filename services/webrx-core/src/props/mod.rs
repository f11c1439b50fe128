//! Reactive property store
//!
//! Components collect the keys they depend on and wire callbacks that run
//! synchronously on the thread performing the write, once per actual change.

mod manager;
mod property;
mod value;

pub use manager::PropertyManager;
pub use property::{Property, Subscription};
pub use value::Value;
