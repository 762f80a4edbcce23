//! Duolock's client functionality modules.

mod clerk;

pub use clerk::{Clerk, ClerkConfig};
