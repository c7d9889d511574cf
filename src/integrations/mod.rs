//! Storage and metrics backends.

pub mod object_store {
    pub use crate::object_store::*;
}

pub mod metrics {
    pub use crate::metrics::*;
}
