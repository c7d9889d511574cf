// Domain-layer modules and shared errors/models
pub mod encoder {
    pub use crate::encoder::*;
}

pub mod prediction {
    pub use crate::prediction::*;
}

pub mod audit_log {
    pub use crate::audit_log::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
