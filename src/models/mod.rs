pub mod invoice;
pub mod import;
pub mod reconciliation;
pub mod currency;

pub use invoice::*;
pub use import::*;
pub use reconciliation::*;
pub use currency::*;
