pub mod invoice_repo;
pub mod pending_invoice_repo;

pub use invoice_repo::*;
pub use pending_invoice_repo::*;
