// SharePoint invoice register
// Generic list client (Microsoft Graph) plus the invoice-level view the
// reconciliation and approval flows use.

pub mod client;
pub mod graph_client;
pub mod invoice_list;

pub use client::{ListItem, ListPage, ListRef, RemoteListClient, SharePointError, MAX_ITEM_WINDOW};
pub use graph_client::{SharePointClient, SharePointConfig};
pub use invoice_list::{InvoiceList, RemoteInvoice, RemoteInvoicePage};
