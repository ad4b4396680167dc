pub mod auth;
pub mod campaigns;
pub mod conversations;
pub mod events;
pub mod ingestion;
pub mod leads;
pub mod organizations;
pub mod phone;
pub mod signature;
