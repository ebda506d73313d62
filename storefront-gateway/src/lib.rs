//! HTTP adapters for the external collaborators: the payment gateway, the
//! drop-ship partner and the scraped retailers we read stock from.

pub mod partner;
pub mod paystack;
pub mod scrape;

pub use partner::{PartnerClient, PartnerConfig};
pub use paystack::{PaystackConfig, PaystackGateway};
pub use scrape::{ScrapedSource, SourceConfig};
