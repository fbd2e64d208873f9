//! zkpix-rail
//!
//! Adapter for the Pix instant-payment rail: OAuth2 credential caching,
//! payment submission, status observation and bounded settlement polling.

pub mod client;
pub mod config;
pub mod error;
pub mod poller;
pub mod rail;
pub mod status;
pub mod token;

pub use client::PixClient;
pub use config::{ClientIdentity, RailConfig};
pub use error::RailError;
pub use poller::{Backoff, PollPolicy, PollState, SettlementPoller};
pub use rail::{PaymentQuery, PaymentRail, PaymentReceipt};
pub use status::StatusPolicy;
pub use token::{AccessToken, CredentialCache, OAuthTokenSource, TokenSource};
