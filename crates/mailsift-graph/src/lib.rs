//! # mailsift-graph
//!
//! Microsoft Graph implementation of the `MailSift` mailbox provider.
//!
//! [`GraphMailbox`] talks to the Graph mail REST API for one user's mail
//! folder. It authenticates with the `OAuth2` client-credentials grant and
//! refreshes its token on its own; callers only see
//! [`MailboxProvider`](mailsift_core::MailboxProvider) operations and
//! classified [`ProviderError`](mailsift_core::ProviderError)s.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
pub mod config;
mod error;
pub mod token;
mod wire;

pub use client::GraphMailbox;
pub use config::GraphConfig;
pub use error::{Error, Result};
pub use token::{Token, TokenSource};
