#![doc = include_str!("../README.md")]

mod activity;
mod backend;
mod config;
mod dispatcher;
mod error;
mod host;
mod installation;
mod memory;
mod partition;
mod request;
mod result;
mod retry;
mod store;
mod subset;
mod telemetry;
mod workflow;

pub use crate::activity::*;
pub use crate::backend::*;
pub use crate::config::*;
pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::host::*;
pub use crate::installation::*;
pub use crate::memory::*;
pub use crate::partition::*;
pub use crate::request::*;
pub use crate::result::*;
pub use crate::retry::*;
pub use crate::store::*;
pub use crate::subset::*;
pub use crate::telemetry::*;
pub use crate::workflow::*;
