//! Gateway: HTTP endpoint and webhook dispatch.
//!
//! A single port serves `POST /webhook` (platform callbacks) and `GET /` (health).
//! Verified callbacks are acknowledged immediately and fanned out to handlers by
//! the [`Dispatcher`].

mod dispatch;
mod scope;
mod server;

pub use dispatch::{invoke, Dispatcher, InvocationOutcome};
pub use scope::ExecutionScope;
pub use server::{router, run_gateway, GatewayState, MAX_BODY_BYTES};
