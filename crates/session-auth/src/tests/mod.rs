//! Scenario tests for the refresh coordinator and session supervisor.
//!
//! - `harness.rs`      - scripted backend, token builder, tokio-driven clock
//! - `single_flight.rs` - concurrent refresh callers share one exchange
//! - `retry.rs`        - attempt bound, backoff timing, response validation
//! - `supervisor.rs`   - login, logout, restore, self-heal, redirects
//! - `watchers.rs`     - expiry watch, proactive renewal, countdown, races
//!
//! Timer-driven tests run with tokio's clock paused; the harness clock
//! follows tokio time so token expiry moves with it.

pub(crate) mod harness;
