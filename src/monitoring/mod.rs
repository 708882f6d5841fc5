/*!
 * Monitoring
 * Structured logging setup for hosts embedding the primitives
 */

mod tracer;

pub use tracer::{init_tracing, try_init_tracing};
