//! rvcall - the architecture-specific core of a foreign-function-call
//! engine for the RISC-V calling convention
//!
//! Given a description of a function signature, the crate plans the exact
//! register and stack layout the hardware convention requires, marshals
//! argument values into a staging buffer for a raw call-entry stub, and
//! performs the inverse decoding so an intercepted incoming call (a
//! closure) can be dispatched to a generic handler. It also synthesizes
//! the six-word executable trampoline that routes an incoming native call
//! into the closure path.
//!
//! The raw assembly entry stubs themselves live outside this crate; the
//! staging buffer, flag word, and trampoline layouts here are the
//! contract they consume.

pub mod abi;
pub mod closure;
pub mod layout;
pub mod logging;
pub mod marshal;
pub mod trampoline;
pub mod types;

pub use abi::{Abi, NUM_ARG_REGS, WORD_SIZE};
pub use closure::{closure_inner, Closure, ClosureHandler, PrepareClosureError};
pub use layout::CallDescriptor;
pub use marshal::marshal_args;
pub use trampoline::{flush_icache, synthesize, TRAMPOLINE_BYTES, TRAMPOLINE_WORDS};
pub use types::{Type, TypeTag};
