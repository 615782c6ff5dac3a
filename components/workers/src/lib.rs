//! Worker interpreters and message passing
//!
//! Workers are interpreters running on their own threads, drawn from a
//! bounded [`WorkerPool`]. They exchange values only as structured clones:
//!
//! - [`structured_clone`] flattens a value graph into a [`StructuredValue`]
//!   and rebuilds it in another heap, cycles included
//! - [`Mailbox`] carries encoded messages into an interpreter's event queue
//! - [`Worker::join`] waits while servicing the caller's own events
//!
//! # Examples
//!
//! ```
//! use core_types::Value;
//! use interpreter::{Vm, VmConfig};
//! use workers::{decode, encode};
//!
//! let mut sender = Vm::new(VmConfig::default()).unwrap();
//! let mut receiver = Vm::new(VmConfig::default()).unwrap();
//!
//! let list = sender.new_array(vec![Value::Number(1.0), Value::from("two")]).unwrap();
//! let bytes = encode(&sender, &list).unwrap();
//! let copy = decode(&mut receiver, &bytes).unwrap();
//! assert_eq!(receiver.get_property(&copy, "1").unwrap(), Value::from("two"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod structured_clone;
pub mod worker;

pub use structured_clone::{decode, deserialize_value, encode, serialize_value, StructuredValue};
pub use worker::{Mailbox, Worker, WorkerPool, ON_MESSAGE};
