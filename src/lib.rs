//! An embeddable, single-threaded HTTP/1.1 origin-server library.
//!
//! Applications create a [`Dispatcher`], call [`Dispatcher::dispatch`] with a
//! request callback, and get a [`ShutdownHandle`] to stop it from another
//! thread.

mod abnf;
mod buf;
mod dispatch;
mod error;
mod method;
mod parser;
mod request;
mod response;
mod status;
mod strmap;
pub mod url;
mod writer;

pub use buf::BufError;
pub use dispatch::{Dispatcher, ShutdownHandle};
pub use error::{DispatchError, InitError, ParseError, RespError, StopError};
pub use method::Method;
pub use request::Request;
pub use response::Response;
