//! The guest interpreter: QuickJS plus the filesystem and importer the worker
//! stages component sources into.

pub mod interpreter;
pub mod runtime;
pub mod vfs;

pub use interpreter::{
    GuestArg, GuestError, GuestInterpreter, InterpreterLoader, ModuleHandle, QuickJsInterpreter,
    QuickJsLoader,
};
pub use runtime::QuickJsEngine;
pub use vfs::{VfsError, VirtualFs};
