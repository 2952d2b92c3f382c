pub mod abi;
pub mod backend;
pub mod descriptor;
pub mod library;
pub mod status;
pub mod tensor;

pub use abi::{BackendHandle, BackendIdHandle, EventHandle, GraphHandle, SetIoAndRunGraphFn};
pub use backend::*;
pub use descriptor::*;
pub use library::*;
pub use status::*;
pub use tensor::*;
