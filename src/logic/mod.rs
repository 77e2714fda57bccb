pub mod authz;
pub mod filter_compile;
pub mod hooks;
pub mod instance_ops;
pub mod instance_read;
pub mod options;
pub mod schema_ops;

pub use authz::*;
pub use filter_compile::*;
pub use hooks::*;
pub use instance_ops::*;
pub use instance_read::*;
pub use options::*;
pub use schema_ops::*;
