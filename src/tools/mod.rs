pub mod builtin;
pub mod executor;
pub mod profile;
pub mod registry;

pub use executor::{ToolContext, ToolHandlerResult};
pub use profile::{derive_tool_allowance, ToolAllowance};
pub use registry::tools_for_profile;
